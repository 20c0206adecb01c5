use crate::search::SearchProvider;
use crate::search::cache::ResultCache;
use crate::types::search::{SearchResult, Source};

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Scores closer than this count as a tie, and ties favor local results.
const TIE_EPSILON: f64 = 0.1;

/// Per-provider ceiling used unless [`SearchEngine::with_max_limit`] says
/// otherwise.
pub const DEFAULT_MAX_LIMIT: usize = 100;

/// Fans a query out to every provider and merges the answers into one
/// ranked list.
pub struct SearchEngine {
    providers: Vec<Arc<dyn SearchProvider>>,
    cache: ResultCache,
    default_limit: usize,
    max_limit: usize,
}

impl SearchEngine {
    pub fn new(
        providers: Vec<Arc<dyn SearchProvider>>,
        cache: ResultCache,
        default_limit: usize,
    ) -> Self {
        Self {
            providers,
            cache,
            default_limit: default_limit.max(1),
            max_limit: DEFAULT_MAX_LIMIT.max(default_limit),
        }
    }

    /// Cap on the per-provider limit a caller may ask for.
    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit.max(1);
        self.default_limit = self.default_limit.min(self.max_limit);
        self
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// `limit` applies per provider and is clamped to the configured
    /// maximum; the merged list holds at most `limit * providers` entries.
    pub async fn search(&self, query: &str, limit: Option<usize>) -> Vec<SearchResult> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(self.default_limit)
            .min(self.max_limit);

        let per_provider = join_all(
            self.providers
                .iter()
                .map(|provider| self.search_provider(provider.as_ref(), query, limit)),
        )
        .await;

        let mut merged = merge_ranked(per_provider.into_iter().flatten());
        merged.truncate(limit.saturating_mul(self.providers.len()));
        debug!(query, results = merged.len(), "Search done");
        merged
    }

    async fn search_provider(
        &self,
        provider: &dyn SearchProvider,
        query: &str,
        limit: usize,
    ) -> Vec<SearchResult> {
        let source = provider.source();
        if let Some(hit) = self.cache.get(source, query, limit) {
            debug!(source = %source, "Result cache hit");
            return hit;
        }
        match provider.search(query, limit).await {
            Ok(results) => {
                self.cache.set(source, query, limit, results.clone());
                results
            }
            Err(e) => {
                warn!(source = %source, "provider failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// De-duplicate by identity (keeping the higher score), sort by score
/// descending, and let local results win near-ties.
pub fn merge_ranked(results: impl IntoIterator<Item = SearchResult>) -> Vec<SearchResult> {
    let mut best: HashMap<String, SearchResult> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for result in results {
        let key = result.identity_key();
        match best.get_mut(&key) {
            Some(existing) => {
                if result.score > existing.score {
                    *existing = result;
                }
            }
            None => {
                order.push(key.clone());
                best.insert(key, result);
            }
        }
    }

    let mut merged: Vec<SearchResult> = order.into_iter().filter_map(|k| best.remove(&k)).collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));

    // Bubble local hits ahead of near-equal cloud hits. The sort above stays a
    // strict total order; the tolerance only applies between neighbours.
    for i in 1..merged.len() {
        let mut j = i;
        while j > 0
            && merged[j].source == Source::Local
            && merged[j - 1].source != Source::Local
            && merged[j - 1].score - merged[j].score < TIE_EPSILON
        {
            merged.swap(j - 1, j);
            j -= 1;
        }
    }
    merged
}
