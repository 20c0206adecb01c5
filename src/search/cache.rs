use crate::types::search::{SearchResult, Source};

use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct CacheEntry {
    results: Arc<Vec<SearchResult>>,
    limit: usize,
}

/// Short-lived per-provider memo of ranked results, keyed by
/// `(source, normalized query)`.
#[derive(Debug, Clone)]
pub struct ResultCache {
    cache: Cache<(Source, String), CacheEntry>,
}

fn normalize(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl ResultCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries.max(1))
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// A hit needs an entry computed for at least `limit` results, or one that
    /// already came back short of its own limit.
    pub fn get(&self, source: Source, query: &str, limit: usize) -> Option<Vec<SearchResult>> {
        let entry = self.cache.get(&(source, normalize(query)))?;
        let complete = entry.limit >= limit || entry.results.len() < entry.limit;
        complete.then(|| entry.results.iter().take(limit).cloned().collect())
    }

    pub fn set(&self, source: Source, query: &str, limit: usize, results: Vec<SearchResult>) {
        self.cache.insert(
            (source, normalize(query)),
            CacheEntry {
                results: Arc::new(results),
                limit,
            },
        );
    }

    /// Drop every entry, or only those of one provider.
    pub fn clear(&self, source: Option<Source>) {
        let Some(source) = source else {
            self.cache.invalidate_all();
            return;
        };
        let keys: Vec<Arc<(Source, String)>> = self
            .cache
            .iter()
            .filter(|(key, _)| key.0 == source)
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            self.cache.invalidate(key.as_ref());
        }
    }
}
