use crate::db::{DriveFileRecord, IndexStorage};
use crate::error::NexusError;
use crate::search::SearchProvider;
use crate::search::filter::categorize_mime;
use crate::search::scoring::{Candidate, Scorer, parse_timestamp};
use crate::types::drive::FOLDER_MIME_TYPE;
use crate::types::search::{EntryKind, ResultMetadata, SearchResult, Source};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// Drive files from the local index. Never calls the Drive API.
pub struct CloudSearchProvider {
    storage: IndexStorage,
    scorer: Arc<dyn Scorer>,
}

impl CloudSearchProvider {
    pub fn new(storage: IndexStorage, scorer: Arc<dyn Scorer>) -> Self {
        Self { storage, scorer }
    }

    async fn candidates(&self, query: &str, fetch: usize) -> Result<Vec<DriveFileRecord>, NexusError> {
        match self.storage.search_fts(query, fetch).await {
            Ok(rows) if !rows.is_empty() => return Ok(rows),
            Ok(_) => {}
            Err(e) => warn!("full-text lookup failed, using LIKE: {}", e),
        }
        self.storage.search_like(query, fetch).await
    }

    fn to_result(&self, query: &str, record: DriveFileRecord, now: DateTime<Utc>) -> SearchResult {
        let modified = parse_timestamp(record.modified_time.as_deref());
        let score = self.scorer.score(
            query,
            &Candidate {
                name: &record.name,
                category: categorize_mime(record.mime_type.as_deref()),
                modified,
            },
            now,
        );
        let kind = if record.mime_type.as_deref() == Some(FOLDER_MIME_TYPE) {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        SearchResult {
            id: record.id,
            name: record.name,
            path: None,
            kind,
            source: Source::Drive,
            score,
            metadata: ResultMetadata {
                mime_type: record.mime_type,
                modified_time: record.modified_time,
                thumbnail_link: record.thumbnail_link,
                web_view_link: record.web_view_link,
            },
        }
    }
}

#[async_trait]
impl SearchProvider for CloudSearchProvider {
    fn source(&self) -> Source {
        Source::Drive
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, NexusError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let fetch = limit.saturating_mul(3).max(20);
        let records = self.candidates(query, fetch).await?;
        let found = records.len();

        let now = Utc::now();
        let mut results: Vec<SearchResult> = records
            .into_iter()
            .map(|r| self.to_result(query, r, now))
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        debug!(found, returned = results.len(), "Cloud search done");
        Ok(results)
    }
}
