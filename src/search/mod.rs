//! Federated search: local file search, the Drive index, the result cache and
//! the engine that merges them.

pub mod cache;
pub mod cloud;
pub mod engine;
pub mod filter;
pub mod local;
pub mod scoring;

pub use cache::ResultCache;
pub use cloud::CloudSearchProvider;
pub use engine::SearchEngine;
pub use local::{FileSearchBackend, LocalSearchProvider};

use crate::error::NexusError;
use crate::types::search::{SearchResult, Source};
use async_trait::async_trait;

/// One source of results, ranked best-first and at most `limit` long.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn source(&self) -> Source;

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, NexusError>;
}
