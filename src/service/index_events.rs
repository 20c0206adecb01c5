use crate::db::IndexStatus;
use serde::Serialize;

/// Progress and failure notifications published by the indexer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexEvent {
    StatusChanged { status: IndexStatus },
    Progress { indexed_count: i64 },
    Completed { indexed_count: i64 },
    Paused { indexed_count: i64 },
    IncrementalSync { applied: usize },
    Error { message: String },
}

impl IndexEvent {
    /// Event name on the SSE stream.
    pub fn name(&self) -> &'static str {
        match self {
            IndexEvent::StatusChanged { .. } => "status",
            IndexEvent::Progress { .. } => "progress",
            IndexEvent::Completed { .. } => "completed",
            IndexEvent::Paused { .. } => "paused",
            IndexEvent::IncrementalSync { .. } => "incremental_sync",
            IndexEvent::Error { .. } => "error",
        }
    }
}
