use crate::types::drive::{DriveChange, DriveFile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, FromRow)]
pub struct DriveFileRecord {
    pub id: String,
    pub name: String,
    pub mime_type: Option<String>,
    pub modified_time: Option<String>,
    pub thumbnail_link: Option<String>,
    pub web_view_link: Option<String>,
}

impl From<DriveFile> for DriveFileRecord {
    fn from(f: DriveFile) -> Self {
        Self {
            id: f.id,
            name: f.name,
            mime_type: f.mime_type,
            modified_time: f.modified_time,
            thumbnail_link: f.thumbnail_link,
            web_view_link: f.web_view_link,
        }
    }
}

/// What applying one change-feed entry does to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeAction {
    Upsert(DriveFileRecord),
    Delete(String),
}

impl ChangeAction {
    /// `None` for entries that carry nothing actionable (e.g. drive-level changes).
    pub fn from_change(change: DriveChange) -> Option<Self> {
        if change.removed.unwrap_or(false) {
            return change
                .file_id
                .or_else(|| change.file.map(|f| f.id))
                .map(ChangeAction::Delete);
        }
        match change.file {
            Some(file) if file.is_trashed() => Some(ChangeAction::Delete(file.id)),
            Some(file) => Some(ChangeAction::Upsert(file.into())),
            None => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    Idle,
    Indexing,
    Paused,
    Completed,
    Error,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Idle => "idle",
            IndexStatus::Indexing => "indexing",
            IndexStatus::Paused => "paused",
            IndexStatus::Completed => "completed",
            IndexStatus::Error => "error",
        }
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(IndexStatus::Idle),
            "indexing" => Ok(IndexStatus::Indexing),
            "paused" => Ok(IndexStatus::Paused),
            "completed" => Ok(IndexStatus::Completed),
            "error" => Ok(IndexStatus::Error),
            other => Err(format!("unknown index status `{other}`")),
        }
    }
}

/// The singleton `index_state` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexState {
    pub last_index_page_token: Option<String>,
    pub last_change_page_token: Option<String>,
    pub status: IndexStatus,
    pub indexed_count: i64,
    pub updated_at: DateTime<Utc>,
}

/// Partial update merged into the current row. `Some(None)` clears a token.
#[derive(Debug, Clone, Default)]
pub struct IndexStateUpdate {
    pub last_index_page_token: Option<Option<String>>,
    pub last_change_page_token: Option<Option<String>>,
    pub status: Option<IndexStatus>,
    pub indexed_count: Option<i64>,
}

impl IndexStateUpdate {
    pub fn status(mut self, status: IndexStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn index_page_token(mut self, token: Option<String>) -> Self {
        self.last_index_page_token = Some(token);
        self
    }

    pub fn change_page_token(mut self, token: Option<String>) -> Self {
        self.last_change_page_token = Some(token);
        self
    }

    pub fn indexed_count(mut self, count: i64) -> Self {
        self.indexed_count = Some(count);
        self
    }

    pub(crate) fn apply_to(self, state: &mut IndexState) {
        if let Some(token) = self.last_index_page_token {
            state.last_index_page_token = token;
        }
        if let Some(token) = self.last_change_page_token {
            state.last_change_page_token = token;
        }
        if let Some(status) = self.status {
            state.status = status;
        }
        if let Some(count) = self.indexed_count {
            state.indexed_count = count;
        }
    }
}
