pub mod credential_store;
pub mod drive_indexer;
pub mod index_events;
pub mod session_actor;

pub use credential_store::{CredentialStore, MemoryCredentialStore, SqliteCredentialStore};
pub use drive_indexer::{CrawlGuard, DriveIndexer, IndexerOptions, SyncHandle};
pub use index_events::IndexEvent;
pub use session_actor::{AccessTokenSource, SessionHandle};
