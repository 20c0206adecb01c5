//! Database module: models and schema for persistent storage.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows and conversions
//! - `schema.rs`: SQL DDL for initializing the database (SQLite-first)
//! - `sqlite.rs`: `IndexStorage`, the pool-backed store shared by the indexer,
//!   the cloud provider and the credential store

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::{ChangeAction, DriveFileRecord, IndexState, IndexStateUpdate, IndexStatus};
pub use schema::{FTS_INIT, SQLITE_INIT};
pub use sqlite::{IndexStorage, SqlitePool};
