//! SQL DDL for initializing the index storage.

/// Core schema:
/// - `drive_files`: denormalized cache of cloud file metadata, keyed by the cloud id
/// - `index_state`: singleton row (`id = 1`) holding crawl/poll checkpoints
/// - `secrets`: opaque blobs keyed by (service, account) for the credential store
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS drive_files (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    mime_type TEXT NULL,
    modified_time TEXT NULL, -- RFC3339 as reported by the API
    thumbnail_link TEXT NULL,
    web_view_link TEXT NULL
);

CREATE INDEX IF NOT EXISTS idx_drive_files_modified_time ON drive_files(modified_time);

CREATE TABLE IF NOT EXISTS index_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_index_page_token TEXT NULL,
    last_change_page_token TEXT NULL,
    status TEXT NOT NULL DEFAULT 'idle', -- idle | indexing | paused | completed | error
    indexed_count INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL -- RFC3339
);

CREATE TABLE IF NOT EXISTS secrets (
    service TEXT NOT NULL,
    account TEXT NOT NULL,
    secret TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (service, account)
);
"#;

/// Full-text index over file names. Trigger bodies contain `;`, so these are
/// executed one by one instead of being split like `SQLITE_INIT`.
pub const FTS_INIT: &[&str] = &[
    r#"CREATE VIRTUAL TABLE IF NOT EXISTS drive_files_fts
       USING fts5(name, content='drive_files', content_rowid='rowid')"#,
    r#"CREATE TRIGGER IF NOT EXISTS drive_files_ai AFTER INSERT ON drive_files BEGIN
         INSERT INTO drive_files_fts(rowid, name) VALUES (new.rowid, new.name);
       END"#,
    r#"CREATE TRIGGER IF NOT EXISTS drive_files_ad AFTER DELETE ON drive_files BEGIN
         INSERT INTO drive_files_fts(drive_files_fts, rowid, name) VALUES ('delete', old.rowid, old.name);
       END"#,
    r#"CREATE TRIGGER IF NOT EXISTS drive_files_au AFTER UPDATE ON drive_files BEGIN
         INSERT INTO drive_files_fts(drive_files_fts, rowid, name) VALUES ('delete', old.rowid, old.name);
         INSERT INTO drive_files_fts(rowid, name) VALUES (new.rowid, new.name);
       END"#,
    "INSERT INTO drive_files_fts(drive_files_fts) VALUES ('rebuild')",
];
