use crate::db::models::{ChangeAction, DriveFileRecord, IndexState, IndexStateUpdate, IndexStatus};
use crate::db::schema::{FTS_INIT, SQLITE_INIT};
use crate::error::NexusError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, QueryBuilder, Row, Sqlite, SqliteConnection};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

pub type SqlitePool = Pool<Sqlite>;

const FILE_COLUMNS: &str = "id, name, mime_type, modified_time, thumbnail_link, web_view_link";

/// Persistent index store: cloud file records, the singleton index state row
/// and the secret slots used by the credential store.
#[derive(Clone)]
pub struct IndexStorage {
    pool: SqlitePool,
    fts_enabled: Arc<AtomicBool>,
}

impl IndexStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            fts_enabled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open (creating if missing) the database at `database_url` and initialize the schema.
    pub async fn connect(database_url: &str) -> Result<Self, NexusError> {
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every pooled connection to `:memory:` would get its own empty database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let mut pool_opts = SqlitePoolOptions::new().max_connections(max_connections);
        if max_connections == 1 {
            pool_opts = pool_opts.idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_opts.connect_with(connect_opts).await?;
        let storage = Self::new(pool);
        storage.init_schema().await?;
        Ok(storage)
    }

    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled.load(Ordering::Relaxed)
    }

    /// Initialize the schema by executing the bundled DDL, seed the singleton
    /// state row, and try to set up the full-text index.
    pub async fn init_schema(&self) -> Result<(), NexusError> {
        // execute multiple statements safely (SQLite supports multi-commands but sqlx::query doesn't)
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }

        sqlx::query(
            "INSERT OR IGNORE INTO index_state (id, status, indexed_count, updated_at) VALUES (1, 'idle', 0, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        let mut fts_ok = true;
        for stmt in FTS_INIT {
            if let Err(e) = sqlx::query(stmt).execute(&self.pool).await {
                warn!(error = %e, "full-text index unavailable; falling back to LIKE search");
                fts_ok = false;
                break;
            }
        }
        self.fts_enabled.store(fts_ok, Ordering::Relaxed);
        info!(fts = fts_ok, "index storage schema ready");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // drive_files
    // ---------------------------------------------------------------------

    /// Upsert by cloud id inside one transaction.
    pub async fn upsert_files(&self, files: &[DriveFileRecord]) -> Result<(), NexusError> {
        let mut tx = self.pool.begin().await?;
        for file in files {
            Self::upsert_file(&mut tx, file).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Apply one crawl page and move the crawl checkpoint in the same transaction,
    /// so a page is either fully stored with its successor token or not at all.
    pub async fn apply_crawl_page(
        &self,
        files: &[DriveFileRecord],
        next_page_token: Option<&str>,
        indexed_count: i64,
    ) -> Result<IndexState, NexusError> {
        let mut tx = self.pool.begin().await?;
        for file in files {
            Self::upsert_file(&mut tx, file).await?;
        }
        let update = IndexStateUpdate::default()
            .index_page_token(next_page_token.map(str::to_string))
            .indexed_count(indexed_count);
        let state = Self::merge_state(&mut tx, update).await?;
        tx.commit().await?;
        Ok(state)
    }

    /// Apply change-feed actions and advance the change cursor atomically.
    pub async fn apply_changes(
        &self,
        actions: &[ChangeAction],
        change_page_token: &str,
    ) -> Result<IndexState, NexusError> {
        let mut tx = self.pool.begin().await?;
        for action in actions {
            match action {
                ChangeAction::Upsert(file) => Self::upsert_file(&mut tx, file).await?,
                ChangeAction::Delete(id) => {
                    sqlx::query("DELETE FROM drive_files WHERE id = ?")
                        .bind(id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }
        let update =
            IndexStateUpdate::default().change_page_token(Some(change_page_token.to_string()));
        let state = Self::merge_state(&mut tx, update).await?;
        tx.commit().await?;
        Ok(state)
    }

    pub async fn count_files(&self) -> Result<i64, NexusError> {
        let rec: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM drive_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.0)
    }

    /// Full-text prefix match on name tokens. Empty when FTS is unavailable
    /// or the query has no indexable tokens.
    pub async fn search_fts(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<DriveFileRecord>, NexusError> {
        if !self.fts_enabled() {
            return Ok(Vec::new());
        }
        let Some(expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query_as::<_, DriveFileRecord>(
            r#"SELECT f.id, f.name, f.mime_type, f.modified_time, f.thumbnail_link, f.web_view_link
               FROM drive_files_fts
               JOIN drive_files f ON f.rowid = drive_files_fts.rowid
               WHERE drive_files_fts MATCH ?
               ORDER BY drive_files_fts.rank, f.modified_time DESC
               LIMIT ?"#,
        )
        .bind(expr)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Layered `LIKE` match: the whole query as substring, or any single word,
    /// ordered prefix < suffix < substring < word, then most recent first.
    pub async fn search_like(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<DriveFileRecord>, NexusError> {
        let needle = escape_like(query.trim());
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let words: Vec<String> = query
            .split_whitespace()
            .map(escape_like)
            .filter(|w| !w.is_empty())
            .collect();

        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {FILE_COLUMNS} FROM drive_files WHERE name LIKE "
        ));
        qb.push_bind(format!("%{needle}%")).push(" ESCAPE '\\'");
        if words.len() > 1 {
            for word in &words {
                qb.push(" OR name LIKE ")
                    .push_bind(format!("%{word}%"))
                    .push(" ESCAPE '\\'");
            }
        }
        qb.push(" ORDER BY CASE WHEN name LIKE ")
            .push_bind(format!("{needle}%"))
            .push(" ESCAPE '\\' THEN 1 WHEN name LIKE ")
            .push_bind(format!("%{needle}"))
            .push(" ESCAPE '\\' THEN 2 WHEN name LIKE ")
            .push_bind(format!("%{needle}%"))
            .push(" ESCAPE '\\' THEN 3 ELSE 4 END, modified_time DESC LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = qb
            .build_query_as::<DriveFileRecord>()
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // ---------------------------------------------------------------------
    // index_state
    // ---------------------------------------------------------------------

    pub async fn index_state(&self) -> Result<IndexState, NexusError> {
        let mut conn = self.pool.acquire().await?;
        Self::load_state(&mut conn).await
    }

    /// Merge `update` into the singleton row and return the result.
    pub async fn update_index_state(
        &self,
        update: IndexStateUpdate,
    ) -> Result<IndexState, NexusError> {
        let mut tx = self.pool.begin().await?;
        let state = Self::merge_state(&mut tx, update).await?;
        tx.commit().await?;
        Ok(state)
    }

    /// Drop every cloud record and reset the state row to a fresh `idle`.
    pub async fn reset_index(&self) -> Result<(), NexusError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM drive_files")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"UPDATE index_state SET
                last_index_page_token = NULL,
                last_change_page_token = NULL,
                status = 'idle',
                indexed_count = 0,
                updated_at = ?
              WHERE id = 1"#,
        )
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // secrets
    // ---------------------------------------------------------------------

    pub async fn get_secret(&self, service: &str, account: &str) -> Result<Option<String>, NexusError> {
        let rec: Option<(String,)> =
            sqlx::query_as("SELECT secret FROM secrets WHERE service = ? AND account = ?")
                .bind(service)
                .bind(account)
                .fetch_optional(&self.pool)
                .await?;
        Ok(rec.map(|r| r.0))
    }

    pub async fn set_secret(&self, service: &str, account: &str, secret: &str) -> Result<(), NexusError> {
        sqlx::query(
            r#"INSERT INTO secrets (service, account, secret, updated_at) VALUES (?, ?, ?, ?)
               ON CONFLICT(service, account) DO UPDATE SET
                 secret = excluded.secret,
                 updated_at = excluded.updated_at"#,
        )
        .bind(service)
        .bind(account)
        .bind(secret)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_secret(&self, service: &str, account: &str) -> Result<(), NexusError> {
        sqlx::query("DELETE FROM secrets WHERE service = ? AND account = ?")
            .bind(service)
            .bind(account)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // helpers
    // ---------------------------------------------------------------------

    async fn upsert_file(conn: &mut SqliteConnection, file: &DriveFileRecord) -> Result<(), NexusError> {
        sqlx::query(
            r#"
            INSERT INTO drive_files (
                id, name, mime_type, modified_time, thumbnail_link, web_view_link
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name=excluded.name,
                mime_type=excluded.mime_type,
                modified_time=excluded.modified_time,
                thumbnail_link=excluded.thumbnail_link,
                web_view_link=excluded.web_view_link
            "#,
        )
        .bind(&file.id)
        .bind(&file.name)
        .bind(&file.mime_type)
        .bind(&file.modified_time)
        .bind(&file.thumbnail_link)
        .bind(&file.web_view_link)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn merge_state(
        conn: &mut SqliteConnection,
        update: IndexStateUpdate,
    ) -> Result<IndexState, NexusError> {
        let mut state = Self::load_state(conn).await?;
        update.apply_to(&mut state);
        state.updated_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO index_state (
                id, last_index_page_token, last_change_page_token, status, indexed_count, updated_at
            ) VALUES (1, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                last_index_page_token=excluded.last_index_page_token,
                last_change_page_token=excluded.last_change_page_token,
                status=excluded.status,
                indexed_count=excluded.indexed_count,
                updated_at=excluded.updated_at
            "#,
        )
        .bind(&state.last_index_page_token)
        .bind(&state.last_change_page_token)
        .bind(state.status.as_str())
        .bind(state.indexed_count)
        .bind(state.updated_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;
        Ok(state)
    }

    async fn load_state(conn: &mut SqliteConnection) -> Result<IndexState, NexusError> {
        let row = sqlx::query(
            r#"SELECT last_index_page_token, last_change_page_token, status, indexed_count, updated_at
               FROM index_state WHERE id = 1"#,
        )
        .fetch_optional(&mut *conn)
        .await?;
        match row {
            Some(row) => Self::row_to_state(row),
            None => Ok(IndexState {
                last_index_page_token: None,
                last_change_page_token: None,
                status: IndexStatus::Idle,
                indexed_count: 0,
                updated_at: Utc::now(),
            }),
        }
    }

    fn row_to_state(row: SqliteRow) -> Result<IndexState, NexusError> {
        let last_index_page_token: Option<String> = row.try_get("last_index_page_token")?;
        let last_change_page_token: Option<String> = row.try_get("last_change_page_token")?;
        let status_str: String = row.try_get("status")?;
        let indexed_count: i64 = row.try_get("indexed_count")?;
        let updated_at_str: String = row.try_get("updated_at")?;

        let status = status_str
            .parse::<IndexStatus>()
            .map_err(|e| sqlx::Error::Decode(e.into()))?;
        let updated_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&updated_at_str)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
            .with_timezone(&Utc);

        Ok(IndexState {
            last_index_page_token,
            last_change_page_token,
            status,
            indexed_count,
            updated_at,
        })
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `"tok1"* "tok2"*` over alphanumeric runs; `None` when nothing is indexable.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"*", t.to_lowercase()))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> IndexStorage {
        IndexStorage::connect("sqlite::memory:")
            .await
            .expect("in-memory storage")
    }

    fn record(id: &str, name: &str, modified: Option<&str>) -> DriveFileRecord {
        DriveFileRecord {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: Some("text/plain".to_string()),
            modified_time: modified.map(str::to_string),
            thumbnail_link: None,
            web_view_link: Some(format!("https://drive.example/{id}")),
        }
    }

    async fn get_file(storage: &IndexStorage, id: &str) -> Option<DriveFileRecord> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM drive_files WHERE id = ?");
        sqlx::query_as::<_, DriveFileRecord>(&sql)
            .bind(id)
            .fetch_optional(&storage.pool)
            .await
            .unwrap()
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }

    #[test]
    fn fts_expression_quotes_tokens() {
        assert_eq!(
            fts_match_expression("Budget 2024.xlsx").as_deref(),
            Some("\"budget\"* \"2024\"* \"xlsx\"*")
        );
        assert_eq!(fts_match_expression("  ..  "), None);
    }

    #[tokio::test]
    async fn singleton_state_row_exists_after_init() {
        let storage = storage().await;
        let state = storage.index_state().await.unwrap();
        assert_eq!(state.status, IndexStatus::Idle);
        assert_eq!(state.indexed_count, 0);
        assert!(state.last_index_page_token.is_none());

        // Re-running init must not reset the row.
        storage
            .update_index_state(IndexStateUpdate::default().indexed_count(7))
            .await
            .unwrap();
        storage.init_schema().await.unwrap();
        assert_eq!(storage.index_state().await.unwrap().indexed_count, 7);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let storage = storage().await;
        let rec = record("1", "Budget2024.xlsx", None);
        storage.upsert_files(&[rec.clone()]).await.unwrap();
        let once = get_file(&storage, "1").await;
        storage.upsert_files(&[rec.clone()]).await.unwrap();
        let twice = get_file(&storage, "1").await;
        assert_eq!(once, twice);
        assert_eq!(once, Some(rec));
        assert_eq!(storage.count_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn crawl_page_and_checkpoint_commit_together() {
        let storage = storage().await;
        let state = storage
            .apply_crawl_page(&[record("1", "a.txt", None)], Some("p2"), 1)
            .await
            .unwrap();
        assert_eq!(state.last_index_page_token.as_deref(), Some("p2"));
        assert_eq!(state.indexed_count, 1);
        assert_eq!(storage.count_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn changes_apply_and_advance_cursor() {
        let storage = storage().await;
        storage
            .upsert_files(&[record("1", "keep.txt", None), record("2", "trash.txt", None)])
            .await
            .unwrap();
        let actions = vec![
            ChangeAction::Delete("2".to_string()),
            ChangeAction::Upsert(record("3", "new.txt", None)),
        ];
        let state = storage.apply_changes(&actions, "c9").await.unwrap();
        assert_eq!(state.last_change_page_token.as_deref(), Some("c9"));
        assert!(get_file(&storage, "2").await.is_none());
        assert!(get_file(&storage, "3").await.is_some());
        assert_eq!(storage.count_files().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn like_search_orders_prefix_first() {
        let storage = storage().await;
        storage
            .upsert_files(&[
                record("2", "old_budget_notes.txt", Some("2024-01-02T00:00:00Z")),
                record("1", "Budget2024.xlsx", Some("2023-01-01T00:00:00Z")),
                record("3", "holiday.png", None),
            ])
            .await
            .unwrap();
        let rows = storage.search_like("budget", 10).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn like_search_treats_underscore_literally() {
        let storage = storage().await;
        storage
            .upsert_files(&[record("1", "a_b.txt", None), record("2", "axb.txt", None)])
            .await
            .unwrap();
        let rows = storage.search_like("a_b", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "1");
    }

    #[tokio::test]
    async fn fts_search_follows_upserts_and_deletes() {
        let storage = storage().await;
        if !storage.fts_enabled() {
            return;
        }
        storage
            .upsert_files(&[record("1", "Quarterly Report.pdf", None)])
            .await
            .unwrap();
        assert_eq!(storage.search_fts("quarter", 10).await.unwrap().len(), 1);

        storage
            .upsert_files(&[record("1", "Annual Summary.pdf", None)])
            .await
            .unwrap();
        assert!(storage.search_fts("quarter", 10).await.unwrap().is_empty());
        assert_eq!(storage.search_fts("annual", 10).await.unwrap().len(), 1);

        storage
            .apply_changes(&[ChangeAction::Delete("1".to_string())], "c1")
            .await
            .unwrap();
        assert!(storage.search_fts("annual", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_files_and_state() {
        let storage = storage().await;
        storage
            .apply_crawl_page(&[record("1", "a.txt", None)], Some("p2"), 1)
            .await
            .unwrap();
        storage
            .update_index_state(
                IndexStateUpdate::default()
                    .status(IndexStatus::Paused)
                    .change_page_token(Some("c1".into())),
            )
            .await
            .unwrap();
        storage.reset_index().await.unwrap();
        let state = storage.index_state().await.unwrap();
        assert_eq!(state.status, IndexStatus::Idle);
        assert_eq!(state.indexed_count, 0);
        assert!(state.last_index_page_token.is_none());
        assert!(state.last_change_page_token.is_none());
        assert_eq!(storage.count_files().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn secrets_round_trip() {
        let storage = storage().await;
        assert!(storage.get_secret("svc", "acct").await.unwrap().is_none());
        storage.set_secret("svc", "acct", "one").await.unwrap();
        storage.set_secret("svc", "acct", "two").await.unwrap();
        assert_eq!(
            storage.get_secret("svc", "acct").await.unwrap().as_deref(),
            Some("two")
        );
        storage.delete_secret("svc", "acct").await.unwrap();
        assert!(storage.get_secret("svc", "acct").await.unwrap().is_none());
    }
}
