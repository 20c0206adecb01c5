use async_trait::async_trait;
use axum::http::StatusCode;
use search_nexus::NexusError;
use search_nexus::api::DriveApi;
use search_nexus::db::{IndexStateUpdate, IndexStatus, IndexStorage};
use search_nexus::service::drive_indexer::{DriveIndexer, IndexerOptions};
use search_nexus::service::index_events::IndexEvent;
use search_nexus::service::session_actor::AccessTokenSource;
use search_nexus::types::drive::{ChangeListPage, DriveChange, DriveFile, FileListPage};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

fn file(id: &str, name: &str) -> DriveFile {
    DriveFile {
        id: id.to_string(),
        name: name.to_string(),
        mime_type: Some("text/plain".to_string()),
        modified_time: Some("2024-05-01T10:00:00.000Z".to_string()),
        thumbnail_link: None,
        web_view_link: Some(format!("https://drive.google.com/file/d/{id}/view")),
        trashed: None,
    }
}

fn trashed(id: &str, name: &str) -> DriveFile {
    DriveFile {
        trashed: Some(true),
        ..file(id, name)
    }
}

/// Three pages: (a, b) -> p2: (c, trashed d) -> p3: (e).
fn three_pages() -> HashMap<Option<String>, FileListPage> {
    let mut pages = HashMap::new();
    pages.insert(
        None,
        FileListPage {
            files: vec![file("a", "alpha.txt"), file("b", "beta.txt")],
            next_page_token: Some("p2".into()),
        },
    );
    pages.insert(
        Some("p2".into()),
        FileListPage {
            files: vec![file("c", "gamma.txt"), trashed("d", "delta.txt")],
            next_page_token: Some("p3".into()),
        },
    );
    pages.insert(
        Some("p3".into()),
        FileListPage {
            files: vec![file("e", "epsilon.txt")],
            next_page_token: None,
        },
    );
    pages
}

#[derive(Default)]
struct FakeDrive {
    pages: HashMap<Option<String>, FileListPage>,
    changes: HashMap<String, ChangeListPage>,
    list_calls: Mutex<Vec<Option<String>>>,
    change_calls: Mutex<Vec<String>>,
    /// Statuses returned (one per call) before any call succeeds.
    transient_failures: Mutex<VecDeque<StatusCode>>,
    always_fail: Option<StatusCode>,
    /// Request a stop once this many pages have been served.
    stop_after: Option<usize>,
    indexer: OnceLock<DriveIndexer>,
}

impl FakeDrive {
    fn fail_next(&self) -> Option<StatusCode> {
        if let Some(status) = self.always_fail {
            return Some(status);
        }
        self.transient_failures.lock().unwrap().pop_front()
    }

    fn list_calls(&self) -> Vec<Option<String>> {
        self.list_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriveApi for FakeDrive {
    async fn list_files(
        &self,
        _access_token: &str,
        page_token: Option<&str>,
        _page_size: u32,
    ) -> Result<FileListPage, NexusError> {
        if let Some(status) = self.fail_next() {
            return Err(NexusError::UpstreamStatus(status));
        }
        let served = {
            let mut calls = self.list_calls.lock().unwrap();
            calls.push(page_token.map(str::to_string));
            calls.len()
        };
        if self.stop_after == Some(served) {
            if let Some(indexer) = self.indexer.get() {
                indexer.stop();
            }
        }
        self.pages
            .get(&page_token.map(str::to_string))
            .cloned()
            .ok_or(NexusError::UpstreamStatus(StatusCode::BAD_REQUEST))
    }

    async fn start_page_token(&self, _access_token: &str) -> Result<String, NexusError> {
        Ok("c1".to_string())
    }

    async fn list_changes(
        &self,
        _access_token: &str,
        page_token: &str,
        _page_size: u32,
    ) -> Result<ChangeListPage, NexusError> {
        if let Some(status) = self.fail_next() {
            return Err(NexusError::UpstreamStatus(status));
        }
        self.change_calls.lock().unwrap().push(page_token.to_string());
        Ok(self.changes.get(page_token).cloned().unwrap_or(ChangeListPage {
            changes: vec![],
            next_page_token: None,
            new_start_page_token: Some(page_token.to_string()),
        }))
    }
}

#[derive(Default)]
struct StaticToken {
    invalidations: AtomicUsize,
}

#[async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<Option<String>, NexusError> {
        Ok(Some("tok".to_string()))
    }

    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}

fn options() -> IndexerOptions {
    IndexerOptions {
        page_size: 1000,
        page_delay: Duration::ZERO,
        poll_interval: Duration::from_millis(20),
        requests_per_second: 1000,
        retry_max_times: 3,
        retry_min_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
    }
}

async fn setup(drive: FakeDrive) -> (DriveIndexer, Arc<FakeDrive>, Arc<StaticToken>, IndexStorage) {
    let storage = IndexStorage::connect("sqlite::memory:").await.unwrap();
    let drive = Arc::new(drive);
    let tokens = Arc::new(StaticToken::default());
    let indexer = DriveIndexer::new(storage.clone(), drive.clone(), tokens.clone(), options());
    let _ = drive.indexer.set(indexer.clone());
    (indexer, drive, tokens, storage)
}

#[tokio::test]
async fn full_crawl_indexes_every_page_and_captures_cursor() {
    let (indexer, drive, _, storage) = setup(FakeDrive {
        pages: three_pages(),
        ..Default::default()
    })
    .await;
    let mut events = indexer.subscribe();

    let status = indexer.start_indexing().await.unwrap();
    assert_eq!(status, IndexStatus::Completed);

    let state = storage.index_state().await.unwrap();
    assert_eq!(state.status, IndexStatus::Completed);
    assert_eq!(state.indexed_count, 4);
    assert_eq!(state.last_index_page_token, None);
    assert_eq!(state.last_change_page_token.as_deref(), Some("c1"));

    assert_eq!(storage.count_files().await.unwrap(), 4);
    assert!(storage.search_like("delta", 10).await.unwrap().is_empty());
    assert_eq!(
        drive.list_calls(),
        vec![None, Some("p2".to_string()), Some("p3".to_string())]
    );

    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        if event == (IndexEvent::Completed { indexed_count: 4 }) {
            saw_completed = true;
        }
    }
    assert!(saw_completed);
}

#[tokio::test]
async fn stop_pauses_and_restart_fetches_only_remaining_pages() {
    let (indexer, drive, _, storage) = setup(FakeDrive {
        pages: three_pages(),
        stop_after: Some(1),
        ..Default::default()
    })
    .await;

    assert_eq!(indexer.start_indexing().await.unwrap(), IndexStatus::Paused);
    let state = storage.index_state().await.unwrap();
    assert_eq!(state.status, IndexStatus::Paused);
    assert_eq!(state.last_index_page_token.as_deref(), Some("p2"));
    assert_eq!(state.indexed_count, 2);
    assert_eq!(drive.list_calls(), vec![None]);

    assert_eq!(indexer.start_indexing().await.unwrap(), IndexStatus::Completed);
    assert_eq!(
        drive.list_calls(),
        vec![None, Some("p2".to_string()), Some("p3".to_string())]
    );
    assert_eq!(storage.index_state().await.unwrap().indexed_count, 4);
}

#[tokio::test]
async fn stop_between_claim_and_first_page_is_honored() {
    let (indexer, drive, _, storage) = setup(FakeDrive {
        pages: three_pages(),
        ..Default::default()
    })
    .await;

    let guard = indexer.try_begin_crawl().expect("crawl slot free");
    assert!(indexer.is_crawling());
    assert!(indexer.try_begin_crawl().is_none());
    assert_eq!(indexer.start_indexing().await.unwrap(), IndexStatus::Indexing);
    indexer.stop();

    assert_eq!(indexer.start_indexing_with(guard).await.unwrap(), IndexStatus::Paused);
    assert!(drive.list_calls().is_empty());
    assert_eq!(storage.index_state().await.unwrap().status, IndexStatus::Paused);
    assert!(!indexer.is_crawling());

    // A fresh claim clears the old request and runs to the end.
    assert_eq!(indexer.start_indexing().await.unwrap(), IndexStatus::Completed);
    assert_eq!(storage.count_files().await.unwrap(), 4);
}

#[tokio::test]
async fn resume_continues_from_checkpoint_and_count() {
    let (indexer, drive, _, storage) = setup(FakeDrive {
        pages: three_pages(),
        ..Default::default()
    })
    .await;
    storage
        .update_index_state(
            IndexStateUpdate::default()
                .status(IndexStatus::Paused)
                .index_page_token(Some("p2".into()))
                .indexed_count(50),
        )
        .await
        .unwrap();

    indexer.start_indexing().await.unwrap();

    assert_eq!(drive.list_calls().first().cloned().flatten().as_deref(), Some("p2"));
    assert_eq!(storage.index_state().await.unwrap().indexed_count, 52);
}

#[tokio::test]
async fn unauthorized_page_refreshes_token_and_retries_same_page() {
    let (indexer, drive, tokens, storage) = setup(FakeDrive {
        pages: three_pages(),
        transient_failures: Mutex::new(VecDeque::from([StatusCode::UNAUTHORIZED])),
        ..Default::default()
    })
    .await;

    assert_eq!(indexer.start_indexing().await.unwrap(), IndexStatus::Completed);
    assert_eq!(tokens.invalidations.load(Ordering::SeqCst), 1);
    assert_eq!(drive.list_calls().len(), 3);
    assert_eq!(storage.count_files().await.unwrap(), 4);
}

#[tokio::test]
async fn rate_limited_and_server_errors_back_off_and_succeed() {
    let (indexer, _, _, storage) = setup(FakeDrive {
        pages: three_pages(),
        transient_failures: Mutex::new(VecDeque::from([
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::SERVICE_UNAVAILABLE,
        ])),
        ..Default::default()
    })
    .await;

    assert_eq!(indexer.start_indexing().await.unwrap(), IndexStatus::Completed);
    assert_eq!(storage.count_files().await.unwrap(), 4);
}

#[tokio::test]
async fn persistent_client_error_ends_in_error_state_with_checkpoint_kept() {
    let (indexer, drive, _, storage) = setup(FakeDrive {
        pages: three_pages(),
        always_fail: Some(StatusCode::FORBIDDEN),
        ..Default::default()
    })
    .await;
    storage
        .update_index_state(
            IndexStateUpdate::default()
                .status(IndexStatus::Paused)
                .index_page_token(Some("p2".into()))
                .indexed_count(2),
        )
        .await
        .unwrap();
    let mut events = indexer.subscribe();

    assert_eq!(indexer.start_indexing().await.unwrap(), IndexStatus::Error);

    let state = storage.index_state().await.unwrap();
    assert_eq!(state.status, IndexStatus::Error);
    assert_eq!(state.last_index_page_token.as_deref(), Some("p2"));
    assert!(drive.list_calls().is_empty());

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, IndexEvent::Error { .. }) {
            saw_error = true;
        }
    }
    assert!(saw_error);
}

#[tokio::test]
async fn recover_demotes_interrupted_crawl_to_paused() {
    let (indexer, _, _, storage) = setup(FakeDrive::default()).await;
    storage
        .update_index_state(
            IndexStateUpdate::default()
                .status(IndexStatus::Indexing)
                .index_page_token(Some("p2".into())),
        )
        .await
        .unwrap();

    let state = indexer.recover().await.unwrap();
    assert_eq!(state.status, IndexStatus::Paused);
    assert_eq!(state.last_index_page_token.as_deref(), Some("p2"));
}

fn change_feed() -> HashMap<String, ChangeListPage> {
    let mut changes = HashMap::new();
    changes.insert(
        "c1".to_string(),
        ChangeListPage {
            changes: vec![
                DriveChange {
                    file_id: Some("a".into()),
                    removed: Some(true),
                    file: None,
                },
                DriveChange {
                    file_id: Some("b".into()),
                    removed: Some(false),
                    file: Some(trashed("b", "beta.txt")),
                },
            ],
            next_page_token: Some("c1b".into()),
            new_start_page_token: None,
        },
    );
    changes.insert(
        "c1b".to_string(),
        ChangeListPage {
            changes: vec![DriveChange {
                file_id: Some("x".into()),
                removed: Some(false),
                file: Some(file("x", "new-plan.md")),
            }],
            next_page_token: None,
            new_start_page_token: Some("c2".into()),
        },
    );
    changes
}

#[tokio::test]
async fn incremental_poll_applies_changes_and_advances_cursor() {
    let (indexer, drive, _, storage) = setup(FakeDrive {
        pages: three_pages(),
        changes: change_feed(),
        ..Default::default()
    })
    .await;
    indexer.start_indexing().await.unwrap();

    let applied = indexer.poll_incremental_changes().await.unwrap();
    assert_eq!(applied, 3);

    assert!(storage.search_like("alpha", 10).await.unwrap().is_empty());
    assert!(storage.search_like("beta", 10).await.unwrap().is_empty());
    let added = storage.search_like("new-plan", 10).await.unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].id, "x");
    assert_eq!(
        storage.index_state().await.unwrap().last_change_page_token.as_deref(),
        Some("c2")
    );
    assert_eq!(
        *drive.change_calls.lock().unwrap(),
        vec!["c1".to_string(), "c1b".to_string()]
    );
}

#[tokio::test]
async fn incremental_poll_acquires_cursor_when_missing() {
    let (indexer, _, _, storage) = setup(FakeDrive {
        changes: change_feed(),
        ..Default::default()
    })
    .await;

    indexer.poll_incremental_changes().await.unwrap();
    assert_eq!(
        storage.index_state().await.unwrap().last_change_page_token.as_deref(),
        Some("c2")
    );
}

#[tokio::test]
async fn failed_poll_leaves_cursor_untouched() {
    let (indexer, _, _, storage) = setup(FakeDrive {
        changes: change_feed(),
        always_fail: Some(StatusCode::INTERNAL_SERVER_ERROR),
        ..Default::default()
    })
    .await;
    storage
        .update_index_state(IndexStateUpdate::default().change_page_token(Some("c1".into())))
        .await
        .unwrap();

    assert!(indexer.poll_incremental_changes().await.is_err());
    assert_eq!(
        storage.index_state().await.unwrap().last_change_page_token.as_deref(),
        Some("c1")
    );
}

#[tokio::test]
async fn sync_loop_polls_until_shut_down() {
    let (indexer, drive, _, _) = setup(FakeDrive {
        changes: change_feed(),
        ..Default::default()
    })
    .await;
    let mut events = indexer.subscribe();

    let handle = indexer.spawn_incremental_sync();
    let first = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(IndexEvent::IncrementalSync { applied }) = events.recv().await {
                return applied;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(first, 3);

    handle.shutdown().await;
    let calls_after_shutdown = drive.change_calls.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(drive.change_calls.lock().unwrap().len(), calls_after_shutdown);
}
