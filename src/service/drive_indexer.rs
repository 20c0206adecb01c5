use crate::api::DriveApi;
use crate::config::IndexerConfig;
use crate::db::{ChangeAction, DriveFileRecord, IndexState, IndexStateUpdate, IndexStatus, IndexStorage};
use crate::error::{IsRetryable, NexusError};
use crate::service::index_events::IndexEvent;
use crate::service::session_actor::AccessTokenSource;

use axum::http::StatusCode;
use backon::{ExponentialBuilder, Retryable};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tuning knobs for crawling and polling.
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub page_size: u32,
    pub page_delay: Duration,
    pub poll_interval: Duration,
    pub requests_per_second: u32,
    pub retry_max_times: usize,
    pub retry_min_delay: Duration,
    pub retry_max_delay: Duration,
}

impl From<&IndexerConfig> for IndexerOptions {
    fn from(cfg: &IndexerConfig) -> Self {
        Self {
            page_size: cfg.page_size,
            page_delay: Duration::from_millis(cfg.page_delay_ms),
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            requests_per_second: cfg.requests_per_second,
            retry_max_times: cfg.retry_max_times,
            retry_min_delay: Duration::from_millis(cfg.retry_min_delay_ms),
            retry_max_delay: Duration::from_millis(cfg.retry_max_delay_ms),
        }
    }
}

impl IndexerOptions {
    fn retry_policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.retry_min_delay)
            .with_max_delay(self.retry_max_delay)
            .with_max_times(self.retry_max_times)
            .with_jitter()
    }
}

/// Full crawl plus incremental change polling against Drive, writing through
/// to the index store. Cheap to clone.
#[derive(Clone)]
pub struct DriveIndexer {
    inner: Arc<IndexerInner>,
}

struct IndexerInner {
    storage: IndexStorage,
    api: Arc<dyn DriveApi>,
    tokens: Arc<dyn AccessTokenSource>,
    options: IndexerOptions,
    limiter: DefaultDirectRateLimiter,
    stop_requested: AtomicBool,
    /// Held for the whole duration of a crawl.
    crawl: Arc<Mutex<()>>,
    /// Serializes change-feed polls.
    poll: Mutex<()>,
    events: broadcast::Sender<IndexEvent>,
}

/// Running incremental sync loop.
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    /// Signal the loop and wait until it has exited.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Incremental sync task ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Exclusive right to run the full crawl. While one is alive the indexer
/// reports itself as crawling and accepts stop requests.
pub struct CrawlGuard {
    _guard: OwnedMutexGuard<()>,
}

impl DriveIndexer {
    pub fn new(
        storage: IndexStorage,
        api: Arc<dyn DriveApi>,
        tokens: Arc<dyn AccessTokenSource>,
        options: IndexerOptions,
    ) -> Self {
        let rps = NonZeroU32::new(options.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let limiter = RateLimiter::direct(Quota::per_second(rps));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(IndexerInner {
                storage,
                api,
                tokens,
                options,
                limiter,
                stop_requested: AtomicBool::new(false),
                crawl: Arc::new(Mutex::new(())),
                poll: Mutex::new(()),
                events,
            }),
        }
    }

    /// New receiver for index events; dropping it unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_crawling(&self) -> bool {
        self.inner.crawl.try_lock().is_err()
    }

    pub async fn index_state(&self) -> Result<IndexState, NexusError> {
        self.inner.storage.index_state().await
    }

    /// A persisted `indexing` status with no crawl running means the process
    /// died mid-crawl; demote it to `paused` so the checkpoint is resumable.
    pub async fn recover(&self) -> Result<IndexState, NexusError> {
        let state = self.inner.storage.index_state().await?;
        if state.status != IndexStatus::Indexing || self.is_crawling() {
            return Ok(state);
        }
        warn!(
            indexed_count = state.indexed_count,
            has_checkpoint = state.last_index_page_token.is_some(),
            "Interrupted crawl found; marking paused"
        );
        self.inner
            .storage
            .update_index_state(IndexStateUpdate::default().status(IndexStatus::Paused))
            .await
    }

    /// Ask a running crawl to pause before its next page request.
    pub fn stop(&self) {
        if self.is_crawling() {
            info!("Crawl stop requested");
            self.inner.stop_requested.store(true, Ordering::SeqCst);
        }
    }

    /// Claim the crawl slot and clear any stale stop request. `None` while a
    /// crawl is already claimed.
    pub fn try_begin_crawl(&self) -> Option<CrawlGuard> {
        let guard = self.inner.crawl.clone().try_lock_owned().ok()?;
        self.inner.stop_requested.store(false, Ordering::SeqCst);
        Some(CrawlGuard { _guard: guard })
    }

    /// Run (or resume) the full crawl to completion, pause or failure and
    /// return the resulting status. No-op while a crawl is already running.
    pub async fn start_indexing(&self) -> Result<IndexStatus, NexusError> {
        let Some(guard) = self.try_begin_crawl() else {
            debug!("Crawl already running; start ignored");
            return Ok(IndexStatus::Indexing);
        };
        self.start_indexing_with(guard).await
    }

    /// Crawl under a slot claimed earlier with [`Self::try_begin_crawl`]. A
    /// stop requested since the claim pauses before the first page.
    pub async fn start_indexing_with(&self, _guard: CrawlGuard) -> Result<IndexStatus, NexusError> {
        let mut state = self.inner.storage.index_state().await?;
        if matches!(state.status, IndexStatus::Completed | IndexStatus::Error) {
            state = self
                .set_status(IndexStateUpdate::default().status(IndexStatus::Idle))
                .await?;
        }

        match self.crawl(state).await {
            Ok(status) => Ok(status),
            Err(e) => {
                error!("Full crawl failed: {}", e);
                // Checkpoint stays as it was so a restart resumes from the failed page.
                self.set_status(IndexStateUpdate::default().status(IndexStatus::Error))
                    .await?;
                self.emit(IndexEvent::Error {
                    message: e.to_string(),
                });
                Ok(IndexStatus::Error)
            }
        }
    }

    async fn crawl(&self, state: IndexState) -> Result<IndexStatus, NexusError> {
        let inner = &self.inner;
        let mut page_token = state.last_index_page_token;
        let mut indexed_count = if page_token.is_some() {
            state.indexed_count
        } else {
            0
        };

        self.set_status(
            IndexStateUpdate::default()
                .status(IndexStatus::Indexing)
                .indexed_count(indexed_count),
        )
        .await?;
        info!(
            resuming = page_token.is_some(),
            indexed_count, "Full crawl started"
        );

        loop {
            if inner.stop_requested.swap(false, Ordering::SeqCst) {
                self.set_status(IndexStateUpdate::default().status(IndexStatus::Paused))
                    .await?;
                self.emit(IndexEvent::Paused { indexed_count });
                info!(indexed_count, "Full crawl paused");
                return Ok(IndexStatus::Paused);
            }

            let request_token = page_token.clone();
            let page_size = inner.options.page_size;
            let page = self
                .call_drive(move |api, access_token| {
                    let request_token = request_token.clone();
                    async move {
                        api.list_files(&access_token, request_token.as_deref(), page_size)
                            .await
                    }
                })
                .await?;

            let records: Vec<DriveFileRecord> = page
                .files
                .into_iter()
                .filter(|f| !f.is_trashed())
                .map(DriveFileRecord::from)
                .collect();
            indexed_count += records.len() as i64;
            inner
                .storage
                .apply_crawl_page(&records, page.next_page_token.as_deref(), indexed_count)
                .await?;
            self.emit(IndexEvent::Progress { indexed_count });
            debug!(page = records.len(), indexed_count, "Crawl page stored");

            match page.next_page_token {
                Some(next) => {
                    page_token = Some(next);
                    tokio::time::sleep(inner.options.page_delay).await;
                }
                None => break,
            }
        }

        let mut update = IndexStateUpdate::default()
            .status(IndexStatus::Completed)
            .index_page_token(None);
        match self.fetch_start_page_token().await {
            Ok(cursor) => update = update.change_page_token(Some(cursor)),
            Err(e) => warn!("Could not capture change cursor after crawl: {}", e),
        }
        self.set_status(update).await?;
        self.emit(IndexEvent::Completed { indexed_count });
        info!(indexed_count, "Full crawl completed");
        Ok(IndexStatus::Completed)
    }

    /// Apply everything in the change feed since the stored cursor and
    /// advance it. Returns how many changes were applied.
    pub async fn poll_incremental_changes(&self) -> Result<usize, NexusError> {
        let inner = &self.inner;
        let _poll = inner.poll.lock().await;

        let state = inner.storage.index_state().await?;
        let mut cursor = match state.last_change_page_token {
            Some(cursor) => cursor,
            None => {
                let cursor = self.fetch_start_page_token().await?;
                inner
                    .storage
                    .update_index_state(
                        IndexStateUpdate::default().change_page_token(Some(cursor.clone())),
                    )
                    .await?;
                debug!("Change cursor acquired");
                cursor
            }
        };

        let mut applied = 0;
        loop {
            let request_cursor = cursor.clone();
            let page_size = inner.options.page_size;
            let page = self
                .call_drive(move |api, access_token| {
                    let request_cursor = request_cursor.clone();
                    async move {
                        api.list_changes(&access_token, &request_cursor, page_size)
                            .await
                    }
                })
                .await?;

            let actions: Vec<ChangeAction> = page
                .changes
                .into_iter()
                .filter_map(ChangeAction::from_change)
                .collect();
            let more = page.next_page_token.is_some();
            let next_cursor = match page.next_page_token.or(page.new_start_page_token) {
                Some(next) => next,
                None => {
                    warn!("Change feed page carried no continuation token; keeping cursor");
                    cursor.clone()
                }
            };
            inner.storage.apply_changes(&actions, &next_cursor).await?;
            applied += actions.len();
            cursor = next_cursor;
            if !more {
                break;
            }
        }

        if applied > 0 {
            info!(applied, "Incremental changes applied");
        }
        self.emit(IndexEvent::IncrementalSync { applied });
        Ok(applied)
    }

    /// Poll the change feed now and then every `poll_interval` until the
    /// returned handle is shut down. Failed iterations are reported and the
    /// loop carries on.
    pub fn spawn_incremental_sync(&self) -> SyncHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let indexer = self.clone();
        let interval = self.inner.options.poll_interval;

        let task = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Incremental sync started");
            loop {
                tokio::select! {
                    res = indexer.poll_incremental_changes() => {
                        if let Err(e) = res {
                            warn!("Incremental sync iteration failed: {}", e);
                            indexer.emit(IndexEvent::Error { message: e.to_string() });
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            info!("Incremental sync stopped");
        });

        SyncHandle { shutdown, task }
    }

    async fn fetch_start_page_token(&self) -> Result<String, NexusError> {
        self.call_drive(|api, access_token| async move {
            api.start_page_token(&access_token).await
        })
        .await
    }

    /// One Drive call under the rate limiter and retry policy. A 401 drops
    /// the cached access token so the retry runs with a refreshed one.
    async fn call_drive<T, F, Fut>(&self, op: F) -> Result<T, NexusError>
    where
        F: Fn(Arc<dyn DriveApi>, String) -> Fut,
        Fut: Future<Output = Result<T, NexusError>>,
    {
        let inner = &self.inner;
        (|| async {
            inner.limiter.until_ready().await;
            let access_token = inner
                .tokens
                .access_token()
                .await?
                .ok_or(NexusError::NotAuthenticated)?;
            let result = op(inner.api.clone(), access_token).await;
            if let Err(NexusError::UpstreamStatus(StatusCode::UNAUTHORIZED)) = &result {
                inner.tokens.invalidate();
            }
            result
        })
        .retry(inner.options.retry_policy())
        .when(|e: &NexusError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("Drive request retrying after error {}, sleeping {:?}", err, dur);
        })
        .await
    }

    async fn set_status(&self, update: IndexStateUpdate) -> Result<IndexState, NexusError> {
        let status = update.status;
        let state = self.inner.storage.update_index_state(update).await?;
        if let Some(status) = status {
            self.emit(IndexEvent::StatusChanged { status });
        }
        Ok(state)
    }

    fn emit(&self, event: IndexEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }
}
