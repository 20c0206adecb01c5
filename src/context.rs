use crate::api::{DriveApi, GoogleDriveApi, build_http_client};
use crate::config::Config;
use crate::db::{IndexState, IndexStatus, IndexStorage};
use crate::error::NexusError;
use crate::google_oauth::{GoogleOauthEndpoints, GoogleOauthService, SystemBrowser, TokenEndpoint, UrlOpener};
use crate::search::local::platform_backend;
use crate::search::scoring::{CloudScorer, LocalScorer};
use crate::search::{
    CloudSearchProvider, FileSearchBackend, LocalSearchProvider, ResultCache, SearchEngine,
    SearchProvider,
};
use crate::service::session_actor::{self, AccessTokenSource};
use crate::service::{CredentialStore, DriveIndexer, IndexEvent, IndexerOptions, SqliteCredentialStore, SyncHandle};
use crate::types::search::{SearchResult, Source};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use url::Url;

/// Swappable collaborators. `Nexus::build` wires the production ones; tests
/// pass fakes.
pub struct NexusParts {
    pub storage: IndexStorage,
    pub credentials: Arc<dyn CredentialStore>,
    pub token_endpoint: Arc<dyn TokenEndpoint>,
    pub opener: Arc<dyn UrlOpener>,
    pub drive: Arc<dyn DriveApi>,
    pub local_backend: Arc<dyn FileSearchBackend>,
}

#[derive(Default)]
struct Background {
    crawl: Option<JoinHandle<()>>,
    sync: Option<SyncHandle>,
}

/// Process-wide context: owns the session, the indexer, the providers and
/// the background tasks. Built once at start-up and shared by handle.
pub struct Nexus {
    storage: IndexStorage,
    oauth: GoogleOauthService,
    opener: Arc<dyn UrlOpener>,
    indexer: DriveIndexer,
    engine: SearchEngine,
    background: Arc<Mutex<Background>>,
}

impl Nexus {
    pub async fn build(cfg: &Config) -> Result<Self, NexusError> {
        let storage = IndexStorage::connect(&cfg.basic.database_url).await?;
        let api_client = build_http_client(&cfg.basic, true)?;
        let token_client = build_http_client(&cfg.basic, false)?;

        let parts = NexusParts {
            credentials: Arc::new(SqliteCredentialStore::new(storage.clone())),
            token_endpoint: Arc::new(GoogleOauthEndpoints::new(cfg.google.clone(), token_client)),
            opener: Arc::new(SystemBrowser),
            drive: Arc::new(GoogleDriveApi::new(api_client, &cfg.google.drive_api_url)?),
            local_backend: platform_backend(Duration::from_secs(cfg.search.subprocess_timeout_secs)),
            storage,
        };
        Self::from_parts(cfg, parts).await
    }

    pub async fn from_parts(cfg: &Config, parts: NexusParts) -> Result<Self, NexusError> {
        let session = session_actor::spawn(parts.credentials, parts.token_endpoint.clone()).await?;
        let tokens: Arc<dyn AccessTokenSource> = Arc::new(session.clone());
        let oauth = GoogleOauthService::new(
            parts.token_endpoint,
            session,
            parts.opener.clone(),
            cfg.google.callback_timeout(),
        );

        let indexer = DriveIndexer::new(
            parts.storage.clone(),
            parts.drive,
            tokens,
            IndexerOptions::from(&cfg.indexer),
        );

        let providers: Vec<Arc<dyn SearchProvider>> = vec![
            Arc::new(LocalSearchProvider::new(
                parts.local_backend,
                cfg.search.local_root(),
                Arc::new(LocalScorer),
            )),
            Arc::new(CloudSearchProvider::new(parts.storage.clone(), Arc::new(CloudScorer))),
        ];
        let cache = ResultCache::new(
            cfg.search.cache_max_entries,
            Duration::from_secs(cfg.search.cache_ttl_secs),
        );

        Ok(Self {
            storage: parts.storage,
            oauth,
            opener: parts.opener,
            indexer,
            engine: SearchEngine::new(providers, cache, cfg.search.default_limit)
                .with_max_limit(cfg.search.max_limit),
            background: Arc::new(Mutex::new(Background::default())),
        })
    }

    pub fn indexer(&self) -> &DriveIndexer {
        &self.indexer
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.indexer.subscribe()
    }

    /// Interactive sign-in; on success the crawl (or resume) starts in the
    /// background.
    pub async fn sign_in(&self) -> Result<(), NexusError> {
        self.oauth.sign_in().await?;
        self.spawn_crawl().await;
        Ok(())
    }

    /// Disconnect Drive: stop background work, drop the credential, and wipe
    /// the index together with any cached cloud results.
    pub async fn sign_out(&self) -> Result<(), NexusError> {
        self.stop_background().await;
        self.oauth.sign_out().await?;
        self.storage.reset_index().await?;
        self.engine.cache().clear(Some(Source::Drive));
        info!("Drive disconnected; index cleared");
        Ok(())
    }

    pub async fn access_token(&self) -> Result<Option<String>, NexusError> {
        self.oauth.access_token().await
    }

    pub async fn search(&self, query: &str, limit: Option<usize>) -> Vec<SearchResult> {
        self.engine.search(query, limit).await
    }

    pub async fn index_state(&self) -> Result<IndexState, NexusError> {
        self.indexer.index_state().await
    }

    /// Start or resume the crawl in the background. `false` when one is
    /// already running.
    pub async fn start_indexing(&self) -> Result<bool, NexusError> {
        if !self.oauth.session().has_credential().await? {
            return Err(NexusError::NotAuthenticated);
        }
        Ok(self.spawn_crawl().await)
    }

    pub fn stop_indexing(&self) {
        self.indexer.stop();
    }

    /// Start-up hook: repair an interrupted crawl and restart whatever
    /// background work the persisted state calls for.
    pub async fn resume_sync(&self) -> Result<IndexStatus, NexusError> {
        let state = self.indexer.recover().await?;
        if !self.oauth.session().has_credential().await? {
            info!("No stored Google credential; Drive sync stays idle");
            return Ok(state.status);
        }
        match state.status {
            IndexStatus::Completed => {
                let stored = self.storage.count_files().await?;
                info!(
                    indexed_count = state.indexed_count,
                    stored, "Index complete; starting change polling"
                );
                self.ensure_poll_loop().await;
            }
            IndexStatus::Error => {
                warn!("Index is in error state; waiting for an explicit start");
            }
            IndexStatus::Idle | IndexStatus::Paused | IndexStatus::Indexing => {
                info!(status = %state.status, "Resuming Drive crawl");
                self.spawn_crawl().await;
            }
        }
        Ok(state.status)
    }

    /// Open a local file or folder with its default application.
    pub async fn open_local_path(&self, path: &str) -> Result<(), NexusError> {
        let path = path.trim();
        if path.is_empty() {
            return Err(NexusError::InvalidRequest("path is empty".to_string()));
        }
        if !tokio::fs::try_exists(Path::new(path)).await? {
            return Err(NexusError::InvalidRequest(format!("path does not exist: {path}")));
        }
        self.opener.open(path).await
    }

    /// Open an http(s) URL in the default browser.
    pub async fn open_external_url(&self, url: &str) -> Result<(), NexusError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(NexusError::InvalidRequest("url is empty".to_string()));
        }
        let parsed = Url::parse(url)
            .map_err(|e| NexusError::InvalidRequest(format!("invalid url: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(NexusError::InvalidRequest(format!(
                "unsupported url scheme: {}",
                parsed.scheme()
            )));
        }
        self.opener.open(parsed.as_str()).await
    }

    /// Stop background work and the session actor.
    pub async fn shutdown(&self) {
        self.stop_background().await;
        self.oauth.session().stop();
        info!("Nexus shut down");
    }

    async fn spawn_crawl(&self) -> bool {
        // Claimed here rather than inside the task so a stop issued right
        // after this returns reaches the crawl.
        let Some(guard) = self.indexer.try_begin_crawl() else {
            return false;
        };
        let mut bg = self.background.lock().await;
        let indexer = self.indexer.clone();
        let background = self.background.clone();
        bg.crawl = Some(tokio::spawn(async move {
            match indexer.start_indexing_with(guard).await {
                Ok(IndexStatus::Completed) => {
                    let mut bg = background.lock().await;
                    if bg.sync.as_ref().is_none_or(SyncHandle::is_finished) {
                        bg.sync = Some(indexer.spawn_incremental_sync());
                    }
                }
                Ok(status) => info!(%status, "Crawl returned without completing"),
                Err(e) => error!("Crawl failed to run: {}", e),
            }
        }));
        true
    }

    async fn ensure_poll_loop(&self) {
        let mut bg = self.background.lock().await;
        if bg.sync.as_ref().is_none_or(SyncHandle::is_finished) {
            bg.sync = Some(self.indexer.spawn_incremental_sync());
        }
    }

    async fn stop_background(&self) {
        self.indexer.stop();
        // The crawl task may install the poll loop when it finishes, so it is
        // joined before the loop is taken.
        let crawl = self.background.lock().await.crawl.take();
        if let Some(task) = crawl
            && let Err(e) = task.await
        {
            warn!("Crawl task ended abnormally: {}", e);
        }
        let sync = self.background.lock().await.sync.take();
        if let Some(sync) = sync {
            sync.shutdown().await;
        }
    }
}
