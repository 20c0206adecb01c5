use crate::error::NexusError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
pub const GOOGLE_DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3/";
pub const DRIVE_METADATA_SCOPE: &str = "https://www.googleapis.com/auth/drive.metadata.readonly";

/// Runtime configuration, layered from defaults, `config.toml` and
/// `NEXUS_`-prefixed environment variables (`NEXUS_INDEXER__PAGE_SIZE=500`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub google: GoogleConfig,
    pub indexer: IndexerConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub database_url: String,
    pub loglevel: String,
    pub listen_addr: String,
    /// Empty disables key checks on the local API.
    pub api_key: String,
    pub proxy: Option<Url>,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://search-nexus.db".to_string(),
            loglevel: "info".to_string(),
            listen_addr: "127.0.0.1:8787".to_string(),
            api_key: String::new(),
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    pub revoke_url: String,
    pub drive_api_url: String,
    pub scopes: Vec<String>,
    pub callback_timeout_secs: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            revoke_url: GOOGLE_REVOKE_URL.to_string(),
            drive_api_url: GOOGLE_DRIVE_API_URL.to_string(),
            scopes: vec![DRIVE_METADATA_SCOPE.to_string()],
            callback_timeout_secs: 120,
        }
    }
}

impl GoogleConfig {
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub page_size: u32,
    pub poll_interval_secs: u64,
    pub page_delay_ms: u64,
    pub requests_per_second: u32,
    pub retry_max_times: usize,
    pub retry_min_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            poll_interval_secs: 30,
            page_delay_ms: 50,
            requests_per_second: 10,
            retry_max_times: 5,
            retry_min_delay_ms: 500,
            retry_max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_limit: usize,
    /// Largest per-provider limit a request may ask for.
    pub max_limit: usize,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: u64,
    /// Defaults to the user's home directory.
    pub local_root: Option<PathBuf>,
    pub subprocess_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
            cache_ttl_secs: 30,
            cache_max_entries: 256,
            local_root: None,
            subprocess_timeout_secs: 5,
        }
    }
}

impl SearchConfig {
    pub fn local_root(&self) -> PathBuf {
        self.local_root
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"))
    }
}

impl Config {
    /// Load from `config.toml` in the working directory plus the environment.
    pub fn load() -> Result<Self, NexusError> {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, NexusError> {
        let cfg = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("NEXUS_").split("__"))
            .extract()?;
        Ok(cfg)
    }
}
