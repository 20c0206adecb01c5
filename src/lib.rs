pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod google_oauth;
pub mod handlers;
pub mod middleware;
pub mod platform;
pub mod router;
pub mod search;
pub mod service;
pub mod types;

pub use context::{Nexus, NexusParts};
pub use error::NexusError;
pub use google_oauth::service::GoogleOauthService;
