pub mod drive_api;

pub use drive_api::{DriveApi, GoogleDriveApi};

use crate::config::BasicConfig;
use crate::error::NexusError;
use std::time::Duration;

/// Shared outbound HTTP client. Token endpoint calls must not follow
/// redirects, so that client is built with `follow_redirects = false`.
pub fn build_http_client(
    basic: &BasicConfig,
    follow_redirects: bool,
) -> Result<reqwest::Client, NexusError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("search-nexus/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(30));
    if let Some(proxy_url) = basic.proxy.as_ref() {
        builder = builder.proxy(reqwest::Proxy::all(proxy_url.as_str())?);
    }
    if !follow_redirects {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }
    Ok(builder.build()?)
}
