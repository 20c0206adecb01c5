use crate::context::Nexus;
use crate::handlers::{auth, index, search};

use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct NexusState {
    pub nexus: Arc<Nexus>,
    pub api_key: Arc<str>,
}

impl NexusState {
    pub fn new(nexus: Arc<Nexus>, api_key: Arc<str>) -> Self {
        Self { nexus, api_key }
    }
}

pub fn nexus_router(state: NexusState) -> Router {
    Router::new()
        .route("/auth/sign-in", post(auth::sign_in))
        .route("/auth/sign-out", post(auth::sign_out))
        .route("/auth/token", get(auth::access_token))
        .route("/search", get(search::search))
        .route("/index/state", get(index::index_state))
        .route("/index/start", post(index::start_indexing))
        .route("/index/stop", post(index::stop_indexing))
        .route("/index/events", get(index::index_events))
        .route("/open/local", post(search::open_local_path))
        .route("/open/url", post(search::open_external_url))
        .with_state(state)
}
