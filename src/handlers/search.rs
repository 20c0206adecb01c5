use crate::middleware::RequireKeyAuth;
use crate::types::search::SearchResult;
use crate::{NexusError, router::NexusState};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

/// GET /search?q=...&limit=... -> merged, ranked results from every provider.
pub async fn search(
    _auth: RequireKeyAuth,
    State(state): State<NexusState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<SearchResult>> {
    Json(state.nexus.search(&query.q, query.limit).await)
}

#[derive(Debug, Deserialize)]
pub struct OpenPathBody {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct OpenUrlBody {
    pub url: String,
}

/// POST /open/local -> open a local result with its default application.
pub async fn open_local_path(
    _auth: RequireKeyAuth,
    State(state): State<NexusState>,
    Json(body): Json<OpenPathBody>,
) -> Result<StatusCode, NexusError> {
    state.nexus.open_local_path(&body.path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /open/url -> open a cloud result's web link in the browser.
pub async fn open_external_url(
    _auth: RequireKeyAuth,
    State(state): State<NexusState>,
    Json(body): Json<OpenUrlBody>,
) -> Result<StatusCode, NexusError> {
    state.nexus.open_external_url(&body.url).await?;
    Ok(StatusCode::NO_CONTENT)
}
