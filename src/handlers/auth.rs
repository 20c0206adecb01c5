use crate::middleware::RequireKeyAuth;
use crate::{NexusError, router::NexusState};
use axum::{Json, extract::State};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Serialize)]
pub struct AccessTokenResponse {
    pub access_token: Option<String>,
}

/// POST /auth/sign-in -> runs the browser flow; returns once tokens are stored.
pub async fn sign_in(
    _auth: RequireKeyAuth,
    State(state): State<NexusState>,
) -> Result<Json<Value>, NexusError> {
    info!("Sign-in requested");
    state.nexus.sign_in().await?;
    Ok(Json(json!({ "signedIn": true })))
}

/// POST /auth/sign-out -> revokes, forgets the credential and clears the index.
pub async fn sign_out(
    _auth: RequireKeyAuth,
    State(state): State<NexusState>,
) -> Result<Json<Value>, NexusError> {
    state.nexus.sign_out().await?;
    Ok(Json(json!({ "signedIn": false })))
}

/// GET /auth/token -> current access token, or null when signed out.
pub async fn access_token(
    _auth: RequireKeyAuth,
    State(state): State<NexusState>,
) -> Result<Json<AccessTokenResponse>, NexusError> {
    let access_token = state.nexus.access_token().await?;
    Ok(Json(AccessTokenResponse { access_token }))
}
