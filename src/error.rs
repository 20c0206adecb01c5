use axum::{Json, http::StatusCode, response::IntoResponse};
use oauth2::basic::BasicErrorResponseType;
use oauth2::reqwest::Error as ReqwestClientError;
use oauth2::{HttpClientError, RequestTokenError, StandardErrorResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum NexusError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Not authenticated; sign in first")]
    NotAuthenticated,

    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Another authorization flow is already in progress")]
    AuthorizationInProgress,

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("OAuth2 token request error: {0}")]
    Oauth2Token(String),

    #[error("OAuth2 server error: {error}")]
    Oauth2Server { error: String },

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error("Subprocess error: {0}")]
    Subprocess(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl NexusError {
    /// The token endpoint reported the refresh token as revoked or expired.
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, NexusError::Oauth2Server { error } if error == "invalid_grant")
    }
}

/// Classifies errors that are worth another attempt.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for NexusError {
    fn is_retryable(&self) -> bool {
        match self {
            NexusError::Reqwest(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| {
                        s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS
                    })
            }
            // Attempts on 4xx are bounded by the retry policy's max_times.
            NexusError::UpstreamStatus(status) => {
                status.is_server_error() || status.is_client_error()
            }
            NexusError::Oauth2Token(_) => true,
            _ => false,
        }
    }
}

impl
    From<
        RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    > for NexusError
{
    fn from(
        e: RequestTokenError<
            HttpClientError<ReqwestClientError>,
            StandardErrorResponse<BasicErrorResponseType>,
        >,
    ) -> Self {
        match e {
            RequestTokenError::ServerResponse(err) => NexusError::Oauth2Server {
                error: err.error().to_string(),
            },
            RequestTokenError::Request(req_e) => {
                NexusError::Oauth2Token(format!("request failed: {}", req_e))
            }
            RequestTokenError::Parse(parse_err, _body) => NexusError::Json(parse_err.into_inner()),
            RequestTokenError::Other(s) => NexusError::Oauth2Token(s),
        }
    }
}

impl IntoResponse for NexusError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            NexusError::NotAuthenticated
            | NexusError::AuthorizationDenied(_)
            | NexusError::Oauth2Token(_)
            | NexusError::Oauth2Server { .. } => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                self.to_string(),
            ),
            NexusError::AuthorizationInProgress => (
                StatusCode::CONFLICT,
                "FLOW_IN_PROGRESS",
                self.to_string(),
            ),
            NexusError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                "INVALID_REQUEST",
                self.to_string(),
            ),
            NexusError::Timeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                "TIMEOUT",
                self.to_string(),
            ),
            NexusError::Reqwest(_) | NexusError::UrlParse(_) | NexusError::UpstreamStatus(_) => (
                StatusCode::BAD_GATEWAY,
                "BAD_GATEWAY",
                "Upstream service is unavailable.".to_string(),
            ),
            NexusError::DatabaseError(_)
            | NexusError::RactorError(_)
            | NexusError::Json(_)
            | NexusError::Io(_)
            | NexusError::Config(_)
            | NexusError::Subprocess(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal server error occurred.".to_string(),
            ),
        };
        let body = ApiErrorResponse {
            error: ApiErrorBody {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}
