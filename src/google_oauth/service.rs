use crate::error::NexusError;
use crate::google_oauth::endpoints::TokenEndpoint;
use crate::google_oauth::loopback::CallbackListener;
use crate::platform;
use crate::service::session_actor::{AccessTokenSource, SessionHandle};

use async_trait::async_trait;
use oauth2::{AuthorizationCode, PkceCodeChallenge};
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Launches the user's browser at the authorization URL.
#[async_trait]
pub trait UrlOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), NexusError>;
}

/// Opens URLs with the desktop's default handler.
pub struct SystemBrowser;

#[async_trait]
impl UrlOpener for SystemBrowser {
    async fn open(&self, url: &str) -> Result<(), NexusError> {
        platform::open_with_default_handler(OsStr::new(url)).await
    }
}

/// Service layer composing the interactive Google sign-in flow with the
/// session actor.
pub struct GoogleOauthService {
    endpoint: Arc<dyn TokenEndpoint>,
    session: SessionHandle,
    opener: Arc<dyn UrlOpener>,
    callback_timeout: Duration,
    flow: Mutex<()>,
}

impl GoogleOauthService {
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        session: SessionHandle,
        opener: Arc<dyn UrlOpener>,
        callback_timeout: Duration,
    ) -> Self {
        Self {
            endpoint,
            session,
            opener,
            callback_timeout,
            flow: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// Run the authorization-code + PKCE flow through the browser and a
    /// loopback listener, then persist the issued tokens.
    pub async fn sign_in(&self) -> Result<(), NexusError> {
        let _flow = self
            .flow
            .try_lock()
            .map_err(|_| NexusError::AuthorizationInProgress)?;

        let listener = CallbackListener::bind().await?;
        let redirect_uri = listener.redirect_uri().to_string();
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf) = self.endpoint.authorize_url(&redirect_uri, challenge)?;

        info!(redirect_uri = %redirect_uri, "Opening browser for Google sign-in");
        if let Err(e) = self.opener.open(&auth_url).await {
            warn!("Could not open a browser ({}); visit this URL to continue: {}", e, auth_url);
        }

        let code = listener
            .wait_for_code(csrf.secret().clone(), self.callback_timeout)
            .await?;
        let tokens = self
            .endpoint
            .exchange_code(AuthorizationCode::new(code), verifier, &redirect_uri)
            .await?;
        if tokens.refresh_token.is_none() {
            warn!("Token response carried no refresh_token; the session ends when the access token expires");
        }
        self.session.store_tokens(tokens).await?;
        info!("Google sign-in completed");
        Ok(())
    }

    /// Delete the local credential and revoke its refresh token (best effort).
    pub async fn sign_out(&self) -> Result<(), NexusError> {
        let previous = self.session.sign_out().await?;
        if let Some(refresh_token) = previous.and_then(|t| t.refresh_token) {
            match self.endpoint.revoke(&refresh_token).await {
                Ok(()) => info!("Refresh token revoked"),
                Err(e) => warn!("Token revocation failed (ignored): {}", e),
            }
        }
        Ok(())
    }

    pub async fn access_token(&self) -> Result<Option<String>, NexusError> {
        self.session.access_token().await
    }
}
