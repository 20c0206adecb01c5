use crate::config::GoogleConfig;
use crate::error::{IsRetryable, NexusError};
use crate::google_oauth::tokens::{TokenSet, now_ms};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken, RevocationUrl, Scope,
    StandardRevocableToken, TokenUrl, basic::BasicClient,
};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

/// The OAuth provider as seen by the session: authorization URL, code
/// exchange, refresh and revocation.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Authorization URL (with PKCE challenge and a fresh anti-forgery state)
    /// for a flow redirecting to `redirect_uri`.
    fn authorize_url(
        &self,
        redirect_uri: &str,
        challenge: PkceCodeChallenge,
    ) -> Result<(String, CsrfToken), NexusError>;

    async fn exchange_code(
        &self,
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
        redirect_uri: &str,
    ) -> Result<TokenSet, NexusError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, NexusError>;

    async fn revoke(&self, refresh_token: &str) -> Result<(), NexusError>;
}

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Google OAuth endpoints.
pub struct GoogleOauthEndpoints {
    config: GoogleConfig,
    http: reqwest::Client,
}

impl GoogleOauthEndpoints {
    /// `http` must not follow redirects.
    pub fn new(config: GoogleConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn build_oauth2_client(
        &self,
        redirect_uri: Option<&str>,
    ) -> Result<GoogleOauth2Client, NexusError> {
        let mut client = BasicClient::new(ClientId::new(self.config.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.config.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(self.config.auth_url.clone())?)
            .set_token_uri(TokenUrl::new(self.config.token_url.clone())?)
            .set_revocation_url(RevocationUrl::new(self.config.revoke_url.clone())?);
        if let Some(redirect_uri) = redirect_uri {
            client = client.set_redirect_uri(RedirectUrl::new(redirect_uri.to_string())?);
        }
        Ok(client)
    }
}

#[async_trait]
impl TokenEndpoint for GoogleOauthEndpoints {
    fn authorize_url(
        &self,
        redirect_uri: &str,
        challenge: PkceCodeChallenge,
    ) -> Result<(String, CsrfToken), NexusError> {
        let client = self.build_oauth2_client(Some(redirect_uri))?;
        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(challenge)
            // offline + consent so Google reliably hands out a refresh token
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");
        for scope in &self.config.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        let (url, csrf) = request.url();
        Ok((url.to_string(), csrf))
    }

    async fn exchange_code(
        &self,
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
        redirect_uri: &str,
    ) -> Result<TokenSet, NexusError> {
        let client = self.build_oauth2_client(Some(redirect_uri))?;
        let response = client
            .exchange_code(code)
            .set_pkce_verifier(verifier)
            .request_async(&self.http)
            .await?;
        let payload: Value = serde_json::to_value(&response)?;
        info!("Authorization code exchanged successfully");
        TokenSet::from_payload(&payload, now_ms())
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, NexusError> {
        let client = self.build_oauth2_client(None)?;
        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let response = (|| async {
            let response = client
                .exchange_refresh_token(&refresh_token)
                .request_async(&self.http)
                .await?;
            Ok::<_, NexusError>(response)
        })
        .retry(default_retry_policy())
        .when(|e: &NexusError| e.is_retryable())
        .notify(|err, dur: Duration| {
            error!(
                "Google Oauth2 Retrying Error {} with sleeping {:?}",
                err.to_string(),
                dur
            );
        })
        .await?;
        let payload: Value = serde_json::to_value(&response)?;
        info!("Access token refreshed successfully");
        TokenSet::from_payload(&payload, now_ms())
    }

    async fn revoke(&self, refresh_token: &str) -> Result<(), NexusError> {
        let client = self.build_oauth2_client(None)?;
        let token = StandardRevocableToken::RefreshToken(RefreshToken::new(refresh_token.to_string()));
        client
            .revoke_token(token)
            .map_err(|e| NexusError::Oauth2Token(e.to_string()))?
            .request_async(&self.http)
            .await
            .map_err(|e| NexusError::Oauth2Token(e.to_string()))?;
        Ok(())
    }
}

type GoogleOauth2Client =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointSet, EndpointSet>;
