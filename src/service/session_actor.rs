use crate::error::NexusError;
use crate::google_oauth::endpoints::TokenEndpoint;
use crate::google_oauth::tokens::{TokenSet, now_ms};
use crate::service::credential_store::CredentialStore;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Anything that can hand out a bearer token for Drive calls.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// `None` when there is no usable credential.
    async fn access_token(&self) -> Result<Option<String>, NexusError>;

    /// The last token was rejected upstream; refresh before the next use.
    fn invalidate(&self);
}

/// Messages handled by the session actor.
#[derive(Debug)]
pub enum SessionMessage {
    /// Valid access token, refreshing first when needed. Concurrent requests
    /// during a refresh wait on that single refresh.
    GetAccessToken(RpcReplyPort<Option<String>>),
    /// Force a refresh on next use.
    Invalidate,
    /// Install a freshly issued token set and persist it.
    StoreTokens(TokenSet, RpcReplyPort<Result<(), NexusError>>),
    /// Drop the credential; replies with what was stored so it can be revoked.
    SignOut(RpcReplyPort<Option<TokenSet>>),
    HasCredential(RpcReplyPort<bool>),

    // Internal messages (sent by the actor itself)
    RefreshComplete {
        generation: u64,
        result: Result<TokenSet, NexusError>,
    },
}

/// Handle for interacting with the session actor.
#[derive(Clone)]
pub struct SessionHandle {
    actor: ActorRef<SessionMessage>,
}

impl SessionHandle {
    pub async fn store_tokens(&self, tokens: TokenSet) -> Result<(), NexusError> {
        ractor::call!(self.actor, SessionMessage::StoreTokens, tokens)
            .map_err(|e| NexusError::RactorError(format!("StoreTokens RPC failed: {e}")))?
    }

    pub async fn sign_out(&self) -> Result<Option<TokenSet>, NexusError> {
        ractor::call!(self.actor, SessionMessage::SignOut)
            .map_err(|e| NexusError::RactorError(format!("SignOut RPC failed: {e}")))
    }

    pub async fn has_credential(&self) -> Result<bool, NexusError> {
        ractor::call!(self.actor, SessionMessage::HasCredential)
            .map_err(|e| NexusError::RactorError(format!("HasCredential RPC failed: {e}")))
    }

    pub fn stop(&self) {
        self.actor.stop(None);
    }
}

#[async_trait]
impl AccessTokenSource for SessionHandle {
    async fn access_token(&self) -> Result<Option<String>, NexusError> {
        ractor::call!(self.actor, SessionMessage::GetAccessToken)
            .map_err(|e| NexusError::RactorError(format!("GetAccessToken RPC failed: {e}")))
    }

    fn invalidate(&self) {
        let _ = ractor::cast!(self.actor, SessionMessage::Invalidate);
    }
}

struct SessionState {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    tokens: Option<TokenSet>,
    refreshing: bool,
    waiters: Vec<RpcReplyPort<Option<String>>>,
    /// Bumped whenever the credential is replaced, so a refresh started for an
    /// older credential cannot overwrite a newer one.
    generation: u64,
}

impl SessionState {
    fn answer_waiters(&mut self, token: Option<String>) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(token.clone());
        }
    }

    async fn purge(&mut self) {
        self.tokens = None;
        self.generation += 1;
        if let Err(e) = self.store.delete().await {
            warn!("Failed to delete stored credential: {}", e);
        }
    }
}

struct SessionActor;

#[ractor::async_trait]
impl Actor for SessionActor {
    type Msg = SessionMessage;
    type State = SessionState;
    type Arguments = (Arc<dyn CredentialStore>, Arc<dyn TokenEndpoint>);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        (store, endpoint): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let tokens = match store.load().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("Failed to load stored credential, starting signed out: {}", e);
                None
            }
        };
        info!(signed_in = tokens.is_some(), "SessionActor started");
        Ok(SessionState {
            store,
            endpoint,
            tokens,
            refreshing: false,
            waiters: Vec::new(),
            generation: 0,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SessionMessage::GetAccessToken(reply) => {
                self.handle_get_access_token(state, &myself, reply).await;
            }
            SessionMessage::Invalidate => {
                if let Some(tokens) = state.tokens.as_mut() {
                    debug!("Access token invalidated; next use refreshes");
                    tokens.expires_at = Some(0);
                }
            }
            SessionMessage::StoreTokens(tokens, reply) => {
                let saved = state.store.save(&tokens).await;
                if saved.is_ok() {
                    state.generation += 1;
                    state.refreshing = false;
                    let access = tokens.access_token.clone();
                    state.tokens = Some(tokens);
                    state.answer_waiters(Some(access));
                    info!("Credential stored");
                }
                let _ = reply.send(saved);
            }
            SessionMessage::SignOut(reply) => {
                let previous = state.tokens.take();
                state.purge().await;
                state.refreshing = false;
                state.answer_waiters(None);
                info!("Credential removed");
                let _ = reply.send(previous);
            }
            SessionMessage::HasCredential(reply) => {
                let _ = reply.send(state.tokens.is_some());
            }
            SessionMessage::RefreshComplete { generation, result } => {
                if generation != state.generation {
                    debug!("Discarding refresh result for a replaced credential");
                    return Ok(());
                }
                state.refreshing = false;
                self.handle_refresh_complete(state, result).await;
            }
        }
        Ok(())
    }
}

impl SessionActor {
    async fn handle_get_access_token(
        &self,
        state: &mut SessionState,
        myself: &ActorRef<SessionMessage>,
        reply: RpcReplyPort<Option<String>>,
    ) {
        let Some(tokens) = state.tokens.as_ref() else {
            let _ = reply.send(None);
            return;
        };
        if !tokens.needs_refresh(now_ms()) {
            let _ = reply.send(Some(tokens.access_token.clone()));
            return;
        }

        state.waiters.push(reply);
        if state.refreshing {
            debug!(waiters = state.waiters.len(), "Refresh in flight; queued");
            return;
        }

        let Some(refresh_token) = tokens.refresh_token.clone() else {
            warn!("Access token expired and no refresh token is stored; sign-in required");
            state.purge().await;
            state.answer_waiters(None);
            return;
        };

        state.refreshing = true;
        let generation = state.generation;
        let endpoint = state.endpoint.clone();
        let me = myself.clone();
        tokio::spawn(async move {
            let result = endpoint.refresh(&refresh_token).await;
            let _ = ractor::cast!(me, SessionMessage::RefreshComplete { generation, result });
        });
        debug!("Access token refresh started");
    }

    async fn handle_refresh_complete(
        &self,
        state: &mut SessionState,
        result: Result<TokenSet, NexusError>,
    ) {
        match result {
            Ok(refreshed) => {
                let Some(current) = state.tokens.as_ref() else {
                    state.answer_waiters(None);
                    return;
                };
                let merged = current.merge_refreshed(refreshed);
                if let Err(e) = state.store.save(&merged).await {
                    warn!("Persisting refreshed credential failed: {}", e);
                }
                let access = merged.access_token.clone();
                state.tokens = Some(merged);
                state.answer_waiters(Some(access));
            }
            Err(e) if e.is_invalid_grant() => {
                error!("Refresh token revoked; removing credential: {}", e);
                state.purge().await;
                state.answer_waiters(None);
            }
            Err(e) => {
                warn!(
                    "Refresh failed (transient): {}. Keeping credential for a later retry.",
                    e
                );
                state.answer_waiters(None);
            }
        }
    }
}

/// Spawn the session actor with the credential loaded from `store`.
pub async fn spawn(
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
) -> Result<SessionHandle, NexusError> {
    let (actor, _jh) = Actor::spawn(None, SessionActor, (store, endpoint))
        .await
        .map_err(|e| NexusError::RactorError(format!("failed to spawn SessionActor: {e}")))?;
    Ok(SessionHandle { actor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::credential_store::MemoryCredentialStore;
    use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingEndpoint {
        refreshes: AtomicUsize,
        fail_with: Option<String>,
    }

    impl CountingEndpoint {
        fn ok() -> Self {
            Self {
                refreshes: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        fn failing(error: &str) -> Self {
            Self {
                refreshes: AtomicUsize::new(0),
                fail_with: Some(error.to_string()),
            }
        }
    }

    #[async_trait]
    impl TokenEndpoint for CountingEndpoint {
        fn authorize_url(
            &self,
            _redirect_uri: &str,
            _challenge: PkceCodeChallenge,
        ) -> Result<(String, CsrfToken), NexusError> {
            Ok(("http://example.invalid".into(), CsrfToken::new("s".into())))
        }

        async fn exchange_code(
            &self,
            _code: AuthorizationCode,
            _verifier: PkceCodeVerifier,
            _redirect_uri: &str,
        ) -> Result<TokenSet, NexusError> {
            Err(NexusError::Oauth2Token("unused".into()))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, NexusError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(50)).await;
            match &self.fail_with {
                Some(error) => Err(NexusError::Oauth2Server {
                    error: error.clone(),
                }),
                None => Ok(TokenSet {
                    access_token: format!("fresh-{n}"),
                    refresh_token: None,
                    expires_at: Some(now_ms() + 3_600_000),
                    token_type: Some("Bearer".into()),
                }),
            }
        }

        async fn revoke(&self, _refresh_token: &str) -> Result<(), NexusError> {
            Ok(())
        }
    }

    fn expired_tokens() -> TokenSet {
        TokenSet {
            access_token: "stale".into(),
            refresh_token: Some("rt".into()),
            expires_at: Some(now_ms() - 1_000),
            token_type: Some("Bearer".into()),
        }
    }

    #[tokio::test]
    async fn no_credential_yields_none() {
        let store = Arc::new(MemoryCredentialStore::default());
        let session = spawn(store, Arc::new(CountingEndpoint::ok())).await.unwrap();
        assert_eq!(session.access_token().await.unwrap(), None);
        assert!(!session.has_credential().await.unwrap());
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let tokens = TokenSet {
            expires_at: Some(now_ms() + 3_600_000),
            ..expired_tokens()
        };
        let endpoint = Arc::new(CountingEndpoint::ok());
        let store = Arc::new(MemoryCredentialStore::with_tokens(tokens));
        let session = spawn(store, endpoint.clone()).await.unwrap();

        assert_eq!(session.access_token().await.unwrap().as_deref(), Some("stale"));
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_refresh() {
        let endpoint = Arc::new(CountingEndpoint::ok());
        let store = Arc::new(MemoryCredentialStore::with_tokens(expired_tokens()));
        let session = spawn(store.clone(), endpoint.clone()).await.unwrap();

        let calls = (0..8).map(|_| {
            let session = session.clone();
            async move { session.access_token().await.unwrap() }
        });
        let tokens = futures::future::join_all(calls).await;

        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| t.as_deref() == Some("fresh-1")));

        let persisted = store.load().await.unwrap().unwrap();
        assert_eq!(persisted.access_token, "fresh-1");
        assert_eq!(persisted.refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    async fn invalid_grant_purges_credential() {
        let endpoint = Arc::new(CountingEndpoint::failing("invalid_grant"));
        let store = Arc::new(MemoryCredentialStore::with_tokens(expired_tokens()));
        let session = spawn(store.clone(), endpoint).await.unwrap();

        assert_eq!(session.access_token().await.unwrap(), None);
        assert!(store.load().await.unwrap().is_none());
        assert!(!session.has_credential().await.unwrap());
    }

    #[tokio::test]
    async fn expired_token_without_refresh_token_is_purged() {
        let tokens = TokenSet {
            refresh_token: None,
            ..expired_tokens()
        };
        let endpoint = Arc::new(CountingEndpoint::ok());
        let store = Arc::new(MemoryCredentialStore::with_tokens(tokens));
        let session = spawn(store.clone(), endpoint.clone()).await.unwrap();

        assert_eq!(session.access_token().await.unwrap(), None);
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 0);
        assert!(store.load().await.unwrap().is_none());
        assert!(!session.has_credential().await.unwrap());
    }

    #[tokio::test]
    async fn other_refresh_failures_keep_credential() {
        let endpoint = Arc::new(CountingEndpoint::failing("temporarily_unavailable"));
        let store = Arc::new(MemoryCredentialStore::with_tokens(expired_tokens()));
        let session = spawn(store.clone(), endpoint.clone()).await.unwrap();

        assert_eq!(session.access_token().await.unwrap(), None);
        assert!(store.load().await.unwrap().is_some());

        // The next call tries again.
        assert_eq!(session.access_token().await.unwrap(), None);
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let tokens = TokenSet {
            expires_at: Some(now_ms() + 3_600_000),
            ..expired_tokens()
        };
        let endpoint = Arc::new(CountingEndpoint::ok());
        let store = Arc::new(MemoryCredentialStore::with_tokens(tokens));
        let session = spawn(store, endpoint.clone()).await.unwrap();

        session.invalidate();
        assert_eq!(session.access_token().await.unwrap().as_deref(), Some("fresh-1"));
        assert_eq!(endpoint.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sign_out_returns_previous_tokens_and_clears_store() {
        let store = Arc::new(MemoryCredentialStore::with_tokens(expired_tokens()));
        let session = spawn(store.clone(), Arc::new(CountingEndpoint::ok()))
            .await
            .unwrap();

        let previous = session.sign_out().await.unwrap();
        assert_eq!(previous.and_then(|t| t.refresh_token).as_deref(), Some("rt"));
        assert!(store.load().await.unwrap().is_none());
        assert_eq!(session.access_token().await.unwrap(), None);
    }
}
