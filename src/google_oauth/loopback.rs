use crate::error::NexusError;
use axum::{
    Router,
    extract::{Query, State},
    response::Html,
    routing::get,
};
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, warn};

const CALLBACK_PATH: &str = "/callback";

const SUCCESS_PAGE: &str = "<!doctype html><html><body><h2>Signed in</h2>\
<p>You can close this window and return to the app.</p></body></html>";
const FAILURE_PAGE: &str = "<!doctype html><html><body><h2>Sign-in failed</h2>\
<p>Return to the app and try again.</p></body></html>";

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

type CallbackResult = Result<String, NexusError>;

struct CallbackState {
    expected_state: String,
    reply: Mutex<Option<oneshot::Sender<CallbackResult>>>,
}

impl CallbackState {
    fn verify(&self, query: CallbackQuery) -> CallbackResult {
        if let Some(error) = query.error {
            return Err(NexusError::AuthorizationDenied(error));
        }
        let state_matches = query.state.as_deref().is_some_and(|state| {
            bool::from(state.as_bytes().ct_eq(self.expected_state.as_bytes()))
        });
        if !state_matches {
            return Err(NexusError::AuthorizationDenied(
                "state mismatch in callback".to_string(),
            ));
        }
        query
            .code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| NexusError::AuthorizationDenied("missing `code` in callback".to_string()))
    }
}

/// One-shot HTTP listener on an ephemeral localhost port that receives the
/// OAuth redirect.
pub struct CallbackListener {
    listener: TcpListener,
    redirect_uri: String,
}

impl CallbackListener {
    pub async fn bind() -> Result<Self, NexusError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            redirect_uri: format!("http://127.0.0.1:{port}{CALLBACK_PATH}"),
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Serve until the first callback arrives and return its authorization
    /// code. Fails with `Timeout` when nothing arrives in time.
    pub async fn wait_for_code(
        self,
        expected_state: String,
        timeout: Duration,
    ) -> Result<String, NexusError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let state = Arc::new(CallbackState {
            expected_state,
            reply: Mutex::new(Some(reply_tx)),
        });
        let app = Router::new()
            .route(CALLBACK_PATH, get(oauth_callback))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(self.listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let outcome = tokio::time::timeout(timeout, reply_rx).await;

        let _ = shutdown_tx.send(());
        // Browsers hold keep-alive connections open; do not wait on them forever.
        if tokio::time::timeout(Duration::from_secs(2), &mut server)
            .await
            .is_err()
        {
            server.abort();
        }

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(NexusError::AuthorizationDenied(
                "callback listener closed".to_string(),
            )),
            Err(_) => Err(NexusError::Timeout(format!(
                "no authorization callback within {}s",
                timeout.as_secs()
            ))),
        }
    }
}

async fn oauth_callback(
    State(state): State<Arc<CallbackState>>,
    Query(query): Query<CallbackQuery>,
) -> Html<&'static str> {
    let result = state.verify(query);
    let page = match &result {
        Ok(_) => SUCCESS_PAGE,
        Err(e) => {
            warn!("OAuth callback rejected: {}", e);
            FAILURE_PAGE
        }
    };
    let sender = state.reply.lock().ok().and_then(|mut slot| slot.take());
    match sender {
        Some(tx) => {
            let _ = tx.send(result);
        }
        None => debug!("Ignoring repeated OAuth callback"),
    }
    Html(page)
}
