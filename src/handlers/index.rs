use crate::db::IndexState;
use crate::middleware::RequireKeyAuth;
use crate::{NexusError, router::NexusState};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

/// GET /index/state -> the persisted indexer state.
pub async fn index_state(
    _auth: RequireKeyAuth,
    State(state): State<NexusState>,
) -> Result<Json<IndexState>, NexusError> {
    Ok(Json(state.nexus.index_state().await?))
}

/// POST /index/start -> start or resume the crawl in the background.
pub async fn start_indexing(
    _auth: RequireKeyAuth,
    State(state): State<NexusState>,
) -> Result<(StatusCode, Json<IndexState>), NexusError> {
    let started = state.nexus.start_indexing().await?;
    let status = if started {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(state.nexus.index_state().await?)))
}

/// POST /index/stop -> ask the crawl to pause at the next page boundary.
pub async fn stop_indexing(_auth: RequireKeyAuth, State(state): State<NexusState>) -> StatusCode {
    state.nexus.stop_indexing();
    StatusCode::ACCEPTED
}

/// GET /index/events -> server-sent index events until the client goes away.
pub async fn index_events(
    _auth: RequireKeyAuth,
    State(state): State<NexusState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.nexus.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|message| match message {
        Ok(event) => match Event::default().event(event.name()).json_data(&event) {
            Ok(sse) => Some(Ok(sse)),
            Err(e) => {
                warn!("failed to encode index event: {}", e);
                None
            }
        },
        // Lagged receivers skip what they missed.
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
