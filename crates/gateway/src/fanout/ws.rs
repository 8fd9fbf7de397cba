//! WebSocket transport for fan-out subscribers.
//!
//! One subscriber endpoint per run id. After authorization the protocol
//! is one-way server→client: a snapshot of the stored log, then the live
//! tail. Ping/pong stays at the WebSocket layer.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use rt_domain::error::Error;
use rt_protocol::BusEvent;

use crate::auth;
use crate::fanout::snapshot_events;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Token fallback for browser clients.
    pub token: Option<String>,
}

/// GET /v1/runs/:run_id/stream — authorize, then upgrade.
///
/// The subscriber must own the project the run belongs to; anything else
/// is `403` without touching the log store.
pub async fn run_stream_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_id = match auth::authenticate(&state.store, &headers, query.token.as_deref()) {
        Ok(user_id) => user_id,
        Err(_) => {
            return (StatusCode::UNAUTHORIZED, "invalid or missing API token").into_response()
        }
    };

    match state.store.run_owner(run_id) {
        Ok(owner) if owner == user_id => {}
        Ok(_) => return (StatusCode::FORBIDDEN, "not your run").into_response(),
        Err(Error::NotFound(_)) => {
            return (StatusCode::NOT_FOUND, "run not found").into_response()
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "authorization lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "metadata store error").into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_subscriber(socket, state, run_id))
        .into_response()
}

async fn handle_subscriber(socket: WebSocket, state: AppState, run_id: Uuid) {
    let (mut sink, mut stream) = socket.split();

    // Register before the snapshot: events arriving while the snapshot
    // streams are queued and delivered afterwards. No gap, possible
    // overlap — the documented reconnect semantics.
    let (subscriber_id, mut queue) = state.hub.register(run_id);
    tracing::info!(run_id = %run_id, subscriber_id, "subscriber attached");

    let snapshot = match snapshot_events(state.logstore.as_ref(), run_id).await {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(run_id = %run_id, error = %e, "snapshot query failed");
            state.hub.unregister(run_id, subscriber_id);
            return;
        }
    };

    let mut delivered = true;
    for event in &snapshot {
        if send_event(&mut sink, event).await.is_err() {
            delivered = false;
            break;
        }
    }

    if delivered {
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                event = queue.recv() => match event {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    // Queue closed: the hub dropped us as a slow consumer.
                    None => break,
                },
                inbound = stream.next() => match inbound {
                    // One-way protocol: inbound text is ignored.
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    state.hub.unregister(run_id, subscriber_id);
    tracing::info!(run_id = %run_id, subscriber_id, "subscriber detached");
    let _ = sink.close().await;
}

async fn send_event(
    sink: &mut (impl SinkExt<Message> + Unpin),
    event: &BusEvent,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
