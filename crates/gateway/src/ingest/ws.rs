//! WebSocket transport for the ingestion protocol.
//!
//! Flow:
//! 1. Client connects to `GET /v1/ingest/ws` with its API token in the
//!    `authorization` header (`?token=` fallback).
//! 2. Client sends the `metadata` frame; the gateway replies `started`
//!    with the new run id.
//! 3. `line` frames stream in; the session batches them to the log store
//!    and republishes each on the bus.
//! 4. A `completion` frame closes the stream cleanly; a disconnect
//!    without one aborts the run.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use rt_protocol::{ClientFrame, ServerFrame};

use crate::auth;
use crate::ingest::session::{FrameOutcome, IngestSession};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct IngestQuery {
    /// Token fallback for clients that cannot set headers.
    pub token: Option<String>,
}

/// GET /v1/ingest/ws — authenticate, then upgrade.
pub async fn ingest_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<IngestQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user_id = match auth::authenticate(&state.store, &headers, query.token.as_deref()) {
        Ok(user_id) => user_id,
        Err(_) => {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "invalid or missing API token",
            )
                .into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: uuid::Uuid) {
    let (mut sink, mut stream) = socket.split();

    let mut session = IngestSession::new(
        state.store.clone(),
        state.logstore.clone(),
        state.bus.clone(),
        state.config.ingest.clone(),
        user_id,
    );

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(
        state.config.ingest.batch_interval_ms,
    ));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                session.close_disconnected().await;
                break;
            }
            // Interval flush: lines reach the log store within one batch
            // window even on a quiet stream.
            _ = ticker.tick() => session.flush().await,
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientFrame>(&text) {
                        Ok(frame) => match session.handle_frame(frame).await {
                            Ok(FrameOutcome::Reply(reply)) => {
                                if send_frame(&mut sink, &reply).await.is_err() {
                                    session.close_disconnected().await;
                                    break;
                                }
                            }
                            Ok(FrameOutcome::Continue) => {}
                            Ok(FrameOutcome::Completed) => break,
                            Err(e) => {
                                tracing::warn!(
                                    user_id = %user_id,
                                    run_id = ?session.run_id(),
                                    error = %e,
                                    "ingest stream rejected"
                                );
                                let _ = send_frame(
                                    &mut sink,
                                    &ServerFrame::Error { message: e.to_string() },
                                )
                                .await;
                                session.close_disconnected().await;
                                break;
                            }
                        },
                        Err(e) => {
                            let _ = send_frame(
                                &mut sink,
                                &ServerFrame::Error {
                                    message: format!("malformed frame: {e}"),
                                },
                            )
                            .await;
                            session.close_disconnected().await;
                            break;
                        }
                    }
                }
                // WS-level ping/pong is handled by axum; binary frames
                // are not part of the protocol.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    session.close_disconnected().await;
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(user_id = %user_id, error = %e, "ingest transport error");
                    session.close_disconnected().await;
                    break;
                }
            },
        }
    }

    let _ = sink.close().await;
}

async fn send_frame(
    sink: &mut (impl SinkExt<Message> + Unpin),
    frame: &ServerFrame,
) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}
