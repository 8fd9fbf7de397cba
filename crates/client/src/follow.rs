//! Follow client — attaches to a run's fan-out stream and keeps the
//! attachment alive across disconnects.
//!
//! Every (re)attach repeats the gateway's snapshot-then-live flow, so a
//! handler may see lines twice after a reconnect; it never sees a gap.

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rt_domain::error::{Error, Result};
use rt_protocol::BusEvent;

use crate::reconnect::ReconnectBackoff;

/// Tell the follow loop what to do after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Follow {
    Continue,
    /// Detach and return cleanly (e.g. after a terminal run update).
    Stop,
}

pub struct FollowClient {
    /// Gateway base WS URL, e.g. `ws://localhost:3710`.
    gateway_ws_url: String,
    token: String,
    backoff: ReconnectBackoff,
}

impl FollowClient {
    pub fn new(gateway_ws_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            gateway_ws_url: gateway_ws_url.into(),
            token: token.into(),
            backoff: ReconnectBackoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: ReconnectBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    fn stream_url(&self, run_id: Uuid) -> String {
        format!(
            "{}/v1/runs/{run_id}/stream?token={}",
            self.gateway_ws_url.trim_end_matches('/'),
            self.token
        )
    }

    /// Follow a run until the handler stops, the token is cancelled, or
    /// the reconnect budget is exhausted.
    pub async fn follow<F>(
        &self,
        run_id: Uuid,
        shutdown: CancellationToken,
        mut handler: F,
    ) -> Result<()>
    where
        F: FnMut(BusEvent) -> Follow + Send,
    {
        let mut attempt: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let outcome = tokio::select! {
                r = self.attach_once(run_id, &mut handler) => r,
                _ = shutdown.cancelled() => return Ok(()),
            };

            match outcome {
                Ok(Follow::Stop) => return Ok(()),
                Ok(Follow::Continue) => {
                    // Server closed; reconnect from a clean attach.
                    attempt = 0;
                }
                Err(e) => {
                    tracing::warn!(run_id = %run_id, attempt, error = %e, "follow attach lost");
                }
            }

            if self.backoff.should_give_up(attempt) {
                return Err(Error::Http(format!(
                    "reconnect attempts exhausted after {attempt}"
                )));
            }

            let delay = self.backoff.delay_for_attempt(attempt);
            tracing::info!(
                run_id = %run_id,
                delay_ms = delay.as_millis() as u64,
                "reconnecting"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return Ok(()),
            }
            attempt += 1;
        }
    }

    /// One attach lifecycle: connect, forward events to the handler
    /// until it stops or the connection drops.
    async fn attach_once<F>(&self, run_id: Uuid, handler: &mut F) -> Result<Follow>
    where
        F: FnMut(BusEvent) -> Follow + Send,
    {
        let url = self.stream_url(run_id);
        let (mut socket, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        tracing::debug!(run_id = %run_id, "attached to run stream");

        while let Some(msg) = socket.next().await {
            match msg.map_err(|e| Error::Http(e.to_string()))? {
                Message::Text(text) => match serde_json::from_str::<BusEvent>(&text) {
                    Ok(event) => {
                        if handler(event) == Follow::Stop {
                            return Ok(Follow::Stop);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "ignoring unparseable message");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        Ok(Follow::Continue)
    }
}
