//! Ingestion client — opens a stream, sends lines, finishes with an exit
//! code.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use rt_domain::error::{Error, Result};
use rt_protocol::{ClientFrame, LogLevel, ServerFrame};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const STARTED_TIMEOUT: Duration = Duration::from_secs(10);

/// A configured ingestion client. Create via [`IngestClient::builder`].
pub struct IngestClient {
    pub(crate) gateway_ws_url: String,
    pub(crate) token: String,
    pub(crate) project: Option<String>,
    pub(crate) group: Option<String>,
}

#[derive(Default)]
pub struct IngestClientBuilder {
    gateway_ws_url: Option<String>,
    token: Option<String>,
    project: Option<String>,
    group: Option<String>,
}

impl IngestClientBuilder {
    /// Gateway ingest endpoint, e.g. `ws://localhost:3710/v1/ingest/ws`.
    pub fn gateway_ws_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_ws_url = Some(url.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn build(self) -> Result<IngestClient> {
        Ok(IngestClient {
            gateway_ws_url: self
                .gateway_ws_url
                .ok_or_else(|| Error::Config("gateway_ws_url is required".into()))?,
            token: self
                .token
                .ok_or_else(|| Error::Config("token is required".into()))?,
            project: self.project,
            group: self.group,
        })
    }
}

impl IngestClient {
    pub fn builder() -> IngestClientBuilder {
        IngestClientBuilder::default()
    }

    /// Full connection URL with the token query fallback.
    fn build_url(&self) -> String {
        let base = &self.gateway_ws_url;
        let sep = if base.contains('?') { "&" } else { "?" };
        format!("{base}{sep}token={}", self.token)
    }

    /// Connect, send the metadata frame, and await `started`.
    pub async fn connect(&self) -> Result<IngestStream> {
        let url = self.build_url();
        tracing::info!(url = %self.gateway_ws_url, "connecting to gateway");

        let (mut socket, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let metadata = ClientFrame::Metadata {
            project_name: self.project.clone(),
            group_name: self.group.clone(),
        };
        send_frame(&mut socket, &metadata).await?;

        // First server frame must be `started` (or `error`).
        let run_id = tokio::time::timeout(STARTED_TIMEOUT, async {
            while let Some(msg) = socket.next().await {
                let msg = msg.map_err(|e| Error::Http(e.to_string()))?;
                if let Message::Text(text) = msg {
                    return match serde_json::from_str::<ServerFrame>(&text)? {
                        ServerFrame::Started { run_id } => Ok(run_id),
                        ServerFrame::Error { message } => Err(Error::Protocol(message)),
                    };
                }
            }
            Err(Error::Protocol("connection closed before started".into()))
        })
        .await
        .map_err(|_| Error::Timeout("no started reply".into()))??;

        tracing::info!(run_id = %run_id, "run started");
        Ok(IngestStream { socket, run_id })
    }
}

/// An open ingestion stream.
pub struct IngestStream {
    socket: Socket,
    run_id: Uuid,
}

impl IngestStream {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Send one line stamped with the current wall clock.
    pub async fn send_line(&mut self, level: LogLevel, content: &str) -> Result<()> {
        self.send_line_at(Utc::now(), level, content).await
    }

    /// Send one line with an explicit timestamp (the server never
    /// rewrites it).
    pub async fn send_line_at(
        &mut self,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        content: &str,
    ) -> Result<()> {
        send_frame(
            &mut self.socket,
            &ClientFrame::Line {
                timestamp,
                level,
                content: content.into(),
            },
        )
        .await
    }

    /// Send the completion frame and close the stream cleanly.
    pub async fn finish(mut self, exit_code: i32) -> Result<()> {
        send_frame(&mut self.socket, &ClientFrame::Completion { exit_code }).await?;
        let _ = self.socket.close(None).await;
        Ok(())
    }

    /// Close without a completion frame; the gateway aborts the run.
    pub async fn abort(mut self) {
        let _ = self.socket.close(None).await;
    }
}

async fn send_frame(socket: &mut Socket, frame: &ClientFrame) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| Error::Http(e.to_string()))
}
