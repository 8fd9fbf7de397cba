//! Per-stream ingestion state machine, decoupled from the socket.
//!
//! ```text
//!   INIT ──recv Metadata──► OPEN ──recv Line──► OPEN
//!                               ──recv Completion──► DONE (clean close)
//!                               ──disconnect──► DONE (run aborted)
//!   INIT ──first frame not Metadata──► reject, close
//! ```
//!
//! Lines are buffered and flushed to the log store when the buffer holds
//! `batch_size` lines or the transport driver's interval ticker fires,
//! whichever happens first. Each line is additionally published on the
//! bus as it arrives so live subscribers see sub-batch latency.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use rt_bus::EventBus;
use rt_domain::config::IngestConfig;
use rt_domain::error::{Error, Result};
use rt_domain::run::{AiStatus, RunStatus};
use rt_logstore::LogStore;
use rt_protocol::{AnalysisTask, BusEvent, ClientFrame, LineRecord, ServerFrame};
use rt_store::MetadataStore;

const DEFAULT_NAME: &str = "default";

/// Delay between append attempts within one batch window.
const APPEND_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Open,
    Done,
}

/// What the transport driver should do after a frame was handled.
#[derive(Debug)]
pub enum FrameOutcome {
    /// Send this reply, keep the stream open.
    Reply(ServerFrame),
    /// Keep the stream open.
    Continue,
    /// The stream completed cleanly; close it.
    Completed,
}

/// Run context established by the metadata frame.
struct OpenRun {
    run_id: Uuid,
    project_name: String,
    /// The run was created `ai_status = pending`; enqueue analysis on
    /// clean completion.
    analyze_on_completion: bool,
}

pub struct IngestSession {
    store: Arc<MetadataStore>,
    logstore: Arc<dyn LogStore>,
    bus: Arc<dyn EventBus>,
    cfg: IngestConfig,
    user_id: Uuid,
    phase: Phase,
    open: Option<OpenRun>,
    buffer: Vec<LineRecord>,
    /// Set when a batch was dropped after retry exhaustion. A degraded
    /// stream finalizes as `aborted`: the captured log is incomplete, so
    /// the run must not claim a clean terminal state.
    degraded: bool,
}

impl IngestSession {
    pub fn new(
        store: Arc<MetadataStore>,
        logstore: Arc<dyn LogStore>,
        bus: Arc<dyn EventBus>,
        cfg: IngestConfig,
        user_id: Uuid,
    ) -> Self {
        Self {
            store,
            logstore,
            bus,
            cfg,
            user_id,
            phase: Phase::Init,
            open: None,
            buffer: Vec::new(),
            degraded: false,
        }
    }

    /// The run this stream materialized, once open.
    pub fn run_id(&self) -> Option<Uuid> {
        self.open.as_ref().map(|o| o.run_id)
    }

    pub async fn handle_frame(&mut self, frame: ClientFrame) -> Result<FrameOutcome> {
        match (self.phase, frame) {
            (Phase::Init, ClientFrame::Metadata { project_name, group_name }) => {
                let reply = self.open_run(project_name, group_name)?;
                Ok(FrameOutcome::Reply(reply))
            }
            (Phase::Init, _) => Err(Error::Protocol(
                "first frame must be metadata".into(),
            )),
            (Phase::Open, ClientFrame::Metadata { .. }) => Err(Error::Protocol(
                "duplicate metadata frame".into(),
            )),
            (Phase::Open, ClientFrame::Line { timestamp, level, content }) => {
                let record = LineRecord { timestamp, level, content };
                // Live subscribers see the line immediately; durability
                // follows with the batch flush.
                if let Some(open) = &self.open {
                    self.bus.publish_event(BusEvent::line(open.run_id, &record));
                }
                self.buffer.push(record);
                if self.buffer.len() >= self.cfg.batch_size {
                    self.flush().await;
                }
                Ok(FrameOutcome::Continue)
            }
            (Phase::Open, ClientFrame::Completion { exit_code }) => {
                rt_domain::validate::validate_exit_code(exit_code)?;
                self.complete(exit_code).await?;
                Ok(FrameOutcome::Completed)
            }
            // At most one completion is honored; later frames are
            // discarded.
            (Phase::Done, _) => Ok(FrameOutcome::Continue),
        }
    }

    /// Materialize the run for an opening metadata frame.
    fn open_run(
        &mut self,
        project_name: Option<String>,
        group_name: Option<String>,
    ) -> Result<ServerFrame> {
        let project_name = project_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME.into());
        let group_name = group_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_NAME.into());

        let project = self
            .store
            .get_or_create_project(self.user_id, &project_name)?;
        let group = self.store.get_or_create_group(project.id, &group_name)?;

        let settings = self
            .store
            .resolve_effective_settings(self.user_id, project.id)?;
        let initial_ai_status = if settings.ai_enabled && settings.ai_auto_analyze {
            AiStatus::Pending
        } else {
            AiStatus::None
        };

        let run = self.store.create_run(group.id, initial_ai_status)?;
        tracing::info!(
            run_id = %run.id,
            user_id = %self.user_id,
            project = %project_name,
            group = %group_name,
            ai_status = %initial_ai_status.as_str(),
            "run started"
        );

        self.open = Some(OpenRun {
            run_id: run.id,
            project_name,
            analyze_on_completion: initial_ai_status == AiStatus::Pending,
        });
        self.phase = Phase::Open;
        Ok(ServerFrame::Started { run_id: run.id })
    }

    /// Flush the buffer to the log store, retrying within the batch
    /// window. On exhaustion the batch is dropped with a warning and the
    /// stream degrades.
    pub async fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let Some(open) = &self.open else {
            return;
        };

        let attempts = self.cfg.append_retries.max(1);
        for attempt in 1..=attempts {
            match self
                .logstore
                .append(open.run_id, self.user_id, &open.project_name, &self.buffer)
                .await
            {
                Ok(()) => {
                    tracing::debug!(
                        run_id = %open.run_id,
                        lines = self.buffer.len(),
                        "batch flushed"
                    );
                    self.buffer.clear();
                    return;
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        run_id = %open.run_id,
                        attempt,
                        error = %e,
                        "batch append failed, retrying"
                    );
                    tokio::time::sleep(APPEND_RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::warn!(
                        run_id = %open.run_id,
                        lines = self.buffer.len(),
                        error = %e,
                        "batch append retries exhausted, dropping batch"
                    );
                    self.buffer.clear();
                    self.degraded = true;
                }
            }
        }
    }

    /// Clean completion: final flush, finalize, enqueue analysis,
    /// announce. A degraded stream finalizes as `aborted` instead — its
    /// log is known-incomplete.
    async fn complete(&mut self, exit_code: i32) -> Result<()> {
        self.flush().await;
        self.phase = Phase::Done;

        let Some(open) = &self.open else {
            return Ok(());
        };

        if self.degraded {
            tracing::warn!(
                run_id = %open.run_id,
                "stream degraded by dropped batches, finalizing as aborted"
            );
            let run = self
                .store
                .finalize_run(open.run_id, RunStatus::Aborted, None)?;
            self.bus.publish_event(BusEvent::RunUpdate {
                run_id: open.run_id,
                status: Some(run.status),
                exit_code: None,
                ai_status: None,
                ai_report: None,
            });
            return Ok(());
        }

        let status = RunStatus::from_exit_code(exit_code);
        let run = self
            .store
            .finalize_run(open.run_id, status, Some(exit_code))?;
        tracing::info!(
            run_id = %open.run_id,
            status = %run.status.as_str(),
            exit_code,
            "run finished"
        );

        if open.analyze_on_completion {
            self.bus
                .enqueue_task(AnalysisTask {
                    run_id: open.run_id,
                    user_id: self.user_id,
                    enqueued_at: chrono::Utc::now(),
                })
                .await?;
        }

        self.bus.publish_event(BusEvent::RunUpdate {
            run_id: open.run_id,
            status: Some(run.status),
            exit_code: run.exit_code,
            ai_status: None,
            ai_report: None,
        });
        Ok(())
    }

    /// Transport-level close without a completion frame: best-effort
    /// final flush, then the run aborts. Idempotent; a no-op before the
    /// run exists or after a clean completion.
    pub async fn close_disconnected(&mut self) {
        if self.phase != Phase::Open {
            return;
        }
        self.flush().await;
        self.phase = Phase::Done;

        let Some(open) = &self.open else {
            return;
        };
        match self.store.finalize_run(open.run_id, RunStatus::Aborted, None) {
            Ok(run) => {
                tracing::info!(run_id = %open.run_id, "run aborted on disconnect");
                self.bus.publish_event(BusEvent::RunUpdate {
                    run_id: open.run_id,
                    status: Some(run.status),
                    exit_code: None,
                    ai_status: None,
                    ai_report: None,
                });
            }
            Err(e) => {
                tracing::error!(run_id = %open.run_id, error = %e, "abort finalize failed");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
