//! In-process bus implementation.
//!
//! Live events ride a `broadcast` channel; a lagging receiver observes
//! `Lagged` and keeps going. The task queue is a `VecDeque` guarded by a
//! mutex with a `Notify` for the blocking poll, snapshotted to
//! `tasks.json` (atomic tmp-rename) on every mutation so accepted jobs
//! survive a restart.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};

use rt_domain::error::{Error, Result};
use rt_protocol::{AnalysisResult, AnalysisTask, BusEvent};

use crate::EventBus;

pub struct InProcessBus {
    events: broadcast::Sender<BusEvent>,
    results: broadcast::Sender<AnalysisResult>,
    tasks: Mutex<VecDeque<AnalysisTask>>,
    task_added: Notify,
    /// Snapshot path; `None` disables durability (tests).
    queue_path: Option<PathBuf>,
}

impl InProcessBus {
    /// Create a bus whose task queue persists under `state_path`.
    /// Previously accepted tasks are reloaded from the snapshot.
    pub fn open(state_path: &Path, live_capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let queue_path = state_path.join("tasks.json");

        let pending: VecDeque<AnalysisTask> = if queue_path.exists() {
            let raw = std::fs::read_to_string(&queue_path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            VecDeque::new()
        };

        if !pending.is_empty() {
            tracing::info!(
                tasks = pending.len(),
                path = %queue_path.display(),
                "reloaded pending analysis tasks"
            );
        }

        Ok(Self {
            events: broadcast::channel(live_capacity).0,
            results: broadcast::channel(live_capacity).0,
            tasks: Mutex::new(pending),
            task_added: Notify::new(),
            queue_path: Some(queue_path),
        })
    }

    /// Ephemeral bus for tests.
    pub fn ephemeral() -> Self {
        Self {
            events: broadcast::channel(256).0,
            results: broadcast::channel(256).0,
            tasks: Mutex::new(VecDeque::new()),
            task_added: Notify::new(),
            queue_path: None,
        }
    }

    /// Snapshot the pending queue. Called with the lock held so the
    /// on-disk state never skips a mutation.
    fn persist(&self, tasks: &VecDeque<AnalysisTask>) -> Result<()> {
        let Some(path) = &self.queue_path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(tasks)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
            .map_err(|e| Error::Other(format!("persisting task queue: {e}")))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventBus for InProcessBus {
    fn publish_event(&self, event: BusEvent) {
        // Err means no live receivers; that is fine for fire-and-forget.
        let _ = self.events.send(event);
    }

    fn subscribe_events(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    async fn enqueue_task(&self, task: AnalysisTask) -> Result<()> {
        {
            let mut tasks = self.tasks.lock();
            tasks.push_back(task);
            self.persist(&tasks)?;
        }
        self.task_added.notify_one();
        Ok(())
    }

    async fn dequeue_task(&self, timeout: Duration) -> Result<Option<AnalysisTask>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut tasks = self.tasks.lock();
                if let Some(task) = tasks.pop_front() {
                    self.persist(&tasks)?;
                    return Ok(Some(task));
                }
            }

            // Wait for a push or the poll deadline, whichever first. The
            // loop re-checks the queue because another worker may win the
            // race for the notification.
            if tokio::time::timeout_at(deadline, self.task_added.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    fn publish_result(&self, result: AnalysisResult) {
        let _ = self.results.send(result);
    }

    fn subscribe_results(&self) -> broadcast::Receiver<AnalysisResult> {
        self.results.subscribe()
    }

    fn queue_length(&self) -> usize {
        self.tasks.lock().len()
    }
}
