//! Process-wide pub/sub for live events plus a durable FIFO for analysis
//! jobs.
//!
//! Two concerns share one transport: fire-and-forget live events (log
//! lines, run updates) that late subscribers are allowed to miss, and the
//! analysis task queue, which must survive a restart once a job has been
//! accepted.

mod memory;

pub use memory::InProcessBus;

use std::time::Duration;

use tokio::sync::broadcast;

use rt_domain::error::Result;
use rt_protocol::{AnalysisResult, AnalysisTask, BusEvent};

/// The event bus contract.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a live event. Fire-and-forget: no delivery guarantee, no
    /// persistence; absent subscribers simply miss it.
    fn publish_event(&self, event: BusEvent);

    /// Subscribe to the live event channel from this point forward.
    fn subscribe_events(&self) -> broadcast::Receiver<BusEvent>;

    /// Enqueue an analysis job. Durable: the job survives a restart.
    async fn enqueue_task(&self, task: AnalysisTask) -> Result<()>;

    /// Blocking-poll the task queue. Returns `None` when `timeout`
    /// elapses with the queue empty (BRPOP semantics).
    async fn dequeue_task(&self, timeout: Duration) -> Result<Option<AnalysisTask>>;

    /// Publish an analysis outcome notification.
    fn publish_result(&self, result: AnalysisResult);

    /// Subscribe to analysis outcome notifications.
    fn subscribe_results(&self) -> broadcast::Receiver<AnalysisResult>;

    /// Number of tasks currently queued.
    fn queue_length(&self) -> usize;
}
