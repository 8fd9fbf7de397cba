//! Append-only storage for timestamped run output, keyed by run id.
//!
//! Two implementations: [`LokiStore`] pushes to a Grafana Loki instance
//! over HTTP, [`MemoryStore`] keeps lines in process for tests and
//! single-node dev mode.

mod loki;
mod memory;

pub use loki::LokiStore;
pub use memory::MemoryStore;

use rt_domain::error::Result;
use rt_protocol::LineRecord;
use uuid::Uuid;

/// The durable log store contract.
///
/// Delivery is at-least-once: a retried `append` whose first attempt
/// partially succeeded may persist duplicate lines. Readers tolerate
/// duplicates; lines for a run are never rewritten.
#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    /// Append a batch of lines for a run. `user_id` and `project` become
    /// store labels alongside the run id; content stays opaque.
    async fn append(
        &self,
        run_id: Uuid,
        user_id: Uuid,
        project: &str,
        lines: &[LineRecord],
    ) -> Result<()>;

    /// All lines for a run, ordered by timestamp ascending. Results are
    /// bounded by the store's configured query limit.
    async fn query(&self, run_id: Uuid) -> Result<Vec<LineRecord>>;
}
