//! Real-time fan-out of run events to subscribers.
//!
//! A single dispatcher task bridges the event bus into the [`hub`];
//! each subscriber WebSocket first replays a snapshot from the log store
//! and then forwards the live tail for its run.

pub mod hub;
pub mod ws;

use uuid::Uuid;

use rt_domain::error::Result;
use rt_logstore::LogStore;
use rt_protocol::BusEvent;

/// The point-in-time replay a subscriber receives on attach, rendered as
/// the same `log` events the live tail carries.
pub async fn snapshot_events(logstore: &dyn LogStore, run_id: Uuid) -> Result<Vec<BusEvent>> {
    let lines = logstore.query(run_id).await?;
    Ok(lines
        .iter()
        .map(|record| BusEvent::line(run_id, record))
        .collect())
}
