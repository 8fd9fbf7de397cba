//! Client SDK for the RunTrail gateway.
//!
//! [`IngestClient`] wraps the ingestion stream: open, send lines, finish
//! with an exit code. [`FollowClient`] attaches to a run's fan-out
//! stream and reconnects with capped exponential backoff, replaying the
//! snapshot on every attach.

mod follow;
mod ingest;
mod reconnect;

pub use follow::{Follow, FollowClient};
pub use ingest::{IngestClient, IngestClientBuilder, IngestStream};
pub use reconnect::ReconnectBackoff;
