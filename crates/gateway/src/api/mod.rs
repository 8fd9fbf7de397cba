pub mod stats;

use axum::routing::get;
use axum::Router;

use crate::fanout;
use crate::ingest;
use crate::state::AppState;

/// Build the gateway router.
///
/// The two streaming endpoints authenticate per connection against the
/// metadata store; the operational routes are public.
pub fn router() -> Router<AppState> {
    Router::new()
        // Health probe (public, no auth)
        .route("/healthz", get(stats::health))
        // Run statistics (dashboard contract)
        .route("/v1/stats", get(stats::stats))
        // Streaming endpoints
        .route("/v1/ingest/ws", get(ingest::ws::ingest_ws))
        .route("/v1/runs/:run_id/stream", get(fanout::ws::run_stream_ws))
}
