use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rt_bus::EventBus;
use rt_domain::config::Config;
use rt_logstore::LogStore;
use rt_store::MetadataStore;

use crate::fanout::hub::FanoutHub;

/// Shared application state passed to all handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, metadata store, log store, event bus
/// - **Fan-out** — the subscriber hub
/// - **Lifecycle** — the root cancellation token, cancelled on shutdown
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<MetadataStore>,
    pub logstore: Arc<dyn LogStore>,
    pub bus: Arc<dyn EventBus>,

    // ── Fan-out ───────────────────────────────────────────────────────
    pub hub: Arc<FanoutHub>,

    // ── Lifecycle ─────────────────────────────────────────────────────
    /// Root token; every long-lived stream observes it.
    pub shutdown: CancellationToken,
}
