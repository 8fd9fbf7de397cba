use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStoreKind {
    /// In-process store; dev mode and tests only.
    Memory,
    /// Grafana Loki push/query API.
    Loki,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStoreConfig {
    #[serde(default = "d_kind")]
    pub kind: LogStoreKind,
    /// Loki base URL, e.g. `http://localhost:3100`.
    #[serde(default)]
    pub base_url: String,
    /// Value of the `job` label on every pushed stream.
    #[serde(default = "d_service_name")]
    pub service_name: String,
    /// Maximum lines returned by a single range query.
    #[serde(default = "d_query_limit")]
    pub query_limit: usize,
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            kind: d_kind(),
            base_url: String::new(),
            service_name: d_service_name(),
            query_limit: d_query_limit(),
        }
    }
}

fn d_kind() -> LogStoreKind {
    LogStoreKind::Memory
}
fn d_service_name() -> String {
    "runtrail".into()
}
fn d_query_limit() -> usize {
    10_000
}
