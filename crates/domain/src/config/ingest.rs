use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ingestion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Flush the line buffer once it holds this many lines.
    #[serde(default = "d_batch_size")]
    pub batch_size: usize,
    /// Flush the line buffer at least this often, full or not.
    #[serde(default = "d_batch_interval_ms")]
    pub batch_interval_ms: u64,
    /// Append attempts per batch before the batch is dropped and the
    /// stream degrades to an aborted close.
    #[serde(default = "d_append_retries")]
    pub append_retries: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: d_batch_size(),
            batch_interval_ms: d_batch_interval_ms(),
            append_retries: d_append_retries(),
        }
    }
}

fn d_batch_size() -> usize {
    100
}
fn d_batch_interval_ms() -> u64 {
    1_000
}
fn d_append_retries() -> u32 {
    3
}
