use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Analyzer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Worker pool size. Clamped to the range `1..=10`.
    #[serde(default = "d_workers")]
    pub workers: usize,
    /// Blocking-poll timeout for the task queue.
    #[serde(default = "d_dequeue_timeout_secs")]
    pub dequeue_timeout_secs: u64,
    /// Deadline for a single model call.
    #[serde(default = "d_model_timeout_secs")]
    pub model_timeout_secs: u64,
}

impl AnalyzerConfig {
    /// Clamp `workers` to the allowed range `1..=10`.
    pub fn clamped(&self) -> Self {
        Self {
            workers: self.workers.clamp(1, 10),
            ..self.clone()
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            workers: d_workers(),
            dequeue_timeout_secs: d_dequeue_timeout_secs(),
            model_timeout_secs: d_model_timeout_secs(),
        }
    }
}

fn d_workers() -> usize {
    2
}
fn d_dequeue_timeout_secs() -> u64 {
    5
}
fn d_model_timeout_secs() -> u64 {
    30
}
