use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fan-out
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutConfig {
    /// Bounded outbound queue per subscriber. A subscriber whose queue
    /// is full when an event arrives is disconnected (drop slowest).
    #[serde(default = "d_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: d_subscriber_buffer(),
        }
    }
}

fn d_subscriber_buffer() -> usize {
    256
}
