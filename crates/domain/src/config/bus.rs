use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Directory holding the durable analysis task queue snapshot.
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    /// Capacity of the live-event broadcast channel. Slow in-process
    /// consumers observe a lag notice instead of blocking publishers.
    #[serde(default = "d_live_capacity")]
    pub live_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            live_capacity: d_live_capacity(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_live_capacity() -> usize {
    1024
}
