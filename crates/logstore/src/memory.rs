//! In-process log store for tests and single-node dev mode.

use std::collections::HashMap;

use parking_lot::RwLock;
use uuid::Uuid;

use rt_domain::error::Result;
use rt_protocol::LineRecord;

use crate::LogStore;

pub struct MemoryStore {
    lines: RwLock<HashMap<Uuid, Vec<LineRecord>>>,
    query_limit: usize,
}

impl MemoryStore {
    pub fn new(query_limit: usize) -> Self {
        Self {
            lines: RwLock::new(HashMap::new()),
            query_limit,
        }
    }

    /// Number of lines currently held for a run (test helper).
    pub fn line_count(&self, run_id: Uuid) -> usize {
        self.lines.read().get(&run_id).map_or(0, Vec::len)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait::async_trait]
impl LogStore for MemoryStore {
    async fn append(
        &self,
        run_id: Uuid,
        _user_id: Uuid,
        _project: &str,
        lines: &[LineRecord],
    ) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        self.lines
            .write()
            .entry(run_id)
            .or_default()
            .extend_from_slice(lines);
        Ok(())
    }

    async fn query(&self, run_id: Uuid) -> Result<Vec<LineRecord>> {
        let mut result = self
            .lines
            .read()
            .get(&run_id)
            .cloned()
            .unwrap_or_default();
        // Stable sort: equal timestamps keep arrival order.
        result.sort_by_key(|l| l.timestamp);
        result.truncate(self.query_limit);
        Ok(result)
    }
}
