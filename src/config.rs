//! Ambient tunables threaded through Bind, the Scan Coordinator and the
//! Worker Runtime in place of hardcoded constants. Not part of the wire
//! protocol or the catalog contract — purely local configuration the
//! out-of-scope CLI/extension layer is responsible for populating from
//! user-facing options.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ScanConfig {
    /// Contiguous physical pages handed to one worker per task.
    pub pages_per_task: u64,
    /// Rows accumulated into one output chunk before it's published.
    pub chunk_capacity: usize,
    /// Overrides `ScanCoordinator::max_workers()` when set.
    pub worker_count: Option<usize>,
    /// Passed straight through to `postgres::Config::connect_timeout`.
    pub connect_timeout: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            pages_per_task: 1000,
            chunk_capacity: 2048,
            worker_count: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}
