//! Read-only statistics snapshots.

use serde::{Deserialize, Serialize};

/// Worker pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Live workers.
    pub count: usize,
    /// Idle workers.
    pub free: usize,
    /// Workers running a task.
    pub busy: usize,
    /// `busy * 100 / count`, 0 for an empty pool.
    pub load_percent: usize,
    /// Workers ever added.
    pub added_total: u64,
    /// Successful takes.
    pub took_total: u64,
    /// Workers returned to the free set.
    pub freed_total: u64,
    /// Workers removed for any reason.
    pub deleted_total: u64,
}

/// Task store sizes and lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    /// Tasks waiting for a worker.
    pub waiting: usize,
    /// Finished tasks not yet collected.
    pub finished: usize,
    /// Tasks submitted.
    pub added_total: u64,
    /// Tasks put back after a failed dispatch.
    pub re_added_total: u64,
    /// Tasks popped for dispatch.
    pub took_total: u64,
    /// Tasks that reached a terminal outcome.
    pub finished_total: u64,
    /// Finished without error.
    pub success_total: u64,
    /// Finished with an error (including timeouts).
    pub error_total: u64,
    /// Tasks evicted as rotten.
    pub timeout_total: u64,
    /// Tasks dropped by group cancellation.
    pub cancelled_total: u64,
}

/// Process start failure tracking for the scale-up circuit breaker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnStats {
    /// Failures since the last successful start.
    pub consecutive_failures: u32,
    /// Failures since the service started.
    pub failures_total: u64,
    /// Whether scale-up is currently held back by the breaker.
    pub breaker_open: bool,
    /// Text of the most recent failure.
    pub last_error: Option<String>,
}

/// Combined service snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Worker pool counters.
    pub workers: WorkerStats,
    /// Task counters.
    pub tasks: TaskStats,
    /// Process start failures.
    pub spawn: SpawnStats,
    /// Dispatch is suspended.
    pub paused: bool,
    /// Shutdown has begun.
    pub closing: bool,
}

impl ServiceStats {
    /// Render the snapshot as pretty JSON.
    ///
    /// # Errors
    ///
    /// Propagates serialization failures.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_default() {
        let stats = ServiceStats::default();
        assert_eq!(stats.workers.count, 0);
        assert_eq!(stats.tasks.finished_total, 0);
        assert!(!stats.spawn.breaker_open);
    }

    #[test]
    fn test_stats_json_shape() {
        let mut stats = ServiceStats::default();
        stats.workers.count = 3;
        stats.tasks.waiting = 7;
        let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(json["workers"]["count"], 3);
        assert_eq!(json["tasks"]["waiting"], 7);
        assert_eq!(json["spawn"]["last_error"], serde_json::Value::Null);
    }
}
