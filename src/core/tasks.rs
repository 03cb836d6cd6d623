//! Waiting and finished task stores with lifetime counters.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::core::task::{Task, TaskKey};
use crate::core::task_store::TaskStore;
use crate::core::stats::TaskStats;

/// Lifetime counters for task movements (lock-free atomics).
#[derive(Debug, Default)]
struct TaskCounters {
    added: AtomicU64,
    re_added: AtomicU64,
    took: AtomicU64,
    finished: AtomicU64,
    success: AtomicU64,
    error: AtomicU64,
    timeout: AtomicU64,
    cancelled: AtomicU64,
}

/// The two task stores the scheduler moves work between.
#[derive(Debug)]
pub struct Tasks {
    waiting: TaskStore,
    finished: TaskStore,
    counters: TaskCounters,
}

impl Tasks {
    /// Create empty stores using `rotten_grace_secs` for group eviction.
    #[must_use]
    pub fn new(rotten_grace_secs: i64) -> Self {
        Self {
            waiting: TaskStore::new(rotten_grace_secs),
            finished: TaskStore::new(rotten_grace_secs),
            counters: TaskCounters::default(),
        }
    }

    /// Queue a newly submitted task.
    pub fn add_waiting(&self, task: Task) {
        debug!(task_uuid = %task.task_uuid, group_uuid = %task.group_uuid, "task waiting");
        if let Some(replaced) = self.waiting.add(task) {
            warn!(task_uuid = %replaced.task_uuid, "waiting task replaced by duplicate id");
        }
        self.counters.added.fetch_add(1, Ordering::Relaxed);
    }

    /// Put a task back after a failed dispatch attempt.
    pub fn re_add_waiting(&self, task: Task) {
        debug!(task_uuid = %task.task_uuid, "task waiting again");
        self.waiting.add(task);
        self.counters.re_added.fetch_add(1, Ordering::Relaxed);
    }

    /// Pop the next waiting task in group-arrival order.
    pub fn take_waiting(&self) -> Option<Task> {
        let task = self.waiting.pop()?;
        self.counters.took.fetch_add(1, Ordering::Relaxed);
        debug!(task_uuid = %task.task_uuid, "task taken");
        Some(task)
    }

    /// Store a task that reached a terminal outcome.
    pub fn add_finished(&self, task: Task) {
        debug!(task_uuid = %task.task_uuid, is_error = task.is_error, "task finished");
        self.counters.finished.fetch_add(1, Ordering::Relaxed);
        if task.is_error {
            self.counters.error.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.success.fetch_add(1, Ordering::Relaxed);
        }
        self.finished.add(task);
    }

    /// Remove one finished task of `group_uuid`.
    pub fn take_finished(&self, group_uuid: &str) -> Option<Task> {
        self.finished.take_first_by_group(group_uuid)
    }

    /// Evict at most one rotten group from each store.
    pub fn flush_rotten(&self, now: i64) -> usize {
        let waiting = self.waiting.flush_first_rotten(now);
        if waiting > 0 {
            debug!(count = waiting, "flushed rotten waiting tasks");
        }
        let finished = self.finished.flush_first_rotten(now);
        if finished > 0 {
            debug!(count = finished, "flushed rotten finished tasks");
        }
        let total = waiting + finished;
        self.counters.timeout.fetch_add(total as u64, Ordering::Relaxed);
        total
    }

    /// Remove a group from both stores. Returns `(waiting, finished)` counts.
    pub fn delete_group(&self, group_uuid: &str) -> (usize, usize) {
        let removed = (
            self.waiting.delete_group(group_uuid),
            self.finished.delete_group(group_uuid),
        );
        self.counters
            .cancelled
            .fetch_add((removed.0 + removed.1) as u64, Ordering::Relaxed);
        removed
    }

    /// Remove a single task from both stores.
    pub fn delete_task(&self, key: &TaskKey) -> bool {
        let waiting = self.waiting.delete_task(key);
        let finished = self.finished.delete_task(key);
        waiting || finished
    }

    /// Record a task dropped because its group was cancelled mid-flight.
    pub fn record_cancelled(&self) {
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Tasks currently waiting.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.waiting.count()
    }

    /// Tasks currently finished and not yet collected.
    #[must_use]
    pub fn finished_count(&self) -> usize {
        self.finished.count()
    }

    /// Snapshot of store sizes and lifetime counters.
    #[must_use]
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            waiting: self.waiting_count(),
            finished: self.finished_count(),
            added_total: self.counters.added.load(Ordering::Relaxed),
            re_added_total: self.counters.re_added.load(Ordering::Relaxed),
            took_total: self.counters.took.load(Ordering::Relaxed),
            finished_total: self.counters.finished.load(Ordering::Relaxed),
            success_total: self.counters.success.load(Ordering::Relaxed),
            error_total: self.counters.error.load(Ordering::Relaxed),
            timeout_total: self.counters.timeout.load(Ordering::Relaxed),
            cancelled_total: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }
}
