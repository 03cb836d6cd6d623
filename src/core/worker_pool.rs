//! Pool of worker processes partitioned into free and busy sets.
//!
//! The pool is the only place workers move between states. Every transition
//! happens under one `parking_lot::Mutex`; counts are mirrored into atomics so
//! the dispatcher and stats readers never touch the lock.
//!
//! Workers are indexed by process uuid, since exit notifications and I/O
//! failures identify the process, while the free/busy partitions hold worker
//! uuids. A worker is in at most one partition and carries a task exactly when
//! it is busy.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::process::Process;
use crate::core::stats::WorkerStats;
use crate::core::task::{Task, TaskKey};

/// A process wrapped for scheduling.
#[derive(Debug)]
struct Worker {
    uuid: Uuid,
    process: Arc<Process>,
    task: Option<TaskKey>,
    reload: bool,
    abandoned: Arc<AtomicBool>,
}

/// Handle given to the task handler for the duration of one assignment.
#[derive(Debug, Clone)]
pub struct WorkerLease {
    worker_uuid: Uuid,
    process: Arc<Process>,
    abandoned: Arc<AtomicBool>,
}

impl WorkerLease {
    /// Worker identifier.
    #[must_use]
    pub const fn worker_uuid(&self) -> Uuid {
        self.worker_uuid
    }

    /// Process identifier of the leased worker.
    #[must_use]
    pub fn process_uuid(&self) -> Uuid {
        self.process.uuid()
    }

    /// The leased worker's process.
    #[must_use]
    pub const fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// True once the pool evicted this worker because its task's group was
    /// cancelled. The handler must then drop the task.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::Acquire)
    }
}

/// Result of [`WorkerPool::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Wait rounds left when busy workers drained; 0 if the wait ran out.
    pub remaining_tries: u32,
    /// Workers that were still busy when they were killed.
    pub force_killed_busy: usize,
    /// Workers killed at the end of the drain.
    pub killed: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    by_process: HashMap<Uuid, Worker>,
    /// worker uuid -> process uuid
    free: HashMap<Uuid, Uuid>,
    /// worker uuid -> process uuid
    busy: HashMap<Uuid, Uuid>,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
struct WorkerCounters {
    total: AtomicUsize,
    free: AtomicUsize,
    busy: AtomicUsize,
    added: AtomicU64,
    took: AtomicU64,
    freed: AtomicU64,
    deleted: AtomicU64,
}

/// Pick an arbitrary key. No ordering is implied.
fn pick_any<K: Copy + Eq + Hash, V>(map: &HashMap<K, V>) -> Option<K> {
    map.keys().next().copied()
}

/// Authoritative free/busy partition of live workers.
#[derive(Debug, Default)]
pub struct WorkerPool {
    state: Mutex<PoolState>,
    counters: WorkerCounters,
    closing: AtomicBool,
}

impl WorkerPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh process as a free worker. Returns the worker uuid.
    pub fn add(&self, process: Arc<Process>) -> Uuid {
        let worker_uuid = Uuid::new_v4();
        let process_uuid = process.uuid();
        let mut state = self.state.lock();
        state.by_process.insert(
            process_uuid,
            Worker {
                uuid: worker_uuid,
                process,
                task: None,
                reload: false,
                abandoned: Arc::new(AtomicBool::new(false)),
            },
        );
        state.free.insert(worker_uuid, process_uuid);
        self.counters.total.fetch_add(1, Ordering::AcqRel);
        self.counters.free.fetch_add(1, Ordering::AcqRel);
        self.counters.added.fetch_add(1, Ordering::Relaxed);
        worker_uuid
    }

    /// Move an arbitrary free worker to busy with `task` assigned.
    ///
    /// Returns `None` if no worker is free or the pool is closing; the caller
    /// must re-queue the task.
    pub fn take(&self, task: &Task) -> Option<WorkerLease> {
        if self.free_count() == 0 || self.is_closing() {
            return None;
        }
        let mut state = self.state.lock();
        let worker_uuid = pick_any(&state.free)?;
        let process_uuid = state.free.remove(&worker_uuid)?;
        state.busy.insert(worker_uuid, process_uuid);
        let worker = state.by_process.get_mut(&process_uuid)?;
        worker.task = Some(task.key());
        worker.abandoned = Arc::new(AtomicBool::new(false));
        let lease = WorkerLease {
            worker_uuid,
            process: Arc::clone(&worker.process),
            abandoned: Arc::clone(&worker.abandoned),
        };
        self.counters.free.fetch_sub(1, Ordering::AcqRel);
        self.counters.busy.fetch_add(1, Ordering::AcqRel);
        self.counters.took.fetch_add(1, Ordering::Relaxed);
        Some(lease)
    }

    /// Return a leased worker to the free set.
    ///
    /// A worker flagged for reload is deleted and its process killed instead.
    /// Returns `true` only if the worker went back to the free set; a worker
    /// already evicted is left alone.
    pub fn free(&self, lease: &WorkerLease) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let process_uuid = lease.process_uuid();
        if !state.busy.contains_key(&lease.worker_uuid) {
            return false;
        }
        let Some(worker) = state.by_process.get_mut(&process_uuid) else {
            return false;
        };
        if worker.uuid != lease.worker_uuid {
            return false;
        }
        worker.task = None;
        if worker.reload {
            if let Some(worker) = self.remove_locked(state, process_uuid) {
                debug!(process_uuid = %process_uuid, "reloaded worker retired");
                worker.process.close();
            }
            return false;
        }
        state.busy.remove(&lease.worker_uuid);
        state.free.insert(lease.worker_uuid, process_uuid);
        self.counters.busy.fetch_sub(1, Ordering::AcqRel);
        self.counters.free.fetch_add(1, Ordering::AcqRel);
        self.counters.freed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Remove the worker running `process_uuid`, wherever it is.
    ///
    /// The process is returned but not closed.
    pub fn delete_by_process(&self, process_uuid: Uuid) -> Option<Arc<Process>> {
        let mut state = self.state.lock();
        self.remove_locked(&mut state, process_uuid)
            .map(|worker| worker.process)
    }

    /// Remove every busy worker whose task belongs to `group_uuid`.
    ///
    /// Their leases are marked abandoned. Callers must close the returned
    /// processes.
    pub fn delete_by_group(&self, group_uuid: &str) -> Vec<Arc<Process>> {
        let mut state = self.state.lock();
        let doomed: Vec<Uuid> = state
            .by_process
            .iter()
            .filter(|(_, w)| w.task.as_ref().is_some_and(|t| t.group_uuid == group_uuid))
            .map(|(process_uuid, _)| *process_uuid)
            .collect();
        doomed
            .into_iter()
            .filter_map(|process_uuid| self.remove_locked(&mut state, process_uuid))
            .map(|worker| {
                worker.abandoned.store(true, Ordering::Release);
                worker.process
            })
            .collect()
    }

    /// Evict and kill one idle worker. Returns its process uuid.
    pub fn kill_any_free(&self) -> Option<Uuid> {
        let mut state = self.state.lock();
        let worker_uuid = pick_any(&state.free)?;
        let process_uuid = *state.free.get(&worker_uuid)?;
        let worker = self.remove_locked(&mut state, process_uuid)?;
        worker.process.close();
        Some(process_uuid)
    }

    /// Flag busy workers to retire when freed and kill every free worker now.
    /// Returns the number of free workers killed.
    pub fn reload(&self) -> usize {
        let mut state = self.state.lock();
        for worker in state.by_process.values_mut() {
            if worker.task.is_some() {
                worker.reload = true;
            }
        }
        let idle: Vec<Uuid> = state.free.values().copied().collect();
        let mut killed = 0;
        for process_uuid in idle {
            if let Some(worker) = self.remove_locked(&mut state, process_uuid) {
                worker.process.close();
                killed += 1;
            }
        }
        killed
    }

    /// Stop handing out workers, wait up to `retries` rounds of `interval` for
    /// busy workers to drain, then kill everything left.
    pub async fn close(&self, retries: u32, interval: Duration) -> DrainOutcome {
        warn!("closing workers");
        self.closing.store(true, Ordering::Release);

        let mut tries = retries;
        while self.busy_count() > 0 && tries > 0 {
            warn!(tries, busy = self.busy_count(), "waiting for busy workers");
            tokio::time::sleep(interval).await;
            tries -= 1;
        }

        let mut state = self.state.lock();
        let force_killed_busy = state.busy.len();
        let killed = state.by_process.len();
        for worker in state.by_process.values() {
            worker.process.close();
        }
        state.by_process.clear();
        state.free.clear();
        state.busy.clear();
        self.counters.total.store(0, Ordering::Release);
        self.counters.free.store(0, Ordering::Release);
        self.counters.busy.store(0, Ordering::Release);
        self.counters.deleted.fetch_add(killed as u64, Ordering::Relaxed);

        if force_killed_busy > 0 {
            warn!(force_killed_busy, "killed workers that were still busy");
        }
        DrainOutcome {
            remaining_tries: tries,
            force_killed_busy,
            killed,
        }
    }

    /// Whether a worker for `process_uuid` is still registered.
    #[must_use]
    pub fn contains(&self, process_uuid: Uuid) -> bool {
        self.state.lock().by_process.contains_key(&process_uuid)
    }

    /// Live workers.
    #[must_use]
    pub fn count(&self) -> usize {
        self.counters.total.load(Ordering::Acquire)
    }

    /// Idle workers.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.counters.free.load(Ordering::Acquire)
    }

    /// Workers running a task.
    #[must_use]
    pub fn busy_count(&self) -> usize {
        self.counters.busy.load(Ordering::Acquire)
    }

    /// `busy * 100 / count`, or 0 for an empty pool.
    #[must_use]
    pub fn load_percent(&self) -> usize {
        let count = self.count();
        if count == 0 {
            return 0;
        }
        self.busy_count() * 100 / count
    }

    /// Whether [`WorkerPool::close`] has been called.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Snapshot of pool counters.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            count: self.count(),
            free: self.free_count(),
            busy: self.busy_count(),
            load_percent: self.load_percent(),
            added_total: self.counters.added.load(Ordering::Relaxed),
            took_total: self.counters.took.load(Ordering::Relaxed),
            freed_total: self.counters.freed.load(Ordering::Relaxed),
            deleted_total: self.counters.deleted.load(Ordering::Relaxed),
        }
    }

    fn remove_locked(&self, state: &mut PoolState, process_uuid: Uuid) -> Option<Worker> {
        let worker = state.by_process.remove(&process_uuid)?;
        if state.free.remove(&worker.uuid).is_some() {
            self.counters.free.fetch_sub(1, Ordering::AcqRel);
        }
        if state.busy.remove(&worker.uuid).is_some() {
            self.counters.busy.fetch_sub(1, Ordering::AcqRel);
        }
        self.counters.total.fetch_sub(1, Ordering::AcqRel);
        self.counters.deleted.fetch_add(1, Ordering::Relaxed);
        Some(worker)
    }
}
