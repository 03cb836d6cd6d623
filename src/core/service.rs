//! Worker service: scaling, dispatch and the per-task handler lifecycle.
//!
//! [`WorkerService`] ties the task stores and the worker pool together with
//! three background loops:
//!
//! - **control**: reloads [`WorkersConfig`], swaps the worker command when it
//!   changes, grows the pool under load and retires one idle worker at a time
//!   when load stays low.
//! - **flush**: evicts groups whose deadline passed long ago.
//! - **dispatch**: hands waiting tasks to detached handlers while free workers
//!   are available.
//!
//! Each handler takes a worker, writes the payload, then polls for the reply
//! while watching the task deadline, the group cancellation flag and service
//! shutdown. Every submitted task ends exactly once: finished (with a
//! response, an error or a timeout), flushed as rotten, or cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigProvider, ServiceOptions, WorkersConfig};
use crate::core::error::{ProcessError, ServiceError};
use crate::core::process::{Process, ProcessOptions};
use crate::core::spawn::Spawn;
use crate::core::stats::{ServiceStats, SpawnStats};
use crate::core::task::{GroupUuid, Task, TaskUuid, CLOSING_RESPONSE, TIMEOUT_RESPONSE};
use crate::core::tasks::Tasks;
use crate::core::worker_pool::{DrainOutcome, WorkerLease, WorkerPool};
use crate::util::clock::now_unix_secs;

/// Receives requests to terminate the whole server.
pub trait StopHandler: Send + Sync {
    /// Begin server termination.
    fn stop(&self, reason: &str);
}

impl<F> StopHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn stop(&self, reason: &str) {
        self(reason);
    }
}

/// Stops the server by sending SIGTERM to the current process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalStopHandler;

impl StopHandler for SignalStopHandler {
    #[cfg(unix)]
    fn stop(&self, reason: &str) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        warn!(reason, "sending SIGTERM to self");
        if let Err(e) = kill(Pid::this(), Signal::SIGTERM) {
            error!(error = %e, "failed to signal own process");
        }
    }

    #[cfg(not(unix))]
    fn stop(&self, reason: &str) {
        error!(reason, "stop by signal is not supported on this platform");
    }
}

/// What [`WorkerService::cancel_group`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    /// Waiting tasks deleted.
    pub waiting: usize,
    /// Finished, uncollected tasks deleted.
    pub finished: usize,
    /// Busy workers killed because they were running the group.
    pub killed_workers: usize,
    /// Tasks already popped for dispatch but not yet on a worker.
    pub dispatching: usize,
}

/// Tasks popped by the dispatcher whose handler has not leased a worker yet.
///
/// Each entry is keyed by a dispatch ticket and records the task group and
/// whether the group was cancelled meanwhile.
#[derive(Debug, Default)]
struct Dispatching {
    next_ticket: u64,
    tasks: HashMap<u64, (GroupUuid, bool)>,
}

/// Start failure bookkeeping for the scale-up path.
#[derive(Debug, Default)]
struct SpawnBackoff {
    consecutive_failures: u32,
    failures_total: u64,
    last_error: Option<String>,
    retry_at: Option<Instant>,
}

impl SpawnBackoff {
    fn is_ready(&self, now: Instant) -> bool {
        self.retry_at.is_none_or(|at| now >= at)
    }

    fn is_open(&self, threshold: u32) -> bool {
        self.consecutive_failures >= threshold
    }

    fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            info!(failures = self.consecutive_failures, "worker start recovered");
        }
        self.consecutive_failures = 0;
        self.retry_at = None;
    }

    fn record_failure(&mut self, err: &ProcessError, options: &ServiceOptions, now: Instant) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.failures_total += 1;
        self.last_error = Some(err.to_string());
        let delay = if self.is_open(options.spawn_failure_threshold) {
            options.spawn_backoff_max
        } else {
            backoff_delay(
                options.spawn_backoff_base,
                options.spawn_backoff_max,
                self.consecutive_failures,
            )
        };
        self.retry_at = Some(now + delay);
        delay
    }

    fn stats(&self, threshold: u32) -> SpawnStats {
        SpawnStats {
            consecutive_failures: self.consecutive_failures,
            failures_total: self.failures_total,
            breaker_open: self.is_open(threshold),
            last_error: self.last_error.clone(),
        }
    }
}

/// `base * 2^(failures - 1)`, capped at `max`.
fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    base.saturating_mul(1 << exponent).min(max)
}

/// Pool size the control loop should reach.
fn scale_target(config: &WorkersConfig, count: usize, load_percent: usize) -> usize {
    let target = if load_percent >= config.scale_up_percent {
        count.saturating_add(config.scale_up)
    } else {
        config.min_workers
    };
    target.clamp(config.min_workers, config.max_workers)
}

#[derive(Debug)]
struct ControlState {
    config: WorkersConfig,
    last_scaled_at: Instant,
    spawn: SpawnBackoff,
}

struct Inner<S> {
    provider: Box<dyn ConfigProvider>,
    options: ServiceOptions,
    process_options: ProcessOptions,
    spawner: S,
    pool: Arc<WorkerPool>,
    tasks: Tasks,
    control: Mutex<ControlState>,
    stop_handler: Box<dyn StopHandler>,
    shutdown: CancellationToken,
    wake: Notify,
    pending_dispatch: AtomicUsize,
    dispatching: Mutex<Dispatching>,
    started: AtomicBool,
    closing: AtomicBool,
    paused: AtomicBool,
}

/// Handle to a running worker service. Clones share the same service.
pub struct WorkerService<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for WorkerService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> std::fmt::Debug for WorkerService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerService")
            .field("workers", &self.inner.pool.count())
            .field("waiting", &self.inner.tasks.waiting_count())
            .field("closing", &self.inner.closing.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl<S> WorkerService<S>
where
    S: Spawn + Send + Sync + 'static,
{
    /// Create a stopped service. Call [`WorkerService::start`] to run it.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Config`] if the options are invalid or the provider
    /// cannot produce an initial configuration.
    pub fn new(
        provider: Box<dyn ConfigProvider>,
        options: ServiceOptions,
        spawner: S,
        stop_handler: Box<dyn StopHandler>,
    ) -> Result<Self, ServiceError> {
        options.validate()?;
        let config = provider.load()?;
        config.validate()?;
        let shutdown = CancellationToken::new();

        info!(
            command = %config.command,
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            "worker service created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                provider,
                process_options: ProcessOptions {
                    shutdown: shutdown.clone(),
                    interrupt_grace: options.interrupt_grace,
                },
                tasks: Tasks::new(options.rotten_grace_secs()),
                options,
                spawner,
                pool: Arc::new(WorkerPool::new()),
                control: Mutex::new(ControlState {
                    config,
                    last_scaled_at: Instant::now(),
                    spawn: SpawnBackoff::default(),
                }),
                stop_handler,
                shutdown,
                wake: Notify::new(),
                pending_dispatch: AtomicUsize::new(0),
                dispatching: Mutex::new(Dispatching::default()),
                started: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                paused: AtomicBool::new(false),
            }),
        })
    }

    /// Start the control, flush and dispatch loops. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("worker service started");
        self.inner.spawner.spawn(Arc::clone(&self.inner).control_loop());
        self.inner.spawner.spawn(Arc::clone(&self.inner).flush_loop());
        self.inner.spawner.spawn(Arc::clone(&self.inner).dispatch_loop());
    }

    /// Queue a task for dispatch.
    ///
    /// # Errors
    ///
    /// [`ServiceError::Closing`] once [`WorkerService::close`] has begun.
    pub fn add_task(
        &self,
        group_uuid: impl Into<GroupUuid>,
        task_uuid: impl Into<TaskUuid>,
        unix_timeout: i64,
        payload: impl Into<String>,
    ) -> Result<Task, ServiceError> {
        if self.is_closing() {
            return Err(ServiceError::Closing);
        }
        let task = Task::new(group_uuid, task_uuid, unix_timeout, payload);
        self.inner.tasks.add_waiting(task.clone());
        self.inner.wake.notify_one();
        Ok(task)
    }

    /// Remove and return one finished task of `group_uuid`.
    ///
    /// Returns a placeholder with `is_finished == false` when nothing is ready.
    pub fn detect_any_finished_task(&self, group_uuid: &str) -> Task {
        self.inner
            .tasks
            .take_finished(group_uuid)
            .unwrap_or_else(|| Task::pending(group_uuid))
    }

    /// Drop every task of `group_uuid` and kill workers running it.
    pub fn cancel_group(&self, group_uuid: &str) -> CancelOutcome {
        // Marking and store deletion happen under the dispatching lock so the
        // dispatcher cannot pop a task of this group in between.
        let (dispatching, (waiting, finished)) = {
            let mut in_flight = self.inner.dispatching.lock();
            let mut marked = 0;
            for (group, cancelled) in in_flight.tasks.values_mut() {
                if group.as_str() == group_uuid && !*cancelled {
                    *cancelled = true;
                    marked += 1;
                }
            }
            (marked, self.inner.tasks.delete_group(group_uuid))
        };
        let processes = self.inner.pool.delete_by_group(group_uuid);
        for process in &processes {
            process.close();
        }
        let outcome = CancelOutcome {
            waiting,
            finished,
            killed_workers: processes.len(),
            dispatching,
        };
        info!(
            group_uuid,
            waiting,
            finished,
            dispatching,
            killed_workers = outcome.killed_workers,
            "group cancelled"
        );
        outcome
    }

    /// Restart workers: idle ones now, busy ones once their task completes.
    /// Returns the number of idle workers killed.
    pub fn reload(&self, reason: &str) -> usize {
        let killed = self.inner.pool.reload();
        info!(reason, killed, "workers reloading");
        killed
    }

    /// Ask the configured [`StopHandler`] to terminate the server.
    pub fn stop(&self, reason: &str) {
        warn!(reason, "server stop requested");
        self.inner.stop_handler.stop(reason);
    }

    /// Snapshot of pool, task and start failure counters.
    #[must_use]
    pub fn stats(&self) -> ServiceStats {
        let spawn = self
            .inner
            .control
            .lock()
            .spawn
            .stats(self.inner.options.spawn_failure_threshold);
        ServiceStats {
            workers: self.inner.pool.stats(),
            tasks: self.inner.tasks.stats(),
            spawn,
            paused: self.is_paused(),
            closing: self.is_closing(),
        }
    }

    /// Stop accepting tasks, drain busy workers, kill the rest and stop the
    /// loops.
    pub async fn close(&self) -> DrainOutcome {
        self.inner.closing.store(true, Ordering::Release);
        info!("worker service closing");
        let outcome = self
            .inner
            .pool
            .close(
                self.inner.options.close_retries,
                self.inner.options.close_retry_interval,
            )
            .await;
        self.inner.shutdown.cancel();
        info!(
            remaining_tries = outcome.remaining_tries,
            force_killed_busy = outcome.force_killed_busy,
            killed = outcome.killed,
            "worker service closed"
        );
        outcome
    }

    /// Suspend dispatch. Tasks are still accepted and running ones finish.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::AcqRel) {
            info!("dispatch paused");
        }
    }

    /// Resume dispatch.
    pub fn unpause(&self) {
        if self.inner.paused.swap(false, Ordering::AcqRel) {
            info!("dispatch resumed");
            self.inner.wake.notify_one();
        }
    }

    /// Whether dispatch is suspended.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.is_paused()
    }

    /// Whether shutdown has begun.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.inner.is_closing()
    }

    /// Configuration currently in effect.
    #[must_use]
    pub fn config(&self) -> WorkersConfig {
        self.inner.control.lock().config.clone()
    }
}

impl<S> Inner<S>
where
    S: Spawn + Send + Sync + 'static,
{
    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    async fn control_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.options.control_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.control_tick(),
            }
        }
        debug!("control loop stopped");
    }

    fn control_tick(&self) {
        if self.is_closing() {
            return;
        }
        let mut control = self.control.lock();

        match self.provider.load().and_then(|cfg| cfg.validate().map(|()| cfg)) {
            Ok(cfg) => {
                if cfg.command != control.config.command {
                    info!(old = %control.config.command, new = %cfg.command, "worker command changed");
                    let killed = self.pool.reload();
                    debug!(killed, "idle workers retired for new command");
                }
                control.config = cfg;
            }
            Err(e) => warn!(error = %e, "config reload failed, keeping previous"),
        }

        let config = control.config.clone();
        let now = Instant::now();
        let count = self.pool.count();
        let load = self.pool.load_percent();
        let target = scale_target(&config, count, load);

        let mut created = 0;
        if count < target {
            if control.spawn.is_ready(now) {
                if load >= config.scale_up_percent {
                    warn!(load, count, target, "workers load is high, scaling up");
                }
                for _ in count..target {
                    match self.spawn_worker(&config.command) {
                        Ok(()) => {
                            created += 1;
                            control.spawn.record_success();
                        }
                        Err(e) => {
                            let retry_in = control.spawn.record_failure(&e, &self.options, now);
                            error!(
                                error = %e,
                                consecutive_failures = control.spawn.consecutive_failures,
                                retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                                "failed to start worker"
                            );
                            break;
                        }
                    }
                }
            } else {
                debug!(count, target, "worker start backing off");
            }
        }

        if created > 0 {
            control.last_scaled_at = now;
            debug!(created, count = self.pool.count(), "workers started");
            self.wake.notify_one();
        } else if count > config.min_workers
            && load < config.scale_down_percent
            && now.duration_since(control.last_scaled_at) >= self.options.scale_down_quiet
        {
            if let Some(process_uuid) = self.pool.kill_any_free() {
                control.last_scaled_at = now;
                info!(process_uuid = %process_uuid, load, count, "idle worker retired");
            }
        }
    }

    fn spawn_worker(&self, command: &str) -> Result<(), ProcessError> {
        let pool = Arc::downgrade(&self.pool);
        let process = Process::spawn(command, &self.process_options, move |process_uuid| {
            let Some(pool) = pool.upgrade() else {
                return;
            };
            if pool.delete_by_process(process_uuid).is_some() {
                debug!(process_uuid = %process_uuid, "exited worker removed");
            }
        })?;
        let process_uuid = process.uuid();
        self.pool.add(Arc::clone(&process));
        // The exit callback may have fired before the worker was registered.
        if !process.is_running() {
            self.pool.delete_by_process(process_uuid);
        }
        Ok(())
    }

    async fn flush_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.options.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let flushed = self.tasks.flush_rotten(now_unix_secs());
                    if flushed > 0 {
                        warn!(flushed, "rotten tasks evicted");
                    }
                }
            }
        }
        debug!("flush loop stopped");
    }

    async fn dispatch_loop(self: Arc<Self>) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.can_dispatch() {
                if let Some((ticket, task)) = self.pop_waiting() {
                    self.pending_dispatch.fetch_add(1, Ordering::AcqRel);
                    self.spawner.spawn(Arc::clone(&self).handle_task(ticket, task));
                    continue;
                }
            }
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                () = self.wake.notified() => {}
                () = tokio::time::sleep(self.options.dispatch_backoff) => {}
            }
        }
        debug!("dispatch loop stopped");
    }

    fn can_dispatch(&self) -> bool {
        !self.is_paused()
            && !self.is_closing()
            && self.pool.free_count() > self.pending_dispatch.load(Ordering::Acquire)
    }

    fn pop_waiting(&self) -> Option<(u64, Task)> {
        let mut in_flight = self.dispatching.lock();
        let task = self.tasks.take_waiting()?;
        let ticket = in_flight.next_ticket;
        in_flight.next_ticket = in_flight.next_ticket.wrapping_add(1);
        in_flight.tasks.insert(ticket, (task.group_uuid.clone(), false));
        Some((ticket, task))
    }

    /// Retire a dispatch ticket. True if its group was cancelled meanwhile.
    fn settle_ticket(&self, ticket: u64) -> bool {
        self.dispatching
            .lock()
            .tasks
            .remove(&ticket)
            .is_some_and(|(_, cancelled)| cancelled)
    }

    async fn handle_task(self: Arc<Self>, ticket: u64, task: Task) {
        // Take before settling: a cancel that misses the ticket then finds
        // the task on a busy worker.
        let lease = self.pool.take(&task);
        let cancelled = self.settle_ticket(ticket);
        self.pending_dispatch.fetch_sub(1, Ordering::AcqRel);
        if cancelled {
            debug!(task_uuid = %task.task_uuid, "task dropped with its group before dispatch");
            self.tasks.record_cancelled();
            if let Some(lease) = lease {
                self.release(&lease);
            }
            return;
        }
        let Some(lease) = lease else {
            self.requeue(task);
            return;
        };

        debug!(
            task_uuid = %task.task_uuid,
            group_uuid = %task.group_uuid,
            process_uuid = %lease.process_uuid(),
            "task dispatched"
        );

        if let Err(e) = lease.process().write(&task.payload).await {
            warn!(
                task_uuid = %task.task_uuid,
                process_uuid = %lease.process_uuid(),
                error = %e,
                "write to worker failed"
            );
            self.evict(&lease);
            if lease.is_abandoned() {
                self.tasks.record_cancelled();
            } else {
                self.requeue(task);
            }
            return;
        }

        self.await_reply(task, &lease).await;
    }

    async fn await_reply(&self, mut task: Task, lease: &WorkerLease) {
        let grace = self.options.task_grace_secs();
        loop {
            if lease.is_abandoned() {
                debug!(task_uuid = %task.task_uuid, "task dropped with its group");
                self.tasks.record_cancelled();
                return;
            }

            if task.is_timeout(now_unix_secs(), grace) {
                warn!(
                    task_uuid = %task.task_uuid,
                    group_uuid = %task.group_uuid,
                    "task timed out"
                );
                lease.process().abandon_reply();
                task.finish(TIMEOUT_RESPONSE, true);
                self.tasks.add_finished(task);
                self.release(lease);
                return;
            }

            let reply = tokio::select! {
                reply = lease.process().read(self.options.read_poll) => reply,
                () = self.shutdown.cancelled() => {
                    task.finish(CLOSING_RESPONSE, true);
                    self.tasks.add_finished(task);
                    self.release(lease);
                    return;
                }
            };

            match reply {
                None => {}
                Some(Ok(response)) => {
                    if lease.is_abandoned() {
                        self.tasks.record_cancelled();
                        return;
                    }
                    task.finish(response, false);
                    self.tasks.add_finished(task);
                    self.release(lease);
                    return;
                }
                Some(Err(e)) => {
                    self.evict(lease);
                    if lease.is_abandoned() {
                        self.tasks.record_cancelled();
                        return;
                    }
                    if self.is_closing() {
                        task.finish(CLOSING_RESPONSE, true);
                    } else {
                        warn!(
                            task_uuid = %task.task_uuid,
                            process_uuid = %lease.process_uuid(),
                            error = %e,
                            stderr = %lease.process().stderr_tail().trim(),
                            "worker failed while running task"
                        );
                        task.finish(e.to_string().trim(), true);
                    }
                    self.tasks.add_finished(task);
                    return;
                }
            }
        }
    }

    fn requeue(&self, mut task: Task) {
        if self.is_closing() {
            task.finish(CLOSING_RESPONSE, true);
            self.tasks.add_finished(task);
        } else {
            self.tasks.re_add_waiting(task);
        }
    }

    fn release(&self, lease: &WorkerLease) {
        if self.pool.free(lease) {
            self.wake.notify_one();
        }
    }

    fn evict(&self, lease: &WorkerLease) {
        self.pool.delete_by_process(lease.process_uuid());
        lease.process().close();
    }
}
