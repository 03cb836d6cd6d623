//! Static timings of the worker service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

/// Intervals, grace periods and retry policy fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOptions {
    /// Period of the scaling control loop.
    pub control_interval: Duration,
    /// Period of the rotten group eviction loop.
    pub flush_interval: Duration,
    /// Dispatcher sleep when nothing can be dispatched.
    pub dispatch_backoff: Duration,
    /// Single wait for a worker reply before the deadline is re-checked.
    pub read_poll: Duration,
    /// Time past `unix_timeout` before a running task is timed out.
    pub task_grace: Duration,
    /// Time past a group's `unix_timeout` before the group is evicted.
    pub rotten_grace: Duration,
    /// Minimum time between scaling actions before shrinking.
    pub scale_down_quiet: Duration,
    /// Drain rounds on close.
    pub close_retries: u32,
    /// Length of one drain round.
    pub close_retry_interval: Duration,
    /// Time a worker gets after SIGINT before it is killed.
    pub interrupt_grace: Duration,
    /// Consecutive start failures that open the circuit breaker.
    pub spawn_failure_threshold: u32,
    /// First retry delay after a start failure.
    pub spawn_backoff_base: Duration,
    /// Retry delay cap, also used while the breaker is open.
    pub spawn_backoff_max: Duration,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            control_interval: Duration::from_secs(1),
            flush_interval: Duration::from_secs(5),
            dispatch_backoff: Duration::from_millis(10),
            read_poll: Duration::from_millis(50),
            task_grace: Duration::from_secs(5),
            rotten_grace: Duration::from_secs(5),
            scale_down_quiet: Duration::from_secs(5),
            close_retries: 5,
            close_retry_interval: Duration::from_secs(1),
            interrupt_grace: Duration::from_secs(2),
            spawn_failure_threshold: 5,
            spawn_backoff_base: Duration::from_secs(1),
            spawn_backoff_max: Duration::from_secs(30),
        }
    }
}

impl ServiceOptions {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the control loop period.
    #[must_use]
    pub const fn with_control_interval(mut self, interval: Duration) -> Self {
        self.control_interval = interval;
        self
    }

    /// Set the rotten group eviction period.
    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the idle dispatcher sleep.
    #[must_use]
    pub const fn with_dispatch_backoff(mut self, backoff: Duration) -> Self {
        self.dispatch_backoff = backoff;
        self
    }

    /// Set the reply poll wait.
    #[must_use]
    pub const fn with_read_poll(mut self, poll: Duration) -> Self {
        self.read_poll = poll;
        self
    }

    /// Set the task and rotten group grace periods.
    #[must_use]
    pub const fn with_grace(mut self, task_grace: Duration, rotten_grace: Duration) -> Self {
        self.task_grace = task_grace;
        self.rotten_grace = rotten_grace;
        self
    }

    /// Set the quiet period required before shrinking.
    #[must_use]
    pub const fn with_scale_down_quiet(mut self, quiet: Duration) -> Self {
        self.scale_down_quiet = quiet;
        self
    }

    /// Set the drain policy used by close.
    #[must_use]
    pub const fn with_close_retries(mut self, retries: u32, interval: Duration) -> Self {
        self.close_retries = retries;
        self.close_retry_interval = interval;
        self
    }

    /// Set the SIGINT grace.
    #[must_use]
    pub const fn with_interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }

    /// Set the start failure backoff and breaker threshold.
    #[must_use]
    pub const fn with_spawn_backoff(mut self, threshold: u32, base: Duration, max: Duration) -> Self {
        self.spawn_failure_threshold = threshold;
        self.spawn_backoff_base = base;
        self.spawn_backoff_max = max;
        self
    }

    /// Task grace in whole seconds, as compared against unix deadlines.
    #[must_use]
    pub fn task_grace_secs(&self) -> i64 {
        i64::try_from(self.task_grace.as_secs()).unwrap_or(i64::MAX)
    }

    /// Rotten group grace in whole seconds.
    #[must_use]
    pub fn rotten_grace_secs(&self) -> i64 {
        i64::try_from(self.rotten_grace.as_secs()).unwrap_or(i64::MAX)
    }

    /// Validate option values.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for zero periods or an inverted backoff range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("control_interval", self.control_interval),
            ("flush_interval", self.flush_interval),
            ("dispatch_backoff", self.dispatch_backoff),
            ("read_poll", self.read_poll),
        ];
        for (name, period) in periods {
            if period.is_zero() {
                return Err(ConfigError::Invalid(format!("{name} must be greater than 0")));
            }
        }
        if self.spawn_failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "spawn_failure_threshold must be greater than 0".into(),
            ));
        }
        if self.spawn_backoff_base > self.spawn_backoff_max {
            return Err(ConfigError::Invalid(
                "spawn_backoff_base exceeds spawn_backoff_max".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let opts = ServiceOptions::default();
        assert!(opts.validate().is_ok());
        assert_eq!(opts.task_grace_secs(), 5);
        assert_eq!(opts.close_retries, 5);
    }

    #[test]
    fn test_rejects_zero_period() {
        let opts = ServiceOptions::new().with_read_poll(Duration::ZERO);
        assert_eq!(
            opts.validate(),
            Err(ConfigError::Invalid("read_poll must be greater than 0".into()))
        );
    }

    #[test]
    fn test_rejects_inverted_backoff() {
        let opts = ServiceOptions::new().with_spawn_backoff(
            3,
            Duration::from_secs(10),
            Duration::from_secs(1),
        );
        assert!(opts.validate().is_err());
    }
}
