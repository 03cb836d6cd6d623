//! Wall-clock helpers.
//!
//! Task deadlines are expressed in unix seconds by callers, so the scheduler
//! compares against the system clock rather than a monotonic one.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in whole seconds.
#[must_use]
pub fn now_unix_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Current unix time in milliseconds.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

/// Whether a deadline has passed once the grace window is taken into account.
///
/// A deadline is considered passed when `now - unix_deadline > grace_secs`.
#[must_use]
pub const fn is_past_deadline(unix_deadline: i64, now: i64, grace_secs: i64) -> bool {
    now.saturating_sub(unix_deadline) > grace_secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_inside_grace_is_not_past() {
        assert!(!is_past_deadline(100, 104, 5));
        assert!(!is_past_deadline(100, 105, 5));
        assert!(is_past_deadline(100, 106, 5));
    }

    #[test]
    fn test_zero_grace() {
        assert!(!is_past_deadline(100, 100, 0));
        assert!(is_past_deadline(100, 101, 0));
    }

    #[test]
    fn test_clock_is_sane() {
        assert!(now_unix_secs() > 1_600_000_000);
        assert!(now_ms() > 1_600_000_000_000);
    }
}
