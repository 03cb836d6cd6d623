//! Tests for utility functions

use worker_dispatch::util::{init_tracing, is_past_deadline, now_ms, now_unix_secs};

#[test]
fn test_clock_is_consistent() {
    let secs = now_unix_secs();
    let ms = now_ms();
    assert!(secs > 1_600_000_000);
    let ms_secs = i64::try_from(ms / 1000).unwrap();
    assert!((ms_secs - secs).abs() <= 1);
}

#[test]
fn test_deadline_grace() {
    assert!(!is_past_deadline(100, 100, 0));
    assert!(is_past_deadline(100, 101, 0));
    assert!(!is_past_deadline(i64::MAX, i64::MIN, 0));
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!(component = "util_test", "tracing initialized");
}
