//! Integration tests for Process against real child processes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use worker_dispatch::core::{Process, ProcessError, ProcessOptions};

async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn exit_counter() -> (Arc<AtomicUsize>, impl FnOnce(uuid::Uuid) + Send + 'static) {
    let exits = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&exits);
    (exits, move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn test_write_then_read_echo() {
    let process = Process::spawn("cat", &ProcessOptions::default(), |_| {}).unwrap();
    assert!(process.is_running());
    assert!(process.pid().is_some());
    assert_eq!(process.command(), "cat");

    process.write("ping").await.unwrap();
    let reply = process.read(Duration::from_secs(5)).await.expect("reply in time");
    assert_eq!(reply.unwrap(), "ping");

    process.write("").await.unwrap();
    assert_eq!(process.read(Duration::from_secs(5)).await.unwrap().unwrap(), "");

    process.close();
}

#[tokio::test]
async fn test_read_without_data_returns_none() {
    let process = Process::spawn("cat", &ProcessOptions::default(), |_| {}).unwrap();
    assert!(process.read(Duration::from_millis(50)).await.is_none());

    // A poll that timed out does not lose the reply that follows.
    process.write("late").await.unwrap();
    let mut reply = None;
    for _ in 0..100 {
        reply = process.read(Duration::from_millis(20)).await;
        if reply.is_some() {
            break;
        }
    }
    assert_eq!(reply.unwrap().unwrap(), "late");
    process.close();
}

#[tokio::test]
async fn test_abandoned_reply_is_skipped() {
    let process = Process::spawn("cat", &ProcessOptions::default(), |_| {}).unwrap();
    process.write("first").await.unwrap();
    process.abandon_reply();
    process.write("second").await.unwrap();

    let reply = process.read(Duration::from_secs(5)).await.unwrap().unwrap();
    assert_eq!(reply, "second");
    process.close();
}

#[tokio::test]
async fn test_close_reports_exit_once() {
    let (exits, on_exit) = exit_counter();
    let process = Process::spawn("cat", &ProcessOptions::default(), on_exit).unwrap();

    process.close();
    process.close();
    assert!(wait_for(Duration::from_secs(5), || !process.is_running()).await);
    assert!(wait_for(Duration::from_secs(5), || exits.load(Ordering::SeqCst) == 1).await);

    assert!(matches!(
        process.read(Duration::from_secs(5)).await,
        Some(Err(ProcessError::Read { .. } | ProcessError::Closed(_)))
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(exits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_write_after_exit_fails() {
    let process = Process::spawn("true", &ProcessOptions::default(), |_| {}).unwrap();
    assert!(wait_for(Duration::from_secs(5), || !process.is_running()).await);

    let mut result = Ok(());
    // The first write can still land in the pipe buffer before the reader is gone.
    for _ in 0..3 {
        result = process.write("anyone?").await;
        if result.is_err() {
            break;
        }
    }
    assert!(matches!(result, Err(ProcessError::Write { .. })));
}

#[tokio::test]
async fn test_shutdown_interrupts_child() {
    let shutdown = CancellationToken::new();
    let options = ProcessOptions {
        shutdown: shutdown.clone(),
        interrupt_grace: Duration::from_millis(500),
    };
    let (exits, on_exit) = exit_counter();
    let process = Process::spawn("sleep 1000", &options, on_exit).unwrap();

    shutdown.cancel();
    assert!(wait_for(Duration::from_secs(5), || !process.is_running()).await);
    assert!(wait_for(Duration::from_secs(5), || exits.load(Ordering::SeqCst) == 1).await);
}

#[tokio::test]
async fn test_shutdown_kills_child_ignoring_sigint() {
    let shutdown = CancellationToken::new();
    let options = ProcessOptions {
        shutdown: shutdown.clone(),
        interrupt_grace: Duration::from_millis(100),
    };
    let script = "trap '' INT\nwhile true; do sleep 1 >/dev/null; done\n";
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stubborn.sh");
    std::fs::write(&path, script).unwrap();
    let process = Process::spawn(&format!("sh {}", path.display()), &options, |_| {}).unwrap();

    let started = Instant::now();
    shutdown.cancel();
    assert!(wait_for(Duration::from_secs(5), || !process.is_running()).await);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_spawn_errors() {
    assert!(matches!(
        Process::spawn("   ", &ProcessOptions::default(), |_| {}),
        Err(ProcessError::EmptyCommand)
    ));
    let err = Process::spawn("/nonexistent/worker-binary --flag", &ProcessOptions::default(), |_| {})
        .unwrap_err();
    assert!(matches!(err, ProcessError::Start { .. }));
    assert!(err.to_string().contains("/nonexistent/worker-binary --flag"));
}

#[tokio::test]
async fn test_framing_error_salvages_output() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("noisy.sh");
    std::fs::write(
        &path,
        "echo 'warning: deprecated' >&2\necho 'Notice: undefined index in worker'\nsleep 5 >/dev/null\n",
    )
    .unwrap();
    let process = Process::spawn(&format!("sh {}", path.display()), &ProcessOptions::default(), |_| {}).unwrap();

    let reply = process.read(Duration::from_secs(5)).await.unwrap();
    let err = reply.unwrap_err();
    assert!(matches!(err, ProcessError::Framing { .. }));
    let text = err.to_string();
    assert!(text.contains("Notice: undefined i"), "{text}");
    assert!(wait_for(Duration::from_secs(5), || process.stderr_tail().contains("warning: deprecated")).await);
    process.close();
}

#[tokio::test]
async fn test_invalid_utf8_reply_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("binary.sh");
    std::fs::write(&path, "printf '00000000000000000002\\377\\376'\nsleep 5 >/dev/null\n").unwrap();
    let process = Process::spawn(&format!("sh {}", path.display()), &ProcessOptions::default(), |_| {}).unwrap();

    let reply = process.read(Duration::from_secs(5)).await.unwrap();
    let err = reply.unwrap_err();
    assert!(matches!(err, ProcessError::InvalidUtf8 { uuid, .. } if uuid == process.uuid()));
    assert!(err.to_string().contains("invalid UTF-8"));
    process.close();
}
