//! Child process wrapper with a framed message channel over stdio.
//!
//! Each [`Process`] owns three background tasks: a waiter that reaps the child
//! and reports its exit exactly once, a reader that decodes frames from stdout
//! into a reply channel, and a collector that keeps the tail of stderr for
//! diagnostics. Replies are polled with [`Process::read`], so a caller can
//! interleave deadline checks with waiting for output without ever cancelling
//! a half-read frame.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::error::ProcessError;
use crate::core::framing::{read_frame, write_frame, FrameError, MAX_FRAME_LEN};

/// Bytes of stderr kept for diagnostics.
const STDERR_TAIL: usize = 4096;

/// How long to wait for leftover stdout when a frame header is malformed.
const SALVAGE_WAIT: Duration = Duration::from_millis(100);

type Reply = Result<String, ProcessError>;

/// Options shared by every process the service spawns.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Cancelled when the owning service shuts down; the child then receives
    /// SIGINT and is killed if it outlives `interrupt_grace`.
    pub shutdown: CancellationToken,
    /// Time a child gets to exit after SIGINT.
    pub interrupt_grace: Duration,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            shutdown: CancellationToken::new(),
            interrupt_grace: Duration::from_secs(2),
        }
    }
}

/// A running worker command.
pub struct Process {
    uuid: Uuid,
    command: String,
    pid: Option<u32>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    replies: tokio::sync::Mutex<mpsc::UnboundedReceiver<Reply>>,
    stale_replies: AtomicUsize,
    running: Arc<AtomicBool>,
    kill: CancellationToken,
    stderr: Arc<Mutex<String>>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("uuid", &self.uuid)
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Process {
    /// Start `command` (split on whitespace, no shell) as a child process.
    ///
    /// `on_exit` runs exactly once with the process uuid after the child exits
    /// for any reason.
    ///
    /// # Errors
    ///
    /// [`ProcessError::EmptyCommand`] for a blank command,
    /// [`ProcessError::Start`] if the OS refuses to start it.
    pub fn spawn<F>(command: &str, options: &ProcessOptions, on_exit: F) -> Result<Arc<Self>, ProcessError>
    where
        F: FnOnce(Uuid) + Send + 'static,
    {
        let mut parts = command.split_whitespace();
        let program = parts.next().ok_or(ProcessError::EmptyCommand)?;
        let uuid = Uuid::new_v4();

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Start {
                command: command.to_string(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or(ProcessError::MissingPipe(uuid, "stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::MissingPipe(uuid, "stdout"))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or(ProcessError::MissingPipe(uuid, "stderr"))?;

        let pid = child.id();
        let stderr = Arc::new(Mutex::new(String::new()));
        let running = Arc::new(AtomicBool::new(true));
        let kill = CancellationToken::new();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        tokio::spawn(collect_stderr(stderr_pipe, Arc::clone(&stderr)));
        tokio::spawn(pump_replies(uuid, stdout, reply_tx, Arc::clone(&stderr)));
        tokio::spawn(reap(
            uuid,
            child,
            kill.clone(),
            options.clone(),
            Arc::clone(&running),
            on_exit,
        ));

        debug!(process_uuid = %uuid, pid = ?pid, command = %command, "process started");

        Ok(Arc::new(Self {
            uuid,
            command: command.to_string(),
            pid,
            stdin: tokio::sync::Mutex::new(stdin),
            replies: tokio::sync::Mutex::new(reply_rx),
            stale_replies: AtomicUsize::new(0),
            running,
            kill,
            stderr,
        }))
    }

    /// Process identifier (distinct from the OS pid).
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// OS pid, if the child was still alive right after spawn.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Command line this process was started with.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// True until the child has been reaped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Last few kilobytes the child wrote to stderr.
    #[must_use]
    pub fn stderr_tail(&self) -> String {
        self.stderr.lock().clone()
    }

    /// Send one framed message to the child's stdin.
    ///
    /// # Errors
    ///
    /// [`ProcessError::Write`] when the pipe is broken, usually because the
    /// child already exited.
    pub async fn write(&self, data: &str) -> Result<(), ProcessError> {
        debug!(process_uuid = %self.uuid, len = data.len(), "write to process");
        let mut stdin = self.stdin.lock().await;
        write_frame(&mut *stdin, data.as_bytes())
            .await
            .map_err(|source| ProcessError::Write {
                uuid: self.uuid,
                source,
            })
    }

    /// Wait up to `wait` for the next reply.
    ///
    /// Returns `None` when nothing arrived in time. Replies owed to abandoned
    /// requests (see [`Process::abandon_reply`]) are skipped.
    pub async fn read(&self, wait: Duration) -> Option<Reply> {
        let deadline = tokio::time::Instant::now() + wait;
        let mut replies = self.replies.lock().await;
        loop {
            let reply = match tokio::time::timeout_at(deadline, replies.recv()).await {
                Err(_) => return None,
                Ok(None) => return Some(Err(ProcessError::Closed(self.uuid))),
                Ok(Some(reply)) => reply,
            };
            if reply.is_ok() && self.take_stale_reply() {
                debug!(process_uuid = %self.uuid, "discarded reply to abandoned request");
                continue;
            }
            return Some(reply);
        }
    }

    /// Mark the reply to the last request as unwanted. The next successful
    /// frame read from the child will be dropped.
    pub fn abandon_reply(&self) {
        self.stale_replies.fetch_add(1, Ordering::AcqRel);
    }

    /// Force-kill the child. Idempotent.
    pub fn close(&self) {
        if !self.kill.is_cancelled() {
            debug!(process_uuid = %self.uuid, "killing process");
        }
        self.kill.cancel();
    }

    fn take_stale_reply(&self) -> bool {
        self.stale_replies
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

enum ExitTrigger {
    Exited(io::Result<ExitStatus>),
    Killed,
    Interrupted,
}

/// Wait for the child, honoring kill and shutdown requests, then report exit.
async fn reap<F>(
    uuid: Uuid,
    mut child: Child,
    kill: CancellationToken,
    options: ProcessOptions,
    running: Arc<AtomicBool>,
    on_exit: F,
) where
    F: FnOnce(Uuid) + Send + 'static,
{
    let trigger = tokio::select! {
        status = child.wait() => ExitTrigger::Exited(status),
        () = kill.cancelled() => ExitTrigger::Killed,
        () = options.shutdown.cancelled() => ExitTrigger::Interrupted,
    };

    let status = match trigger {
        ExitTrigger::Exited(status) => status,
        ExitTrigger::Killed => force_kill(&mut child).await,
        ExitTrigger::Interrupted => {
            let graceful = if interrupt(&child) {
                tokio::select! {
                    status = tokio::time::timeout(options.interrupt_grace, child.wait()) => status.ok(),
                    () = kill.cancelled() => None,
                }
            } else {
                None
            };
            match graceful {
                Some(status) => status,
                None => force_kill(&mut child).await,
            }
        }
    };

    running.store(false, Ordering::Release);
    match status {
        Ok(status) => debug!(process_uuid = %uuid, %status, "process exited"),
        Err(e) => warn!(process_uuid = %uuid, error = %e, "failed to reap process"),
    }
    on_exit(uuid);
}

async fn force_kill(child: &mut Child) -> io::Result<ExitStatus> {
    if let Err(e) = child.start_kill() {
        // Already reaped children report InvalidInput; wait() still returns the status.
        debug!(error = %e, "start_kill failed");
    }
    child.wait().await
}

#[cfg(unix)]
fn interrupt(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    kill(Pid::from_raw(pid), Signal::SIGINT).is_ok()
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) -> bool {
    false
}

/// Decode frames from stdout until the stream fails.
async fn pump_replies(
    uuid: Uuid,
    mut stdout: ChildStdout,
    replies: mpsc::UnboundedSender<Reply>,
    stderr: Arc<Mutex<String>>,
) {
    loop {
        let reply = match read_frame(&mut stdout).await {
            Ok(bytes) => String::from_utf8(bytes).map_err(|source| ProcessError::InvalidUtf8 { uuid, source }),
            Err(FrameError::Io(source)) => Err(ProcessError::Read { uuid, source }),
            Err(FrameError::BadHeader(header)) => Err(ProcessError::Framing {
                header: String::from_utf8_lossy(&header).into_owned(),
                output: salvage_output(&mut stdout, &stderr).await,
            }),
            Err(FrameError::TooLarge(len)) => Err(ProcessError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            }),
        };
        let failed = reply.is_err();
        if replies.send(reply).is_err() || failed {
            break;
        }
    }
}

/// Collect whatever the child printed around a malformed frame.
async fn salvage_output(stdout: &mut ChildStdout, stderr: &Mutex<String>) -> String {
    let mut buffer = [0u8; 1024];
    let mut output = match tokio::time::timeout(SALVAGE_WAIT, stdout.read(&mut buffer)).await {
        Ok(Ok(n)) => String::from_utf8_lossy(&buffer[..n]).into_owned(),
        _ => String::new(),
    };
    {
        let stderr = stderr.lock();
        if !stderr.is_empty() {
            output.push_str(&stderr);
        }
    }
    let output = output.trim();
    if output.is_empty() {
        String::new()
    } else {
        format!(": {output}")
    }
}

async fn collect_stderr(mut pipe: ChildStderr, buffer: Arc<Mutex<String>>) {
    let mut chunk = [0u8; 1024];
    loop {
        let n = match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        let mut buffer = buffer.lock();
        buffer.push_str(&String::from_utf8_lossy(&chunk[..n]));
        if buffer.len() > STDERR_TAIL {
            let mut cut = buffer.len() - STDERR_TAIL;
            while !buffer.is_char_boundary(cut) {
                cut += 1;
            }
            buffer.drain(..cut);
        }
    }
}
