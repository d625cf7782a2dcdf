//! Helpers for running child processes with timeouts, cancellation and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How often a running child is checked for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long output readers may keep draining after the child was killed.
const KILL_DRAIN_GRACE: Duration = Duration::from_secs(2);

type ReadResult = std::io::Result<(Vec<u8>, usize)>;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        source: std::io::Error,
    },
    #[error("output reader thread panicked")]
    ReaderPanicked,
}

impl ProcessError {
    fn io(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| ProcessError::Io { context, source }
    }
}

/// How a child process run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
}

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub termination: Termination,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        matches!(self.termination, Termination::Exited(status) if status.success())
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.termination {
            Termination::Exited(status) => status.code(),
            _ => None,
        }
    }

    /// Stdout followed by stderr (when non-empty), lossily decoded and trimmed.
    pub fn combined(&self) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[stdout truncated {} bytes]",
                self.stdout_truncated
            ));
        }
        let stderr = String::from_utf8_lossy(&self.stderr);
        if !stderr.trim().is_empty() {
            buf.push_str("\n--- stderr ---\n");
            buf.push_str(&stderr);
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[stderr truncated {} bytes]",
                self.stderr_truncated
            ));
        }
        buf.trim().to_string()
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// The child runs in its own process group, and the whole group is killed when `timeout`
/// elapses or `cancel` fires, so processes forked by a shell do not outlive the run.
#[instrument(skip_all, fields(timeout = ?timeout, output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ProcessError> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let program = cmd.get_program().to_string_lossy().into_owned();
    debug!(%program, "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, %program, "failed to spawn command");
            return Err(ProcessError::Spawn { program, source: e });
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ProcessError::io("take stdout")(broken_pipe("stdout was not piped")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ProcessError::io("take stderr")(broken_pipe("stderr was not piped")))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::io("take stdin")(broken_pipe("stdin was not piped")))?;
        // A child that exits without reading its input is not an error here.
        if let Err(e) = child_stdin.write_all(input) {
            warn!(err = %e, "failed to write child stdin");
        }
    }

    let termination = wait_or_kill(&mut child, timeout, cancel)?;

    // A killed child may leave a descendant holding the pipes open.
    let grace = match termination {
        Termination::Exited(_) => None,
        Termination::TimedOut | Termination::Cancelled => Some(KILL_DRAIN_GRACE),
    };
    let (stdout, stdout_truncated) = join_output(&stdout_rx, grace)?;
    let (stderr, stderr_truncated) = join_output(&stderr_rx, grace)?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(?termination, "command finished");
    Ok(CommandOutput {
        termination,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
    })
}

fn wait_or_kill(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<Termination, ProcessError> {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            warn!("cancellation requested, killing command");
            kill(child)?;
            return Ok(Termination::Cancelled);
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(?timeout, "command timed out, killing");
            kill(child)?;
            return Ok(Termination::TimedOut);
        }
        let slice = remaining.min(POLL_INTERVAL);
        if let Some(status) = child
            .wait_timeout(slice)
            .map_err(ProcessError::io("wait for command"))?
        {
            return Ok(Termination::Exited(status));
        }
    }
}

fn kill(child: &mut Child) -> Result<(), ProcessError> {
    if !kill_group(child) {
        child.kill().map_err(ProcessError::io("kill command"))?;
    }
    child
        .wait()
        .map_err(ProcessError::io("wait command after kill"))?;
    Ok(())
}

/// SIGKILL the child's process group. Returns false when the group could not be signalled.
#[cfg(unix)]
fn kill_group(child: &Child) -> bool {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(child.id()) else {
        return false;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => true,
        Err(err) => {
            warn!(err = %err, pid, "failed to kill process group");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) -> bool {
    false
}

fn broken_pipe(message: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, message)
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<ReadResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only when the run already gave up on this stream.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

/// Collect a reader's result. With a `grace` period, a reader still blocked
/// when it elapses is abandoned and its stream reported empty.
fn join_output(
    rx: &Receiver<ReadResult>,
    grace: Option<Duration>,
) -> Result<(Vec<u8>, usize), ProcessError> {
    let result = match grace {
        None => rx.recv().map_err(|_| ProcessError::ReaderPanicked)?,
        Some(grace) => match rx.recv_timeout(grace) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(?grace, "output still open after kill, abandoning reader");
                return Ok((Vec::new(), 0));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(ProcessError::ReaderPanicked),
        },
    };
    result.map_err(ProcessError::io("read output"))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> std::io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
