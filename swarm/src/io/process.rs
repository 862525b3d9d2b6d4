//! Child process execution with hard timeouts and bounded output capture.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    /// Stdout followed by stderr, separated by a newline.
    pub fn combined_text(&self) -> String {
        let mut text = self.stdout_text();
        text.push('\n');
        text.push_str(&self.stderr_text());
        text
    }
}

/// How long to wait for stdout/stderr to reach EOF once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (bytes beyond this are discarded while still draining the pipe).
/// Stdin is fed from its own thread so a child that never reads it cannot stall the caller.
///
/// On Unix the child leads its own process group. A child still running at the deadline is
/// killed together with its group and reported with `timed_out = true`. If a descendant keeps
/// the output pipes open past a short grace period, the group is killed and whatever was captured so
/// far is returned, so the call returns shortly after `timeout` even then.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    debug!(program = ?cmd.get_program(), "spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = ?cmd.get_program(), "failed to spawn command");
            return Err(e).with_context(|| format!("spawn {:?}", cmd.get_program()));
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let mut stdout_reader = StreamReader::spawn(stdout, output_limit_bytes);
    let mut stderr_reader = StreamReader::spawn(stderr, output_limit_bytes);

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Detached: the pipe closes when the child (or its group) dies.
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                warn!(err = %e, "failed to write child stdin");
            }
        });
    }

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            kill_process_group(child.id());
            if let Err(e) = child.kill() {
                debug!(err = %e, "kill after group kill");
            }
            child.wait().context("wait command after kill")?
        }
    };

    let drain_deadline = Instant::now() + DRAIN_GRACE;
    if !stdout_reader.wait_until(drain_deadline) || !stderr_reader.wait_until(drain_deadline) {
        warn!("output pipes still held open by a descendant, killing process group");
        kill_process_group(child.id());
    }
    let (stdout, stdout_truncated) = stdout_reader.finish().context("join stdout")?;
    let (stderr, stderr_truncated) = stderr_reader.finish().context("join stderr")?;
    let elapsed = started.elapsed();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, elapsed_ms = elapsed.as_millis() as u64, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        elapsed,
    })
}

/// Build a [`Command`] from an argv-style vector.
pub fn command_from_argv(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must be a non-empty array"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// SIGKILL every process in the group led by `pgid`. Best effort.
#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let result = Command::new("kill")
        .arg("-KILL")
        .arg("--")
        .arg(format!("-{pgid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = result {
        debug!(err = %e, pgid, "process group kill failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

#[derive(Debug, Default)]
struct Captured {
    buf: Vec<u8>,
    truncated: usize,
}

/// Drains one pipe on a background thread into a shared buffer.
struct StreamReader {
    captured: Arc<Mutex<Captured>>,
    done: Receiver<Result<()>>,
    finished: Option<Result<()>>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(reader: R, limit: usize) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let (tx, done) = mpsc::channel();
        let shared = Arc::clone(&captured);
        thread::spawn(move || {
            let _ = tx.send(read_stream_limited(reader, limit, &shared));
        });
        Self {
            captured,
            done,
            finished: None,
        }
    }

    /// Wait for EOF until `deadline`. Returns false if the pipe is still open.
    fn wait_until(&mut self, deadline: Instant) -> bool {
        if self.finished.is_some() {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(remaining) {
            Ok(result) => {
                self.finished = Some(result);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                self.finished = Some(Err(anyhow!("output reader thread panicked")));
                true
            }
        }
    }

    /// Collect what was read. A pipe that is still open after a short final
    /// wait is abandoned with its partial output.
    fn finish(mut self) -> Result<(Vec<u8>, usize)> {
        if !self.wait_until(Instant::now() + Duration::from_millis(100)) {
            warn!("abandoning output reader with partial capture");
        }
        if let Some(Err(err)) = self.finished.take() {
            return Err(err);
        }
        let mut captured = self
            .captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok((std::mem::take(&mut captured.buf), captured.truncated))
    }
}

fn read_stream_limited<R: Read>(
    mut reader: R,
    limit: usize,
    captured: &Mutex<Captured>,
) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let mut captured = captured.lock().unwrap_or_else(PoisonError::into_inner);
        let remaining = limit.saturating_sub(captured.buf.len());
        let keep = n.min(remaining);
        captured.buf.extend_from_slice(&chunk[..keep]);
        captured.truncated += n - keep;
    }

    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_stderr_and_status() {
        let output = run_command_with_timeout(
            sh("echo out; echo err >&2; exit 3"),
            None,
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout_text(), "out\n");
        assert_eq!(output.stderr_text(), "err\n");
        assert_eq!(output.combined_text(), "out\n\nerr\n");
        assert!(!output.timed_out);
    }

    #[test]
    fn feeds_stdin() {
        let output = run_command_with_timeout(
            sh("cat"),
            Some(b"hello".as_slice()),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert_eq!(output.stdout, b"hello");
    }

    #[test]
    fn kills_on_timeout() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 5"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn timeout_covers_descendants_holding_pipes() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 5; true"),
            None,
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        let wall = started.elapsed();
        assert!(output.timed_out);
        assert!(wall < Duration::from_secs(3), "wall = {wall:?}");
        assert!(output.elapsed >= Duration::from_millis(200));
        assert!(output.elapsed <= wall);
    }

    #[test]
    fn unread_stdin_does_not_block_the_deadline() {
        let payload = vec![b'x'; 512 * 1024];
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 5"),
            Some(payload.as_slice()),
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn background_descendant_does_not_hold_the_caller() {
        let started = Instant::now();
        let output = run_command_with_timeout(
            sh("sleep 5 & echo done"),
            None,
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert!(!output.timed_out);
        assert_eq!(output.stdout_text(), "done\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn truncates_beyond_limit() {
        let output = run_command_with_timeout(
            sh("printf 'abcdefghij'"),
            None,
            Duration::from_secs(10),
            4,
        )
        .expect("run");
        assert_eq!(output.stdout, b"abcd");
        assert_eq!(output.stdout_truncated, 6);
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("/definitely/not/a/binary"),
            None,
            Duration::from_secs(1),
            16,
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn"));
    }

    #[test]
    fn argv_must_be_non_empty() {
        assert!(command_from_argv(&[]).is_err());
        let cmd = command_from_argv(&["pylint".to_string(), "-j".to_string()]).expect("cmd");
        assert_eq!(cmd.get_program(), "pylint");
    }
}
