//! Engine process execution.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{HarnessError, HarnessResult};

/// Exit code reported for a command killed after its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Interval between child status checks.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One engine command to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    pub binary: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    /// Command line for logs, with sensitive variable values hidden.
    pub display: String,
}

impl EngineInvocation {
    /// The engine subcommand, e.g. `apply`.
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or_default()
    }
}

/// Result of a command execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
}

impl CommandResult {
    /// Successful, zero-exit result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::with_exit_code(0, stdout, "")
    }

    pub fn with_exit_code(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            duration: Duration::ZERO,
            timed_out: false,
        }
    }

    /// Check if the command succeeded (exit code 0)
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

/// Seam between the orchestrator and the engine process.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &EngineInvocation) -> HarnessResult<CommandResult>;
}

/// Runs the engine as a child process in the configuration directory.
///
/// Output is streamed to the log line by line while it is captured, and the
/// child is killed once the invocation's timeout elapses.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &EngineInvocation) -> HarnessResult<CommandResult> {
        debug!(
            command = %invocation.display,
            dir = %invocation.working_dir.display(),
            "Executing engine command"
        );

        let start = Instant::now();
        let mut cmd = Command::new(&invocation.binary);
        cmd.args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("TF_IN_AUTOMATION", "1")
            .env("TF_INPUT", "0");
        for (k, v) in &invocation.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(|e| {
            HarnessError::ProcessStartFailed(format!("{}: {e}", invocation.binary))
        })?;

        let subcommand = invocation.subcommand().to_string();
        let stdout_handle = child.stdout.take().map(|stdout| {
            let subcommand = subcommand.clone();
            thread::spawn(move || stream_lines(stdout, &subcommand, "stdout"))
        });
        let stderr_handle = child
            .stderr
            .take()
            .map(|stderr| thread::spawn(move || stream_lines(stderr, &subcommand, "stderr")));

        let mut timed_out = false;
        let exit_status = loop {
            let polled = match child.try_wait() {
                Ok(polled) => polled,
                Err(e) => {
                    warn!(
                        command = %invocation.display,
                        error = %e,
                        "Lost track of engine command, killing"
                    );
                    kill_and_reap(&mut child);
                    join_output(stdout_handle);
                    join_output(stderr_handle);
                    return Err(e.into());
                }
            };
            if let Some(status) = polled {
                break Some(status);
            }

            if start.elapsed() >= invocation.timeout {
                timed_out = true;
                warn!(
                    command = %invocation.display,
                    timeout_secs = invocation.timeout.as_secs(),
                    "Engine command exceeded timeout, killing"
                );
                break kill_and_reap(&mut child);
            }

            thread::sleep(POLL_INTERVAL);
        };

        let duration = start.elapsed();
        let stdout = join_output(stdout_handle);
        let mut stderr = join_output(stderr_handle);
        if timed_out {
            if !stderr.is_empty() {
                stderr.push('\n');
            }
            stderr.push_str(&format!("Process timed out after {:?}.", invocation.timeout));
        }

        let exit_code = exit_status
            .and_then(|status| status.code())
            .unwrap_or(if timed_out { TIMEOUT_EXIT_CODE } else { -1 });

        debug!(
            command = %invocation.display,
            exit_code,
            duration_ms = duration.as_millis() as u64,
            timed_out,
            "Engine command completed"
        );

        Ok(CommandResult {
            exit_code,
            stdout,
            stderr,
            duration,
            timed_out,
        })
    }
}

/// Kill `child` if it is still running and wait for it, so no zombie or
/// orphaned engine process outlives the call.
fn kill_and_reap(child: &mut Child) -> Option<ExitStatus> {
    if let Err(e) = child.kill() {
        debug!(error = %e, "Kill failed, child already exited");
    }
    child.wait().ok()
}

fn stream_lines<R: Read>(reader: R, subcommand: &str, stream: &'static str) -> String {
    let mut captured = String::new();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                trace!(subcommand, stream, "{}", line.trim_end());
                captured.push_str(&line);
            }
        }
    }
    captured
}

fn join_output(handle: Option<thread::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.join().unwrap_or_default(),
        None => String::new(),
    }
}
