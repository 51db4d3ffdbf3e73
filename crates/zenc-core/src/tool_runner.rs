//! Tool runner with timeout, output cap and cancellation.
//!
//! This module is the only place that spawns the zfs binary. It provides:
//!
//! - Per-command timeout with SIGTERM → SIGKILL escalation
//! - Deadline and cancellation via [`QueryContext`]
//! - Output size caps to prevent memory exhaustion
//! - Optional `nice` to limit system impact
//! - Command path validation to prevent injection
//!
//! The distinction callers rely on: `Err(ToolError)` means the process could
//! not be run at all, while `Ok(ToolOutput)` means it was started;
//! [`ToolOutput::terminated_normally`] then tells whether it exited with a
//! status or was killed.
//!
//! # Example
//!
//! ```ignore
//! use zenc_core::context::QueryContext;
//! use zenc_core::tool_runner::{CommandRunner, ToolConfig, ToolRunner, ToolSpec};
//!
//! let runner = ToolRunner::new(ToolConfig::default());
//! let spec = ToolSpec::new("zfs", vec!["version".to_string()]);
//! let output = runner.run(&QueryContext::background(), &spec)?;
//! println!("{}", output.combined_output());
//! ```

use crate::context::{ContextError, QueryContext};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, trace, warn};

/// Default timeout per command in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum output size per stream in bytes (1MB).
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Grace period between SIGTERM and SIGKILL in milliseconds.
const SIGTERM_GRACE_MS: u64 = 500;

/// Niceness added when running under `nice`.
const NICE_ADJUSTMENT: i32 = 10;

/// Exit statuses `nice` uses when it cannot run the wrapped command.
const NICE_CANNOT_INVOKE: i32 = 126;
const NICE_NOT_FOUND: i32 = 127;

/// Errors that prevent a tool from running at all.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("command failed to spawn: {0}")]
    SpawnFailed(String),

    #[error("command not started: {0}")]
    Context(#[from] ContextError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid command path: {0}")]
    InvalidPath(String),
}

/// Output from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Command that was executed.
    pub command: String,

    /// Arguments passed to the command.
    pub args: Vec<String>,

    /// Standard output (may be truncated).
    pub stdout: Vec<u8>,

    /// Standard error (may be truncated).
    pub stderr: Vec<u8>,

    /// Exit code, `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,

    /// Whether output was truncated.
    pub truncated: bool,

    /// Execution duration.
    pub duration: Duration,

    /// Whether the command was killed for exceeding its timeout.
    pub timed_out: bool,

    /// Whether the command was killed because its context was cancelled.
    pub cancelled: bool,
}

impl ToolOutput {
    /// Get stdout as string (lossy UTF-8 conversion).
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as string (lossy UTF-8 conversion).
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// stdout followed by stderr.
    pub fn combined_output(&self) -> String {
        let mut combined = self.stdout_str();
        combined.push_str(&self.stderr_str());
        combined
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.cancelled
    }

    /// The process exited on its own with some status, as opposed to being
    /// killed (signal, timeout, cancellation).
    pub fn terminated_normally(&self) -> bool {
        self.exit_code.is_some() && !self.timed_out && !self.cancelled
    }

    /// Short description of how the process ended, for error messages.
    pub fn termination(&self) -> String {
        if self.cancelled {
            "cancelled".to_string()
        } else if self.timed_out {
            format!("timed out after {:?}", self.duration)
        } else {
            match self.exit_code {
                Some(code) => format!("exit status {}", code),
                None => "killed by signal".to_string(),
            }
        }
    }
}

/// Limits applied to every command the runner starts.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Timeout for commands whose spec sets none.
    pub default_timeout: Duration,

    /// Maximum output size per stream in bytes.
    pub max_output_bytes: usize,

    /// Run the command under `nice`.
    pub use_nice: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            use_nice: false,
        }
    }
}

/// Specification for a tool to run.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    /// Command to execute.
    pub command: String,

    /// Arguments to pass.
    pub args: Vec<String>,

    /// Override timeout (None = use default).
    pub timeout: Option<Duration>,
}

impl ToolSpec {
    /// Create a new tool specification.
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: None,
        }
    }

    /// Set custom timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Something that can run an external command.
///
/// [`ToolRunner`] is the real implementation; tests substitute scripted
/// runners.
pub trait CommandRunner: Send + Sync {
    fn run(&self, ctx: &QueryContext, spec: &ToolSpec) -> Result<ToolOutput, ToolError>;
}

/// Runs external tools under the configured limits.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    config: ToolConfig,
}

impl ToolRunner {
    /// Create a new tool runner with the given configuration.
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    #[instrument(skip(self, ctx), fields(cmd = %spec.command))]
    fn execute(&self, ctx: &QueryContext, spec: &ToolSpec) -> Result<ToolOutput, ToolError> {
        self.validate_command(&spec.command)?;
        ctx.check()?;

        let requested_timeout = spec.timeout.unwrap_or(self.config.default_timeout);
        let timeout = ctx.clamp_timeout(requested_timeout);
        let max_output = self.config.max_output_bytes;

        debug!(
            command = %spec.command,
            args = ?spec.args,
            timeout_ms = timeout.as_millis() as u64,
            max_output,
            "running tool"
        );

        let start = Instant::now();
        let mut command = self.build_command(&spec.command, &spec.args);

        let mut child = match command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(command = %spec.command, "command not found");
                return Err(ToolError::CommandNotFound(spec.command.clone()));
            }
            Err(e) => {
                error!(command = %spec.command, error = %e, "failed to spawn");
                return Err(ToolError::SpawnFailed(e.to_string()));
            }
        };

        let captured = self.execute_with_timeout(ctx, &mut child, timeout, max_output);
        let duration = start.elapsed();

        info!(
            command = %spec.command,
            duration_ms = duration.as_millis() as u64,
            success = captured.is_ok(),
            "tool execution complete"
        );

        let captured = captured.map_err(|e| {
            warn!(command = %spec.command, error = %e, "tool execution failed");
            e
        })?;

        if self.config.use_nice
            && matches!(
                captured.exit_code,
                Some(NICE_CANNOT_INVOKE) | Some(NICE_NOT_FOUND)
            )
        {
            // The wrapper ran but could not exec the real command.
            return Err(ToolError::CommandNotFound(spec.command.clone()));
        }

        Ok(ToolOutput {
            command: spec.command.clone(),
            args: spec.args.clone(),
            stdout: captured.stdout,
            stderr: captured.stderr,
            exit_code: captured.exit_code,
            truncated: captured.truncated,
            duration,
            timed_out: captured.timed_out,
            cancelled: captured.cancelled,
        })
    }

    /// Validate that a command is safe to execute.
    fn validate_command(&self, cmd: &str) -> Result<(), ToolError> {
        if cmd.is_empty() {
            return Err(ToolError::InvalidPath("empty command".to_string()));
        }

        // Reject commands with shell metacharacters
        if cmd.contains(['|', '&', ';', '$', '`', '\n', '\r']) {
            return Err(ToolError::InvalidPath(format!(
                "command contains shell metacharacters: {}",
                cmd
            )));
        }

        if cmd.starts_with('/') && !Path::new(cmd).exists() {
            return Err(ToolError::CommandNotFound(cmd.to_string()));
        }

        Ok(())
    }

    /// Build the command, wrapped in `nice` if configured.
    fn build_command(&self, cmd: &str, args: &[String]) -> Command {
        let mut command = if cfg!(unix) && self.config.use_nice {
            let mut nice = Command::new("nice");
            nice.arg("-n").arg(NICE_ADJUSTMENT.to_string()).arg(cmd);
            nice
        } else {
            Command::new(cmd)
        };

        command.args(args);

        // zfs output is parsed; keep it stable and free of caller environment
        command.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            command.env("PATH", path);
        }
        command.env("LC_ALL", "C");
        command.env("LANG", "C");

        command
    }

    /// Read output until the child exits, the timeout passes or the
    /// context is cancelled.
    fn execute_with_timeout(
        &self,
        ctx: &QueryContext,
        child: &mut Child,
        timeout: Duration,
        max_output: usize,
    ) -> Result<Captured, ToolError> {
        let deadline = Instant::now() + timeout;
        let mut captured = Captured {
            stdout: Vec::with_capacity(max_output.min(65536)),
            stderr: Vec::with_capacity(max_output.min(65536)),
            ..Captured::default()
        };

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let mut chunk = vec![0u8; 8192];

        loop {
            if ctx.is_cancelled() {
                captured.cancelled = true;
                warn!("context cancelled, terminating command");
                self.kill_with_grace(child);
                break;
            }
            if Instant::now() >= deadline {
                captured.timed_out = true;
                warn!("command timed out, sending SIGTERM");
                self.kill_with_grace(child);
                break;
            }

            let mut did_read = false;

            if let Some(ref mut out) = stdout {
                if let Ok(n) = try_read_nonblocking(out, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        append_capped(
                            &mut captured.stdout,
                            &chunk[..n],
                            max_output,
                            &mut captured.truncated,
                        );
                    }
                }
            }

            if let Some(ref mut err) = stderr {
                if let Ok(n) = try_read_nonblocking(err, &mut chunk) {
                    if n > 0 {
                        did_read = true;
                        append_capped(
                            &mut captured.stderr,
                            &chunk[..n],
                            max_output,
                            &mut captured.truncated,
                        );
                    }
                }
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    if let Some(ref mut out) = stdout {
                        let _ = drain_to_limit(
                            out,
                            &mut captured.stdout,
                            max_output,
                            &mut captured.truncated,
                        );
                    }
                    if let Some(ref mut err) = stderr {
                        let _ = drain_to_limit(
                            err,
                            &mut captured.stderr,
                            max_output,
                            &mut captured.truncated,
                        );
                    }

                    captured.exit_code = status.code();
                    trace!(exit_code = ?captured.exit_code, "process exited");
                    return Ok(captured);
                }
                Ok(None) => {
                    if !did_read {
                        thread::sleep(Duration::from_millis(10));
                    }
                }
                Err(e) => {
                    error!(error = %e, "failed to wait for child");
                    return Err(ToolError::Io(e));
                }
            }
        }

        // Killed: record whatever status the kill produced
        let status = child.wait().ok();
        captured.exit_code = status.and_then(|s| s.code());
        Ok(captured)
    }

    /// Kill a process with SIGTERM, then SIGKILL after grace period.
    #[cfg(unix)]
    fn kill_with_grace(&self, child: &mut Child) {
        let pid = child.id() as i32;

        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        debug!(pid, "sent SIGTERM");

        thread::sleep(Duration::from_millis(SIGTERM_GRACE_MS));

        match child.try_wait() {
            Ok(Some(_)) => {
                trace!(pid, "process exited after SIGTERM");
            }
            Ok(None) => {
                warn!(pid, "process did not exit after SIGTERM, sending SIGKILL");
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
                let _ = child.wait();
            }
            Err(e) => {
                error!(pid, error = %e, "failed to check process status");
            }
        }
    }

    #[cfg(not(unix))]
    fn kill_with_grace(&self, child: &mut Child) {
        let _ = child.kill();
        let _ = child.wait();
    }
}

impl CommandRunner for ToolRunner {
    fn run(&self, ctx: &QueryContext, spec: &ToolSpec) -> Result<ToolOutput, ToolError> {
        self.execute(ctx, spec)
    }
}

#[derive(Debug, Default)]
struct Captured {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
    truncated: bool,
    timed_out: bool,
    cancelled: bool,
}

fn append_capped(buf: &mut Vec<u8>, data: &[u8], max: usize, truncated: &mut bool) {
    let space = max.saturating_sub(buf.len());
    if space > 0 {
        let to_copy = data.len().min(space);
        buf.extend_from_slice(&data[..to_copy]);
        if data.len() > space {
            *truncated = true;
        }
    } else {
        *truncated = true;
    }
}

/// Drain remaining data from a stream up to the limit.
///
/// Uses non-blocking reads to avoid hanging on grandchild processes
/// that may still hold the pipe open after the direct child exits.
#[cfg(unix)]
fn drain_to_limit<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    loop {
        if *truncated {
            break;
        }
        match try_read_nonblocking(stream, &mut chunk) {
            Ok(0) => break,
            Ok(n) => append_capped(buf, &chunk[..n], max, truncated),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn drain_to_limit(
    stream: &mut impl Read,
    buf: &mut Vec<u8>,
    max: usize,
    truncated: &mut bool,
) -> std::io::Result<()> {
    let mut chunk = vec![0u8; 8192];
    loop {
        if *truncated {
            break;
        }
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        append_capped(buf, &chunk[..n], max, truncated);
    }
    Ok(())
}

/// Try to read from a stream without blocking.
///
/// Sets O_NONBLOCK for the duration of the read and restores the original
/// flags. Returns Ok(0) if no data is available (EAGAIN/EWOULDBLOCK).
#[cfg(unix)]
fn try_read_nonblocking<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

#[cfg(not(unix))]
fn try_read_nonblocking<R: Read>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    stream.read(buf)
}
