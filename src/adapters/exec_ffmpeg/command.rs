//! Builder for ffmpeg/ffprobe invocations with progress, cancellation and
//! timeout support.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::domain::errors::DomainError;
use crate::ports::ProgressSink;

/// Default timeout for short-lived invocations such as probes
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of stderr lines kept for error messages
const STDERR_TAIL_LINES: usize = 20;

/// Captured output of a short-lived invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// One external tool invocation. Arguments are always passed discretely.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Timeout applied by [`ToolCommand::output`]
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn spawn(&self) -> Result<Child, DomainError> {
        debug!(program = %self.program.display(), args = ?self.args, "Spawning");

        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DomainError::EncoderUnavailable(format!(
                    "{}: failed to spawn: {}",
                    self.program_name(),
                    e
                ))
            })
    }

    /// Run to completion and capture stdout and stderr.
    ///
    /// A non-zero exit status is an error carrying the trimmed stderr.
    pub async fn output(&self) -> Result<ToolOutput, DomainError> {
        let program_name = self.program_name();
        let child = self.spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                DomainError::TimedOut(format!("{} timed out after {:?}", program_name, self.timeout))
            })?
            .map_err(|e| {
                DomainError::ProcessingError(format!(
                    "{}: I/O error waiting for process: {}",
                    program_name, e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(DomainError::ProcessingError(format!(
                "{} exited with status {}: {}",
                program_name,
                output.status,
                stderr.trim()
            )));
        }

        Ok(ToolOutput { stdout, stderr })
    }

    /// Run an ffmpeg invocation that writes `-progress pipe:1` key/value
    /// blocks to stdout, forwarding progress until it exits.
    ///
    /// Cancelling `cancel` kills the child and yields [`DomainError::Cancelled`].
    /// Dropping the returned future also kills the child.
    pub async fn run_with_progress(
        &self,
        duration_secs: Option<f64>,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let program_name = self.program_name();
        let mut child = self.spawn()?;

        let stderr_tail = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(collect_tail(stderr, STDERR_TAIL_LINES)));

        let mut tracker = ProgressTracker::new(duration_secs);
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(kill(&mut child, &program_name).await);
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            trace!(target: "previewkit::ffmpeg", "{}", line);
                            if let Some(fraction) = tracker.feed(&line) {
                                progress.report(fraction);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!("Stopped reading {} progress: {}", program_name, e);
                            break;
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(kill(&mut child, &program_name).await);
            }
            status = child.wait() => status.map_err(|e| {
                DomainError::ProcessingError(format!(
                    "{}: I/O error waiting for process: {}",
                    program_name, e
                ))
            })?,
        };

        let tail = match stderr_tail {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        if !tail.is_empty() {
            debug!(target: "previewkit::ffmpeg", stderr = %tail, "{} finished", program_name);
        }

        if !status.success() {
            return Err(DomainError::ProcessingError(format!(
                "{} exited with status {}: {}",
                program_name,
                status,
                tail.trim()
            )));
        }

        Ok(())
    }
}

async fn kill(child: &mut Child, program_name: &str) -> DomainError {
    debug!("Cancelling {}", program_name);
    if let Err(e) = child.kill().await {
        debug!("Failed to kill {}: {}", program_name, e);
    }
    DomainError::Cancelled
}

/// Keep the last `max_lines` lines of a stream
async fn collect_tail<R: AsyncRead + Unpin>(reader: R, max_lines: usize) -> String {
    let mut tail = VecDeque::with_capacity(max_lines);
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == max_lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

/// Turns ffmpeg `-progress` key/value lines into a fraction of the source
/// duration. A fraction is produced at the end of each block.
#[derive(Debug)]
pub struct ProgressTracker {
    duration_secs: Option<f64>,
    out_time_us: Option<i64>,
}

impl ProgressTracker {
    pub fn new(duration_secs: Option<f64>) -> Self {
        Self {
            duration_secs: duration_secs.filter(|d| d.is_finite() && *d > 0.0),
            out_time_us: None,
        }
    }

    pub fn feed(&mut self, line: &str) -> Option<f64> {
        let line = line.trim();
        // `out_time_ms` is also in microseconds
        if let Some(val) = line
            .strip_prefix("out_time_us=")
            .or_else(|| line.strip_prefix("out_time_ms="))
        {
            if let Ok(us) = val.trim().parse::<i64>() {
                self.out_time_us = Some(us);
            }
            return None;
        }

        let state = line.strip_prefix("progress=")?;
        if state == "end" {
            return Some(1.0);
        }

        let duration = self.duration_secs?;
        let out_us = self.out_time_us?;
        let elapsed = out_us.max(0) as f64 / 1_000_000.0;
        Some((elapsed / duration).clamp(0.0, 1.0))
    }
}
