//! Subprocess execution with hard timeouts.

use crate::error::ToolError;
use std::io::{ErrorKind, Read};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

const MAX_POLL_INTERVAL: Duration = Duration::from_millis(25);
const MESSAGE_EXCERPT_CHARS: usize = 500;

/// Result of one process invocation that ran to completion.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutcome {
    /// Exit code, `None` if the process was terminated by a signal
    pub status: Option<i32>,
    /// Captured standard output
    pub stdout: Vec<u8>,
    /// Captured standard error
    pub stderr: String,
    /// Wall time spent waiting for the process
    pub elapsed: Duration,
}

impl ProcessOutcome {
    /// Creates a successful outcome with the given stdout.
    #[must_use]
    pub fn success_with(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Creates a failed outcome with the given exit code and stderr.
    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// Returns true if the process exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Returns a short description of why the process failed.
    ///
    /// Prefers stderr, then stdout, then the exit status.
    #[must_use]
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return excerpt(stderr);
        }

        let stdout = String::from_utf8_lossy(&self.stdout);
        let stdout = stdout.trim();
        if !stdout.is_empty() {
            return excerpt(stdout);
        }

        match self.status {
            Some(code) => format!("command failed with exit status {code}"),
            None => "command terminated by signal".to_string(),
        }
    }

    /// Converts a non-successful outcome into a [`ToolError`].
    #[must_use]
    pub fn into_error(self) -> ToolError {
        ToolError::Failed {
            code: self.status,
            message: self.failure_message(),
        }
    }
}

/// Runs external programs.
///
/// The engine only talks to processes through this trait, so tests can
/// substitute a scripted implementation.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, killing it once `timeout` elapses.
    ///
    /// # Errors
    ///
    /// - [`ToolError::NotFound`] if the executable does not exist
    /// - [`ToolError::Timeout`] if the time budget was exceeded
    /// - [`ToolError::Spawn`] for any other startup failure
    ///
    /// A process that runs and exits non-zero is *not* an error here; it is
    /// reported through [`ProcessOutcome::status`].
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutcome, ToolError>;
}

/// [`CommandRunner`] backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<ProcessOutcome, ToolError> {
        let start = Instant::now();
        trace!("Spawning {} {:?}", program, args);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ToolError::NotFound,
                _ => ToolError::Spawn(e.to_string()),
            })?;

        // Drain both pipes concurrently so a chatty tool cannot block on a full pipe.
        let (captured_tx, captured_rx) = mpsc::channel();
        if let Some(pipe) = child.stdout.take() {
            let tx = captured_tx.clone();
            thread::spawn(move || {
                let _ = tx.send(Captured::Stdout(read_all(pipe)));
            });
        }
        if let Some(pipe) = child.stderr.take() {
            let tx = captured_tx.clone();
            thread::spawn(move || {
                let _ = tx.send(Captured::Stderr(read_all(pipe)));
            });
        }
        drop(captured_tx);

        let deadline = start + timeout;
        let mut poll = Duration::from_millis(1);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!("{} killed after {:?}", program, timeout);
                    // Readers are left detached: grandchildren may still hold the pipes.
                    return Err(ToolError::Timeout(timeout));
                }
                Ok(None) => {
                    thread::sleep(poll);
                    poll = (poll * 2).min(MAX_POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ToolError::Spawn(e.to_string()));
                }
            }
        };

        // A background grandchild can keep the pipes open after the child exits.
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match captured_rx.recv_timeout(remaining) {
                Ok(Captured::Stdout(bytes)) => stdout = bytes,
                Ok(Captured::Stderr(bytes)) => stderr = bytes,
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    debug!("{} exited but its output pipes stayed open past {:?}", program, timeout);
                    return Err(ToolError::Timeout(timeout));
                }
            }
        }

        Ok(ProcessOutcome {
            status: status.code(),
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            elapsed: start.elapsed(),
        })
    }
}

enum Captured {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

fn read_all(mut pipe: impl Read) -> Vec<u8> {
    let mut buffer = Vec::new();
    let _ = pipe.read_to_end(&mut buffer);
    buffer
}

/// Truncates tool output to a size suitable for error messages.
fn excerpt(text: &str) -> String {
    match text.char_indices().nth(MESSAGE_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
