//! Walks a fallback chain until one tool succeeds.

use crate::catalog::{extension_of, CommandCandidate, CommandCatalog, Delivery};
use crate::config::{Config, Operation, RetryPolicy};
use crate::error::{CandidateFailure, ExecuteError, ToolError};
use crate::install::{FileInstaller, SCRATCH_MARKER};
use crate::process::{CommandRunner, ProcessOutcome};
use crate::registry::ToolRegistry;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempPath;
use tracing::{debug, trace, warn};

/// Runs the candidates of a file's fallback chain in priority order.
///
/// Candidates whose tool is unavailable are skipped without being spawned.
/// The first candidate to succeed wins; failures are collected so the caller
/// gets a complete diagnosis when the whole chain fails.
pub struct FallbackExecutor {
    registry: Arc<ToolRegistry>,
    catalog: Arc<CommandCatalog>,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
    retry: RetryPolicy,
    installer: FileInstaller,
}

impl FallbackExecutor {
    /// Creates an executor using the timeout, retry and backup settings of `config`.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        catalog: Arc<CommandCatalog>,
        runner: Arc<dyn CommandRunner>,
        config: &Config,
    ) -> Self {
        Self {
            registry,
            catalog,
            runner,
            timeout: config.command_timeout,
            retry: config.retry,
            installer: FileInstaller::new(config.create_backup),
        }
    }

    /// Transforms `file` in place and returns the name of the tool that did it.
    ///
    /// # Errors
    ///
    /// - [`ExecuteError::Unsupported`] if no chain exists for the extension
    /// - [`ExecuteError::NoAvailableTool`] if no candidate tool is installed
    /// - [`ExecuteError::AllFailed`] if every available candidate failed
    ///
    /// On error the file's bytes are unchanged.
    pub fn execute(&self, file: &Path, operation: Operation) -> Result<String, ExecuteError> {
        let ext = extension_of(file);
        let candidates = self.catalog.candidates(&ext, operation);

        if candidates.is_empty() {
            return Err(ExecuteError::Unsupported {
                extension: display_extension(&ext),
                operation: operation.to_string(),
            });
        }

        let mut failures = Vec::new();

        for candidate in candidates {
            if !self.registry.is_available(&candidate.tool) {
                trace!("Skipping unavailable tool '{}'", candidate.tool);
                continue;
            }

            match self.run_with_retry(file, candidate) {
                Ok(()) => {
                    debug!("{} {} with {}", operation, file.display(), candidate.tool);
                    return Ok(candidate.tool.clone());
                }
                Err(error) => {
                    debug!("{} failed on {}: {}", candidate.tool, file.display(), error);
                    failures.push(CandidateFailure {
                        tool: candidate.tool.clone(),
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            return Err(ExecuteError::NoAvailableTool {
                extension: display_extension(&ext),
                operation: operation.to_string(),
                tools: candidates.iter().map(|c| c.tool.clone()).collect(),
            });
        }

        Err(ExecuteError::AllFailed {
            operation: operation.to_string(),
            failures,
        })
    }

    fn run_with_retry(&self, file: &Path, candidate: &CommandCandidate) -> Result<(), ToolError> {
        let mut retry = 0;

        loop {
            // Another worker may have found the binary missing since the chain was entered.
            if self.registry.peek(&candidate.tool) == Some(false) {
                return Err(ToolError::Invalidated);
            }

            match self.attempt(file, candidate) {
                Ok(()) => return Ok(()),
                Err(ToolError::NotFound) => {
                    self.registry.invalidate(&candidate.tool);
                    return Err(ToolError::NotFound);
                }
                Err(e) if e.is_transient() && retry < self.retry.max_retries => {
                    retry += 1;
                    let delay = self.retry.delay_for(retry);
                    debug!(
                        "Transient failure from {} ({}), retry {}/{} in {:?}",
                        candidate.tool, e, retry, self.retry.max_retries, delay
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn attempt(&self, file: &Path, candidate: &CommandCandidate) -> Result<(), ToolError> {
        match candidate.delivery {
            Delivery::InPlace => self.attempt_in_place(file, candidate),
            Delivery::OutputFile => self.attempt_output_file(file, candidate),
            Delivery::Stdout => self.attempt_stdout(file, candidate),
        }
    }

    fn attempt_in_place(&self, file: &Path, candidate: &CommandCandidate) -> Result<(), ToolError> {
        let snapshot = fs::read(file).map_err(|e| ToolError::Input(e.to_string()))?;

        let args = candidate.render_args(file, file);
        let result = self.run_tool(candidate, &args).and_then(|_| {
            self.installer
                .backup_contents(file, &snapshot)
                .map_err(|e| ToolError::Install(e.to_string()))
        });

        if result.is_err() {
            restore_snapshot(file, &snapshot);
        }

        result
    }

    fn attempt_output_file(
        &self,
        file: &Path,
        candidate: &CommandCandidate,
    ) -> Result<(), ToolError> {
        let scratch = scratch_path(file)?;
        let args = candidate.render_args(file, &scratch);
        self.run_tool(candidate, &args)?;

        let bytes = fs::read(&scratch).map_err(|_| ToolError::NoOutput)?;
        if bytes.is_empty() {
            return Err(ToolError::NoOutput);
        }

        self.install(file, &bytes)
    }

    fn attempt_stdout(&self, file: &Path, candidate: &CommandCandidate) -> Result<(), ToolError> {
        let args = candidate.render_args(file, file);
        let outcome = self.run_tool(candidate, &args)?;

        if outcome.stdout.iter().all(u8::is_ascii_whitespace) {
            return Err(ToolError::NoOutput);
        }

        self.install(file, &outcome.stdout)
    }

    fn run_tool(
        &self,
        candidate: &CommandCandidate,
        args: &[String],
    ) -> Result<ProcessOutcome, ToolError> {
        let outcome = self.runner.run(&candidate.tool, args, self.timeout)?;
        trace!("{} exited with {:?} in {:?}", candidate.tool, outcome.status, outcome.elapsed);

        if outcome.success() {
            Ok(outcome)
        } else {
            Err(outcome.into_error())
        }
    }

    fn install(&self, file: &Path, bytes: &[u8]) -> Result<(), ToolError> {
        self.installer
            .install(file, bytes)
            .map_err(|e| ToolError::Install(e.to_string()))
    }
}

/// Creates a unique hidden sibling for a tool to write its output to.
///
/// The file keeps the input's extension, since some tools infer the output
/// format from it, and is deleted when the returned path is dropped.
fn scratch_path(file: &Path) -> Result<TempPath, ToolError> {
    let dir = file
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = extension_of(file);
    let suffix = if ext.is_empty() { String::new() } else { format!(".{ext}") };

    tempfile::Builder::new()
        .prefix(&format!(".{name}{SCRATCH_MARKER}"))
        .suffix(&suffix)
        .tempfile_in(dir)
        .map(tempfile::NamedTempFile::into_temp_path)
        .map_err(|e| ToolError::Install(format!("cannot create scratch file: {e}")))
}

fn restore_snapshot(file: &Path, snapshot: &[u8]) {
    if fs::read(file).ok().as_deref() == Some(snapshot) {
        return;
    }

    match FileInstaller::new(false).install(file, snapshot) {
        Ok(()) => debug!("Restored original contents of {}", file.display()),
        Err(e) => warn!("Failed to restore {} after tool failure: {}", file.display(), e),
    }
}

pub(crate) fn display_extension(ext: &str) -> String {
    if ext.is_empty() {
        "files without extension".to_string()
    } else {
        format!(".{ext}")
    }
}
