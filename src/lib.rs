//! # formi
//!
//! Resilient orchestration of external formatters and minifiers across file trees.
//!
//! formi does not format anything itself. It picks the best installed tool
//! per file type (esbuild, biome, ruff, prettier, ...), falls back to the
//! next one when a tool is missing or fails, and commits results to disk
//! atomically so a file is never left half-written.
//!
//! ## Features
//!
//! - Per-extension fallback chains for compacting and reformatting
//! - Tool availability detection with a persisted, environment-keyed cache
//! - Retries for transient failures and self-healing when a tool disappears
//! - Atomic replacement with optional `.formi_backup` copies
//! - Parallel batches with progress callbacks, dry runs and JSON reports
//!
//! ## Quick Start
//!
//! ```no_run
//! use formi::{Config, ExecutionMode, Operation};
//! use std::path::PathBuf;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = Config::builder()
//!     .workers(8)
//!     .build()?;
//!
//! let summary = formi::run(
//!     config,
//!     &[PathBuf::from("./web")],
//!     Operation::Compact,
//!     ExecutionMode::Apply,
//! )?;
//! summary.print_summary();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. **Discovery**: expands directories, respecting `.gitignore` and exclude globs
//! 2. **Registry**: knows which tools are installed
//! 3. **Catalog**: maps extensions to ordered tool candidates
//! 4. **Executor**: walks a chain until one tool succeeds
//! 5. **Installer**: swaps the result into place
//! 6. **Batch**: runs files on a worker pool and aggregates a summary

#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

mod batch;
mod catalog;
mod config;
mod discovery;
mod error;
mod estimate;
mod executor;
mod install;
mod process;
mod registry;
mod summary;
mod validate;

#[cfg(test)]
mod testing;

pub use batch::BatchCoordinator;
pub use catalog::{
    extension_of, normalize_extension, CommandCandidate, CommandCatalog, Delivery,
    INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER,
};
pub use config::{
    Config, ConfigBuilder, ExecutionMode, Operation, RetryPolicy, DEFAULT_ESSENTIAL_TOOLS,
    DEFAULT_EXCLUDE_PATTERNS,
};
pub use discovery::Discovery;
pub use error::{
    is_transient_message, CandidateFailure, Error, ExecuteError, Result, ToolError,
};
pub use estimate::{DryRunEstimator, SizeFactors};
pub use executor::FallbackExecutor;
pub use install::{
    backup_path, cleanup_artifacts, is_artifact, temp_path, FileInstaller, BACKUP_SUFFIX,
    SCRATCH_MARKER, TEMP_SUFFIX,
};
pub use process::{CommandRunner, ProcessOutcome, SystemRunner};
pub use registry::{EnvFingerprint, SystemProbe, ToolProbe, ToolRegistry, FINGERPRINT_VARIABLES};
pub use summary::{BatchSummary, ExtensionStats, FileResult, ToolUsed};
pub use validate::{validate_file, ValidationError};

/// Discovers files under `inputs` and applies `operation` to each of them.
///
/// This is the main entry point for the library.
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - An input path doesn't exist
/// - No processable files are found
/// - The worker pool cannot be started
///
/// Failures of individual files are reported in the summary instead.
///
/// # Examples
///
/// ```no_run
/// use formi::{run, Config, ExecutionMode, Operation};
/// use std::path::PathBuf;
///
/// # fn main() -> anyhow::Result<()> {
/// let config = Config::builder().build()?;
/// let summary = run(config, &[PathBuf::from(".")], Operation::Reformat, ExecutionMode::DryRun)?;
/// println!("{} files would change", summary.successful);
/// # Ok(())
/// # }
/// ```
pub fn run(
    config: Config,
    inputs: &[std::path::PathBuf],
    operation: Operation,
    mode: ExecutionMode,
) -> Result<BatchSummary> {
    let coordinator = BatchCoordinator::new(config)?;
    let files = Discovery::new(coordinator.config(), coordinator.catalog(), operation)?
        .collect(inputs)?;
    coordinator.run(&files, operation, mode)
}
