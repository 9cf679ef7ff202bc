use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a whole operation.
///
/// Per-file problems never surface here; they are captured as
/// [`ExecuteError`] inside the file's result instead.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// IO error with context about the file path.
    #[error("IO error accessing '{path}': {message}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// Error message
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Detailed error message
        message: String,
    },

    /// No processable files found under the given roots.
    #[error("No processable files found in '{path}'. Check .gitignore rules, exclude patterns or the file extensions.")]
    NoFiles {
        /// Root that was scanned
        path: PathBuf,
    },

    /// JSON serialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
    },

    /// Invalid exclusion pattern.
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The invalid pattern
        pattern: String,
        /// Reason why it's invalid
        reason: String,
    },

    /// The worker pool could not be created.
    #[error("Failed to start worker pool: {message}")]
    ThreadPool {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Creates an IO error with path context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a no files error.
    #[must_use]
    pub fn no_files(path: impl Into<PathBuf>) -> Self {
        Self::NoFiles { path: path.into() }
    }

    /// Creates an invalid pattern error.
    #[must_use]
    pub fn invalid_pattern(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this is an IO error.
    #[must_use]
    pub const fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool {
            message: e.to_string(),
        }
    }
}

/// Why a single attempt with one tool failed.
///
/// Every tool-specific failure shape (exit codes, spawn errors, timeouts,
/// empty output, install problems) is normalized into this enum at the
/// process boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ToolError {
    /// The binary could not be found when spawning it.
    #[error("not found - tool may have been removed")]
    NotFound,

    /// The process exceeded its time budget and was killed.
    #[error("timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// The process ran and reported failure.
    #[error("{message}")]
    Failed {
        /// Exit code, if the process exited normally
        code: Option<i32>,
        /// Excerpt of stderr/stdout
        message: String,
    },

    /// The process could not be started for a reason other than a missing binary.
    #[error("failed to start: {0}")]
    Spawn(String),

    /// The tool was invalidated by another worker while this one was about to use it.
    #[error("no longer available")]
    Invalidated,

    /// The tool reported success but produced nothing to install.
    #[error("tool produced no output")]
    NoOutput,

    /// Output was produced but could not be committed to disk.
    #[error("failed to write processed content: {0}")]
    Install(String),

    /// The file being processed could not be read.
    #[error("cannot read input: {0}")]
    Input(String),
}

const TRANSIENT_INDICATORS: &[&str] = &[
    "resource temporarily unavailable",
    "device busy",
    "try again",
    "temporary failure",
    "connection reset",
    "network unreachable",
];

impl ToolError {
    /// Returns true if retrying the same command unchanged is likely to succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Failed { message, .. } | Self::Spawn(message) => is_transient_message(message),
            _ => false,
        }
    }
}

/// Checks error text against the known transient indicators.
#[must_use]
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_INDICATORS
        .iter()
        .any(|indicator| lower.contains(indicator))
}

/// One failed candidate in a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFailure {
    /// Tool that was tried
    pub tool: String,
    /// Why it failed
    pub error: ToolError,
}

/// Why a whole file could not be processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExecuteError {
    /// No candidate tool is registered for this extension and operation.
    #[error("No {operation} tools available for {extension}")]
    Unsupported {
        /// File extension (with leading dot, or empty)
        extension: String,
        /// Operation name
        operation: String,
    },

    /// Candidates exist but none of their tools is installed.
    #[error("No {operation} tool installed for {extension} (tried {})", .tools.join(", "))]
    NoAvailableTool {
        /// File extension (with leading dot, or empty)
        extension: String,
        /// Operation name
        operation: String,
        /// Tools that were considered
        tools: Vec<String>,
    },

    /// Every available candidate was tried and each failed.
    #[error("All {operation} tools failed - {}", format_failures(.failures))]
    AllFailed {
        /// Operation name
        operation: String,
        /// Failures in the order the candidates were tried
        failures: Vec<CandidateFailure>,
    },
}

impl ExecuteError {
    /// Returns true if the file type is not handled at all.
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Returns true if at least one tool ran and the failure came from tools.
    #[must_use]
    pub const fn is_tool_failure(&self) -> bool {
        matches!(self, Self::AllFailed { .. })
    }
}

fn format_failures(failures: &[CandidateFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.tool, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}
