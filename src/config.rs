use crate::error::{Error, Result};
use globset::Glob;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
const CACHE_DIR_NAME: &str = "formi";

/// Tools probed eagerly when the registry is created.
pub const DEFAULT_ESSENTIAL_TOOLS: &[&str] = &["ruff", "biome", "prettier", "black", "esbuild"];

/// Paths skipped during discovery unless overridden.
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    "**/.git/**",
    "**/node_modules/**",
    "**/.venv/**",
    "**/venv/**",
    "**/__pycache__/**",
    "**/target/**",
    "**/dist/**",
    "**/build/**",
    "**/.next/**",
    "**/.nuxt/**",
    "**/coverage/**",
    "**/*.min.js",
    "**/*.min.css",
    "**/*.min.html",
    "**/.DS_Store",
    "**/Thumbs.db",
    "**/*.bak",
    "**/*~",
];

/// Transformation applied to each file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Minify / compact the file
    Compact,
    /// Reformat the file with a code formatter
    Reformat,
}

impl Operation {
    /// Returns the lowercase name used in messages and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Reformat => "reformat",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether tools actually run or results are only estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Run tools and write results to disk
    #[default]
    Apply,
    /// Estimate results without touching any file
    DryRun,
}

impl ExecutionMode {
    /// Returns true for dry-run mode.
    #[must_use]
    pub const fn is_dry_run(self) -> bool {
        matches!(self, Self::DryRun)
    }
}

/// Retry behavior for transient tool failures.
///
/// The delay before retry `n` (1-based) is `base_delay * n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first one
    pub max_retries: u32,
    /// Delay unit multiplied by the attempt number
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Default number of additional attempts.
    pub const DEFAULT_MAX_RETRIES: u32 = 2;
    /// Default delay unit.
    pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Returns the delay to wait before the given retry (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Self::DEFAULT_MAX_RETRIES,
            base_delay: Self::DEFAULT_BASE_DELAY,
        }
    }
}

/// Configuration for the formi engine.
///
/// Use [`Config::builder()`] to construct a new configuration.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Number of files processed concurrently
    pub workers: usize,

    /// Keep a `.formi_backup` copy of every file before replacing it
    pub create_backup: bool,

    /// Directory holding the tool availability cache (`None` disables persistence)
    pub cache_dir: Option<PathBuf>,

    /// Maximum age of the persisted availability cache
    pub cache_ttl: Duration,

    /// Tools probed eagerly when the registry is created
    pub essential_tools: Vec<String>,

    /// Preferred tool per extension, moved to the front of its fallback chains
    pub preferred_tools: HashMap<String, String>,

    /// Hard time limit for a single transformation command
    pub command_timeout: Duration,

    /// Time limit for the `--version` availability probe
    pub version_probe_timeout: Duration,

    /// Retry behavior for transient failures
    pub retry: RetryPolicy,

    /// Files larger than this are rejected during validation
    pub max_file_size: u64,

    /// Glob patterns excluded during discovery
    pub exclude_patterns: Vec<String>,
}

impl Config {
    /// Creates a new configuration builder.
    ///
    /// # Examples
    ///
    /// ```
    /// use formi::Config;
    ///
    /// let config = Config::builder()
    ///     .workers(8)
    ///     .create_backup(false)
    ///     .build()
    ///     .expect("valid configuration");
    /// assert_eq!(config.workers, 8);
    /// ```
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Worker count is zero
    /// - A timeout or the size limit is zero
    /// - An exclude pattern is not a valid glob
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be greater than 0"));
        }

        if self.command_timeout.is_zero() {
            return Err(Error::config("command_timeout must be greater than 0"));
        }

        if self.version_probe_timeout.is_zero() {
            return Err(Error::config("version_probe_timeout must be greater than 0"));
        }

        if self.max_file_size == 0 {
            return Err(Error::config("max_file_size must be greater than 0"));
        }

        for pattern in &self.exclude_patterns {
            Glob::new(pattern).map_err(|e| Error::invalid_pattern(pattern, e.to_string()))?;
        }

        let cpus = num_cpus::get();
        if self.workers > cpus * 8 {
            tracing::warn!(
                "{} workers requested on a machine with {} CPUs; external tools may contend heavily",
                self.workers,
                cpus
            );
        }

        Ok(())
    }

    /// Returns the cache file path, if persistence is enabled.
    #[must_use]
    pub fn cache_file(&self) -> Option<PathBuf> {
        self.cache_dir
            .as_ref()
            .map(|dir| dir.join("tool_cache.json"))
    }

    /// Returns the per-user default cache directory.
    #[must_use]
    pub fn default_cache_dir() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join(CACHE_DIR_NAME))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            create_backup: true,
            cache_dir: Self::default_cache_dir(),
            cache_ttl: DEFAULT_CACHE_TTL,
            essential_tools: DEFAULT_ESSENTIAL_TOOLS
                .iter()
                .map(ToString::to_string)
                .collect(),
            preferred_tools: HashMap::new(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            version_probe_timeout: DEFAULT_VERSION_PROBE_TIMEOUT,
            retry: RetryPolicy::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Builder for creating a [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    workers: Option<usize>,
    create_backup: Option<bool>,
    cache_dir: Option<Option<PathBuf>>,
    cache_ttl: Option<Duration>,
    essential_tools: Option<Vec<String>>,
    preferred_tools: HashMap<String, String>,
    command_timeout: Option<Duration>,
    version_probe_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    max_file_size: Option<u64>,
    exclude_patterns: Option<Vec<String>>,
    extra_excludes: Vec<String>,
}

impl ConfigBuilder {
    /// Sets the number of concurrent workers.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Enables or disables backup creation.
    #[must_use]
    pub fn create_backup(mut self, enabled: bool) -> Self {
        self.create_backup = Some(enabled);
        self
    }

    /// Sets the directory for the tool availability cache.
    #[must_use]
    pub fn cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(Some(path.into()));
        self
    }

    /// Disables the persisted availability cache; detection stays in memory.
    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.cache_dir = Some(None);
        self
    }

    /// Sets the maximum age of the persisted availability cache.
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Replaces the set of tools probed eagerly at startup.
    #[must_use]
    pub fn essential_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.essential_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    /// Prefers `tool` for files with extension `ext`.
    ///
    /// The tool is only moved ahead of the others; it must already be a
    /// candidate for that extension to have any effect.
    #[must_use]
    pub fn prefer_tool(mut self, ext: impl Into<String>, tool: impl Into<String>) -> Self {
        self.preferred_tools.insert(ext.into(), tool.into());
        self
    }

    /// Sets the hard time limit for a transformation command.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Sets the time limit for the `--version` availability probe.
    #[must_use]
    pub fn version_probe_timeout(mut self, timeout: Duration) -> Self {
        self.version_probe_timeout = Some(timeout);
        self
    }

    /// Sets the retry policy for transient failures.
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Sets the maximum accepted file size in bytes.
    #[must_use]
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    /// Replaces the default exclusion patterns.
    #[must_use]
    pub fn exclude_patterns(mut self, patterns: Vec<String>) -> Self {
        self.exclude_patterns = Some(patterns);
        self
    }

    /// Adds exclusion patterns on top of the defaults.
    #[must_use]
    pub fn exclude(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        self.extra_excludes.extend(patterns);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn build(self) -> Result<Config> {
        let defaults = Config::default();

        let mut exclude_patterns = self.exclude_patterns.unwrap_or(defaults.exclude_patterns);
        exclude_patterns.extend(self.extra_excludes);

        let config = Config {
            workers: self.workers.unwrap_or(defaults.workers),
            create_backup: self.create_backup.unwrap_or(defaults.create_backup),
            cache_dir: self.cache_dir.unwrap_or(defaults.cache_dir),
            cache_ttl: self.cache_ttl.unwrap_or(defaults.cache_ttl),
            essential_tools: self.essential_tools.unwrap_or(defaults.essential_tools),
            preferred_tools: self.preferred_tools,
            command_timeout: self.command_timeout.unwrap_or(defaults.command_timeout),
            version_probe_timeout: self
                .version_probe_timeout
                .unwrap_or(defaults.version_probe_timeout),
            retry: self.retry.unwrap_or(defaults.retry),
            max_file_size: self.max_file_size.unwrap_or(defaults.max_file_size),
            exclude_patterns,
        };

        config.validate()?;
        Ok(config)
    }
}
