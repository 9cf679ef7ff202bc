//! Detection, caching and invalidation of external tool availability.
//!
//! Availability is tri-state per tool: absent from the map means "never
//! checked", `false` means "checked and missing". Results are memoized for
//! the lifetime of the registry and persisted to a JSON cache shared between
//! runs. The persisted cache is trusted only when it was written under the
//! same environment fingerprint and is younger than the TTL; otherwise it is
//! dropped as a whole.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::{CommandRunner, SystemRunner};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Environment variables that influence how tool names resolve to binaries.
pub const FINGERPRINT_VARIABLES: &[&str] = &["PATH", "HOME", "VIRTUAL_ENV", "NODE_PATH"];

/// Decides whether a tool is installed.
pub trait ToolProbe: Send + Sync {
    /// Returns true if `tool` can be invoked.
    fn probe(&self, tool: &str) -> bool;
}

/// Probes the host: a `PATH` lookup first, then `<tool> --version`.
pub struct SystemProbe {
    runner: Arc<dyn CommandRunner>,
    version_timeout: Duration,
}

impl SystemProbe {
    /// Creates a probe using the given runner for the version fallback.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>, version_timeout: Duration) -> Self {
        Self {
            runner,
            version_timeout,
        }
    }
}

impl ToolProbe for SystemProbe {
    fn probe(&self, tool: &str) -> bool {
        if let Ok(path) = which::which(tool) {
            trace!("Tool '{}' resolved to {}", tool, path.display());
            return true;
        }

        // Some tools are shell shims or aliases that `which` cannot see.
        match self
            .runner
            .run(tool, &["--version".to_string()], self.version_timeout)
        {
            Ok(outcome) => outcome.success(),
            Err(e) => {
                trace!("Tool '{}' version probe failed: {}", tool, e);
                false
            }
        }
    }
}

/// Hash of the environment variables that affect tool resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvFingerprint(String);

impl EnvFingerprint {
    /// Fingerprints the current process environment.
    #[must_use]
    pub fn current() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Fingerprints an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut hasher = Sha256::new();
        for name in FINGERPRINT_VARIABLES {
            let value = lookup(name).unwrap_or_default();
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
        Self(format!("{:x}", hasher.finalize()))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// On-disk layout of the availability cache.
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    timestamp: f64,
    env_hash: String,
    tools: BTreeMap<String, bool>,
}

/// Persisted side of the registry.
struct CacheStore {
    path: PathBuf,
    ttl: Duration,
    fingerprint: EnvFingerprint,
    /// Creation time of the cache generation; also serializes writers.
    generated_at: Mutex<f64>,
}

impl CacheStore {
    fn new(path: PathBuf, ttl: Duration) -> Self {
        Self {
            path,
            ttl,
            fingerprint: EnvFingerprint::current(),
            generated_at: Mutex::new(now_secs()),
        }
    }

    /// Loads the cache if it is fresh and written under the current environment.
    fn load(&self) -> Option<BTreeMap<String, bool>> {
        let raw = fs::read_to_string(&self.path).ok()?;

        let cache: CacheFile = match serde_json::from_str(&raw) {
            Ok(cache) => cache,
            Err(e) => {
                debug!("Ignoring corrupt tool cache {}: {}", self.path.display(), e);
                return None;
            }
        };

        if cache.env_hash != self.fingerprint.as_str() {
            debug!("Tool cache written under a different environment, discarding");
            return None;
        }

        let age = now_secs() - cache.timestamp;
        if !(0.0..self.ttl.as_secs_f64()).contains(&age) {
            debug!("Tool cache is {:.0}s old, discarding", age);
            return None;
        }

        *lock(&self.generated_at) = cache.timestamp;
        Some(cache.tools)
    }

    fn write(&self, tools: &Mutex<HashMap<String, bool>>) -> Result<()> {
        let generated_at = lock(&self.generated_at);

        // Snapshot under the writer lock so the last writer always holds the newest state.
        let snapshot: BTreeMap<String, bool> = lock(tools)
            .iter()
            .map(|(name, available)| (name.clone(), *available))
            .collect();

        let cache = CacheFile {
            timestamp: *generated_at,
            env_hash: self.fingerprint.as_str().to_string(),
            tools: snapshot,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let temp_path = temp_path_for(&self.path);
        let json = serde_json::to_string_pretty(&cache)?;
        fs::write(&temp_path, json).map_err(|e| Error::io(&temp_path, e))?;
        fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::io(&self.path, e)
        })?;

        trace!("Persisted tool cache to {}", self.path.display());
        Ok(())
    }

    fn reset(&self) {
        *lock(&self.generated_at) = now_secs();
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove tool cache {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Thread-safe registry of tool availability.
pub struct ToolRegistry {
    tools: Mutex<HashMap<String, bool>>,
    probe_lock: Mutex<()>,
    probe: Arc<dyn ToolProbe>,
    store: Option<CacheStore>,
    essential: Vec<String>,
}

impl ToolRegistry {
    /// Creates a registry that probes the host system.
    ///
    /// Loads the persisted cache from the configured cache directory and
    /// eagerly probes the essential tools that it does not cover.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_probe(
            system_probe(config),
            config.cache_file(),
            config.cache_ttl,
            &config.essential_tools,
        )
    }

    /// Like [`new`](Self::new), but ignores and deletes the persisted cache
    /// before probing the essential tools.
    #[must_use]
    pub fn fresh(config: &Config) -> Self {
        Self::fresh_with_probe(
            system_probe(config),
            config.cache_file(),
            config.cache_ttl,
            &config.essential_tools,
        )
    }

    /// Creates a registry with a custom probe.
    ///
    /// `cache_file` of `None` keeps all results in memory only.
    #[must_use]
    pub fn with_probe(
        probe: Arc<dyn ToolProbe>,
        cache_file: Option<PathBuf>,
        ttl: Duration,
        essential: &[String],
    ) -> Self {
        let store = cache_file.map(|path| CacheStore::new(path, ttl));
        let tools = store
            .as_ref()
            .and_then(CacheStore::load)
            .map(|cached| cached.into_iter().collect())
            .unwrap_or_default();

        Self::assemble(probe, store, tools, essential)
    }

    /// Creates a registry with a custom probe, starting from an empty cache.
    #[must_use]
    pub fn fresh_with_probe(
        probe: Arc<dyn ToolProbe>,
        cache_file: Option<PathBuf>,
        ttl: Duration,
        essential: &[String],
    ) -> Self {
        let store = cache_file.map(|path| CacheStore::new(path, ttl));
        if let Some(store) = &store {
            store.reset();
        }

        Self::assemble(probe, store, HashMap::new(), essential)
    }

    fn assemble(
        probe: Arc<dyn ToolProbe>,
        store: Option<CacheStore>,
        tools: HashMap<String, bool>,
        essential: &[String],
    ) -> Self {
        let registry = Self {
            tools: Mutex::new(tools),
            probe_lock: Mutex::new(()),
            probe,
            store,
            essential: essential.to_vec(),
        };

        registry.detect_essential();
        registry
    }

    /// Returns true if the tool is available, probing it on first use.
    #[must_use]
    pub fn is_available(&self, tool: &str) -> bool {
        self.ensure_detected(tool)
    }

    /// Probes `tool` unless its availability is already known, and returns it.
    ///
    /// Lazy results are merged into the persisted cache immediately.
    pub fn ensure_detected(&self, tool: &str) -> bool {
        if let Some(known) = self.peek(tool) {
            return known;
        }

        let _probing = lock(&self.probe_lock);
        if let Some(known) = self.peek(tool) {
            return known;
        }

        let found = self.probe.probe(tool);
        debug!("Detected tool '{}': {}", tool, if found { "available" } else { "missing" });

        let value = *lock(&self.tools).entry(tool.to_string()).or_insert(found);
        self.persist();
        value
    }

    /// Returns the recorded availability without probing.
    ///
    /// `None` means the tool has never been checked.
    #[must_use]
    pub fn peek(&self, tool: &str) -> Option<bool> {
        lock(&self.tools).get(tool).copied()
    }

    /// Marks a tool as unavailable and updates the persisted cache.
    ///
    /// Used when a tool that was believed to be installed turns out not to be.
    pub fn invalidate(&self, tool: &str) {
        let previous = lock(&self.tools).insert(tool.to_string(), false);
        if previous != Some(false) {
            warn!("Tool '{}' is no longer available, skipping it from now on", tool);
            self.persist();
        }
    }

    /// Forgets every result, deletes the persisted cache and re-probes the essential tools.
    pub fn refresh(&self) {
        lock(&self.tools).clear();
        if let Some(store) = &self.store {
            store.reset();
        }
        self.detect_essential();
    }

    /// Ensures every named tool is detected and returns their availability.
    pub fn detect_all<'a>(&self, tools: impl IntoIterator<Item = &'a str>) -> BTreeMap<String, bool> {
        tools
            .into_iter()
            .map(|tool| (tool.to_string(), self.ensure_detected(tool)))
            .collect()
    }

    /// Returns the tools currently known to be available, sorted.
    #[must_use]
    pub fn available_tools(&self) -> Vec<String> {
        let mut available: Vec<String> = lock(&self.tools)
            .iter()
            .filter(|(_, available)| **available)
            .map(|(name, _)| name.clone())
            .collect();
        available.sort();
        available
    }

    /// Returns every recorded result.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, bool> {
        lock(&self.tools)
            .iter()
            .map(|(name, available)| (name.clone(), *available))
            .collect()
    }

    /// Returns the path of the persisted cache, if any.
    #[must_use]
    pub fn cache_path(&self) -> Option<&Path> {
        self.store.as_ref().map(|store| store.path.as_path())
    }

    fn detect_essential(&self) {
        let missing: Vec<String> = {
            let tools = lock(&self.tools);
            self.essential
                .iter()
                .filter(|tool| !tools.contains_key(tool.as_str()))
                .cloned()
                .collect()
        };

        if missing.is_empty() {
            return;
        }

        debug!("Probing {} essential tools", missing.len());
        let results: Vec<(String, bool)> = missing
            .into_iter()
            .map(|tool| {
                let found = self.probe.probe(&tool);
                (tool, found)
            })
            .collect();

        lock(&self.tools).extend(results);
        self.persist();
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.write(&self.tools) {
                warn!("Failed to update tool cache: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.snapshot())
            .field("cache", &self.cache_path())
            .finish_non_exhaustive()
    }
}

fn system_probe(config: &Config) -> Arc<dyn ToolProbe> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    Arc::new(SystemProbe::new(runner, config.version_probe_timeout))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
