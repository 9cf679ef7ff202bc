use crate::catalog::{extension_of, CommandCatalog};
use crate::config::{Config, ExecutionMode, Operation};
use crate::error::{ExecuteError, Result};
use crate::estimate::DryRunEstimator;
use crate::executor::{display_extension, FallbackExecutor};
use crate::process::{CommandRunner, SystemRunner};
use crate::registry::ToolRegistry;
use crate::summary::{BatchSummary, FileResult, ToolUsed};
use crate::validate::validate_file;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Fans files out over a fixed-size worker pool and aggregates the results.
pub struct BatchCoordinator {
    config: Config,
    registry: Arc<ToolRegistry>,
    catalog: Arc<CommandCatalog>,
    executor: FallbackExecutor,
    estimator: DryRunEstimator,
}

impl BatchCoordinator {
    /// Creates a coordinator that runs real tools on the host.
    ///
    /// Tool detection starts here: the persisted availability cache is
    /// loaded and the essential tools are probed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(ToolRegistry::new(&config));
        Self::with_parts(config, registry, Arc::new(SystemRunner))
    }

    /// Creates a coordinator from an existing registry and runner.
    ///
    /// The built-in catalog is used, adjusted by the configured preferred tools.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_parts(
        config: Config,
        registry: Arc<ToolRegistry>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let catalog = config
            .preferred_tools
            .iter()
            .fold(CommandCatalog::builtin(), |catalog, (ext, tool)| {
                catalog.with_preference(ext, tool)
            });

        Self::with_catalog(config, registry, catalog, runner)
    }

    /// Creates a coordinator with a custom catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_catalog(
        config: Config,
        registry: Arc<ToolRegistry>,
        catalog: CommandCatalog,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        config.validate()?;

        let catalog = Arc::new(catalog);
        let executor =
            FallbackExecutor::new(Arc::clone(&registry), Arc::clone(&catalog), runner, &config);
        let estimator = DryRunEstimator::new(Arc::clone(&registry), Arc::clone(&catalog));

        Ok(Self {
            config,
            registry,
            catalog,
            executor,
            estimator,
        })
    }

    /// Returns the tool registry.
    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Returns the command catalog.
    #[must_use]
    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Validates and processes a single file.
    ///
    /// Never fails: every problem is reported in the returned result.
    #[must_use]
    pub fn process_file(&self, file: &Path, operation: Operation, mode: ExecutionMode) -> FileResult {
        let start = Instant::now();

        let original_size = match validate_file(file, self.config.max_file_size) {
            Ok(size) => size,
            Err(e) => {
                let size = fs::metadata(file).map_or(0, |m| m.len());
                return FileResult::failed(
                    file,
                    size,
                    ToolUsed::Validation,
                    start.elapsed(),
                    format!("{e}: {}", file.display()),
                );
            }
        };

        let ext = extension_of(file);
        if !self.catalog.has_chain(&ext, operation) {
            let err = ExecuteError::Unsupported {
                extension: display_extension(&ext),
                operation: operation.to_string(),
            };
            return FileResult::failed(
                file,
                original_size,
                ToolUsed::Unsupported,
                start.elapsed(),
                err.to_string(),
            );
        }

        if !self.catalog.supports_operation(&ext, operation, &self.registry) {
            let err = ExecuteError::NoAvailableTool {
                extension: display_extension(&ext),
                operation: operation.to_string(),
                tools: self
                    .catalog
                    .candidates(&ext, operation)
                    .iter()
                    .map(|c| c.tool.clone())
                    .collect(),
            };
            return FileResult::failed(
                file,
                original_size,
                ToolUsed::NoTool,
                start.elapsed(),
                err.to_string(),
            );
        }

        if mode.is_dry_run() {
            return self.estimator.estimate(file, operation, original_size);
        }

        match self.executor.execute(file, operation) {
            Ok(tool) => {
                let final_size = fs::metadata(file).map_or(original_size, |m| m.len());
                FileResult::succeeded(
                    file,
                    original_size,
                    final_size,
                    ToolUsed::Tool(tool),
                    start.elapsed(),
                )
            }
            Err(e) => {
                let tool_used = if e.is_unsupported() {
                    ToolUsed::Unsupported
                } else {
                    ToolUsed::NoTool
                };
                FileResult::failed(file, original_size, tool_used, start.elapsed(), e.to_string())
            }
        }
    }

    /// Processes every file and returns the aggregated summary.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be created. Per-file
    /// failures never abort the batch.
    pub fn run(
        &self,
        files: &[PathBuf],
        operation: Operation,
        mode: ExecutionMode,
    ) -> Result<BatchSummary> {
        self.run_with_progress(files, operation, mode, |_, _, _| {})
    }

    /// Like [`run`](Self::run), calling `progress(result, completed, total)`
    /// on the calling thread as each file completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be created.
    pub fn run_with_progress<F>(
        &self,
        files: &[PathBuf],
        operation: Operation,
        mode: ExecutionMode,
        progress: F,
    ) -> Result<BatchSummary>
    where
        F: FnMut(&FileResult, usize, usize),
    {
        let cancel = AtomicBool::new(false);
        self.run_with_cancel(files, operation, mode, &cancel, progress)
    }

    /// Like [`run_with_progress`](Self::run_with_progress), stopping early once
    /// `cancel` is set.
    ///
    /// Files not yet started when the flag is observed are skipped and do not
    /// appear in the summary; files already being processed complete.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be created.
    #[instrument(skip_all, fields(operation = %operation, mode = ?mode, files = files.len()))]
    pub fn run_with_cancel<F>(
        &self,
        files: &[PathBuf],
        operation: Operation,
        mode: ExecutionMode,
        cancel: &AtomicBool,
        mut progress: F,
    ) -> Result<BatchSummary>
    where
        F: FnMut(&FileResult, usize, usize),
    {
        let start = Instant::now();
        let files = dedup_paths(files);
        let total = files.len();

        info!("Processing {} files with {} workers", total, self.config.workers);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .thread_name(|i| format!("formi-worker-{i}"))
            .build()?;

        let (tx, rx) = mpsc::channel();
        let mut results = Vec::with_capacity(total);

        pool.in_place_scope(|scope| {
            for file in &files {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    if cancel.load(Ordering::Relaxed) {
                        return;
                    }
                    let result = self.process_file(file, operation, mode);
                    let _ = tx.send(result);
                });
            }
            drop(tx);

            // Drain on the calling thread so the callback never runs concurrently.
            for result in rx {
                debug!(
                    "{} {} ({})",
                    if result.success { "✓" } else { "✗" },
                    result.path.display(),
                    result.tool_used
                );
                results.push(result);
                if let Some(last) = results.last() {
                    progress(last, results.len(), total);
                }
            }
        });

        if results.len() < total {
            warn!("Cancelled: {} of {} files were not processed", total - results.len(), total);
        }

        let summary = BatchSummary::new(operation, mode, results, start.elapsed());

        info!(
            "✓ {} {} files ({} ok, {} failed) in {:.2}s",
            operation,
            summary.total_files,
            summary.successful,
            summary.failed,
            summary.elapsed.as_secs_f64()
        );

        Ok(summary)
    }
}

/// Removes repeated paths, keeping the first occurrence.
fn dedup_paths(files: &[PathBuf]) -> Vec<&Path> {
    let mut seen = HashSet::with_capacity(files.len());
    files
        .iter()
        .map(PathBuf::as_path)
        .filter(|path| seen.insert(*path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CommandCandidate, Delivery};
    use crate::install::backup_path;
    use crate::testing::{FakeRunner, StaticProbe, Step};
    use assert_fs::prelude::*;
    use std::time::Duration;

    fn catalog() -> CommandCatalog {
        let mut catalog = CommandCatalog::new();
        for tool in ["alpha", "beta"] {
            catalog.register(
                "json",
                Operation::Compact,
                CommandCandidate::new(tool, ["{input}"], Delivery::Stdout),
            );
        }
        catalog
    }

    fn coordinator(available: &[&str], runner: Arc<FakeRunner>, workers: usize) -> BatchCoordinator {
        let config = Config::builder()
            .workers(workers)
            .no_cache()
            .create_backup(true)
            .build()
            .unwrap();
        let registry = Arc::new(ToolRegistry::with_probe(
            StaticProbe::new(available),
            None,
            Duration::from_secs(3600),
            &[],
        ));

        BatchCoordinator::with_catalog(config, registry, catalog(), runner).unwrap()
    }

    fn json_files(temp: &assert_fs::TempDir, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let file = temp.child(format!("file{i}.json"));
                file.write_str("{ \"key\": \"value\" }\n").unwrap();
                file.path().to_path_buf()
            })
            .collect()
    }

    #[test]
    fn test_mixed_batch() {
        let temp = assert_fs::TempDir::new().unwrap();
        let mut files = json_files(&temp, 3);

        let unknown = temp.child("notes.xyz");
        unknown.write_str("text").unwrap();
        files.push(unknown.path().to_path_buf());

        let empty = temp.child("empty.json");
        empty.touch().unwrap();
        files.push(empty.path().to_path_buf());

        let runner = FakeRunner::new();
        runner.script("alpha", vec![Step::Ok(b"{\"key\":\"value\"}".to_vec())]);
        let coordinator = coordinator(&["alpha"], runner, 2);

        let summary = coordinator
            .run(&files, Operation::Compact, ExecutionMode::Apply)
            .unwrap();

        assert_eq!(summary.total_files, 5);
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.tool_usage().get("alpha"), Some(&3));

        let sentinel = |path: &Path| {
            summary
                .results
                .iter()
                .find(|r| r.path == path)
                .map(|r| r.tool_used.clone())
        };
        assert_eq!(sentinel(unknown.path()), Some(ToolUsed::Unsupported));
        assert_eq!(sentinel(empty.path()), Some(ToolUsed::Validation));

        assert!(summary.total_size_after < summary.total_size_before);
        assert!(backup_path(&files[0]).exists());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let temp = assert_fs::TempDir::new().unwrap();
        let files = json_files(&temp, 2);

        let runner = FakeRunner::new();
        let coordinator = coordinator(&["beta"], runner.clone(), 2);

        let summary = coordinator
            .run(&files, Operation::Compact, ExecutionMode::DryRun)
            .unwrap();

        assert_eq!(summary.successful, 2);
        assert_eq!(runner.total_calls(), 0);
        for (file, result) in files.iter().zip(&summary.results) {
            assert_eq!(result.tool_used, ToolUsed::DryRun("beta".to_string()));
            assert_eq!(fs::read_to_string(file).unwrap(), "{ \"key\": \"value\" }\n");
            assert!(!backup_path(file).exists());
        }
    }

    #[test]
    fn test_no_tool_sentinel() {
        let temp = assert_fs::TempDir::new().unwrap();
        let files = json_files(&temp, 1);

        let runner = FakeRunner::new();
        let coordinator = coordinator(&[], runner.clone(), 1);

        let summary = coordinator
            .run(&files, Operation::Compact, ExecutionMode::Apply)
            .unwrap();

        assert_eq!(summary.results[0].tool_used, ToolUsed::NoTool);
        assert_eq!(runner.total_calls(), 0);
    }

    #[test]
    fn test_duplicates_processed_once() {
        let temp = assert_fs::TempDir::new().unwrap();
        let files = json_files(&temp, 2);
        let with_duplicates = vec![files[0].clone(), files[1].clone(), files[0].clone()];

        let runner = FakeRunner::new();
        runner.script("alpha", vec![Step::Ok(b"{}".to_vec())]);
        let coordinator = coordinator(&["alpha"], runner.clone(), 2);

        let summary = coordinator
            .run(&with_duplicates, Operation::Compact, ExecutionMode::Apply)
            .unwrap();

        assert_eq!(summary.total_files, 2);
        assert_eq!(runner.calls("alpha"), 2);
    }

    #[test]
    fn test_progress_runs_on_calling_thread() {
        let temp = assert_fs::TempDir::new().unwrap();
        let files = json_files(&temp, 6);

        let runner = FakeRunner::new();
        runner.script("alpha", vec![Step::Ok(b"{}".to_vec())]);
        let coordinator = coordinator(&["alpha"], runner, 3);

        let caller = std::thread::current().id();
        let mut seen = Vec::new();
        coordinator
            .run_with_progress(&files, Operation::Compact, ExecutionMode::Apply, |_, done, total| {
                assert_eq!(std::thread::current().id(), caller);
                seen.push((done, total));
            })
            .unwrap();

        assert_eq!(seen, (1..=6).map(|done| (done, 6)).collect::<Vec<_>>());
    }

    #[test]
    fn test_vanished_tool_not_selected_again() {
        let temp = assert_fs::TempDir::new().unwrap();
        let files = json_files(&temp, 5);

        let runner = FakeRunner::new();
        runner.script("alpha", vec![Step::NotFound]);
        runner.script("beta", vec![Step::Ok(b"{}".to_vec())]);
        let coordinator = coordinator(&["alpha", "beta"], runner.clone(), 1);

        let summary = coordinator
            .run(&files, Operation::Compact, ExecutionMode::Apply)
            .unwrap();

        assert_eq!(summary.successful, 5);
        assert_eq!(runner.calls("alpha"), 1);
        assert_eq!(runner.calls("beta"), 5);
        assert_eq!(coordinator.registry().peek("alpha"), Some(false));
    }

    #[test]
    fn test_failures_leave_files_intact() {
        let temp = assert_fs::TempDir::new().unwrap();
        let files = json_files(&temp, 3);

        let runner = FakeRunner::new();
        runner.script("alpha", vec![Step::Fail("unexpected token".to_string())]);
        runner.script("beta", vec![Step::Timeout]);
        let coordinator = coordinator(&["alpha", "beta"], runner, 2);

        let summary = coordinator
            .run(&files, Operation::Compact, ExecutionMode::Apply)
            .unwrap();

        assert_eq!(summary.failed, 3);
        assert_eq!(summary.total_size_before, summary.total_size_after);
        for file in &files {
            assert_eq!(fs::read_to_string(file).unwrap(), "{ \"key\": \"value\" }\n");
        }
        let error = summary.results[0].error.as_deref().unwrap();
        assert!(error.contains("alpha: unexpected token"));
    }

    #[test]
    fn test_cancelled_before_start() {
        let temp = assert_fs::TempDir::new().unwrap();
        let files = json_files(&temp, 4);

        let runner = FakeRunner::new();
        let coordinator = coordinator(&["alpha"], runner.clone(), 2);
        let cancel = AtomicBool::new(true);

        let summary = coordinator
            .run_with_cancel(&files, Operation::Compact, ExecutionMode::Apply, &cancel, |_, _, _| {})
            .unwrap();

        assert_eq!(summary.total_files, 0);
        assert_eq!(runner.total_calls(), 0);
    }

    #[test]
    fn test_preferred_tool_reorders_builtin_chain() {
        let config = Config::builder()
            .no_cache()
            .prefer_tool("js", "prettier")
            .build()
            .unwrap();
        let registry = Arc::new(ToolRegistry::with_probe(
            StaticProbe::new(&[]),
            None,
            Duration::from_secs(3600),
            &[],
        ));

        let coordinator = BatchCoordinator::with_parts(config, registry, FakeRunner::new()).unwrap();

        assert_eq!(
            coordinator.catalog().candidates("js", Operation::Reformat)[0].tool,
            "prettier"
        );
    }
}
