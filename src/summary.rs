use crate::config::{ExecutionMode, Operation};
use crate::error::{Error, Result};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Which tool produced a result, or why none did.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolUsed {
    /// The named tool transformed the file
    Tool(String),
    /// The named tool would have been used
    DryRun(String),
    /// No chain exists for the file type
    Unsupported,
    /// A chain exists but no tool in it could be used
    NoTool,
    /// The file failed pre-flight checks
    Validation,
}

impl ToolUsed {
    /// Returns the tool name, without the dry-run marker.
    #[must_use]
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            Self::Tool(name) | Self::DryRun(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for ToolUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tool(name) => f.write_str(name),
            Self::DryRun(name) => write!(f, "{name} (dry-run)"),
            Self::Unsupported => f.write_str("unsupported"),
            Self::NoTool => f.write_str("no_tool"),
            Self::Validation => f.write_str("validation"),
        }
    }
}

impl Serialize for ToolUsed {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn serialize_secs<S: Serializer>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Outcome of processing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileResult {
    /// File that was processed
    pub path: PathBuf,

    /// Whether the file was transformed (or would be, in dry-run)
    pub success: bool,

    /// Size before processing
    pub original_size: u64,

    /// Size after processing; equals `original_size` on failure
    pub final_size: u64,

    /// Tool that handled the file
    pub tool_used: ToolUsed,

    /// Time spent on this file
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,

    /// Failure diagnosis
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileResult {
    /// Creates a successful result.
    #[must_use]
    pub fn succeeded(
        path: impl Into<PathBuf>,
        original_size: u64,
        final_size: u64,
        tool_used: ToolUsed,
        elapsed: Duration,
    ) -> Self {
        Self {
            path: path.into(),
            success: true,
            original_size,
            final_size,
            tool_used,
            elapsed,
            error: None,
        }
    }

    /// Creates a failed result; the file is considered unchanged.
    #[must_use]
    pub fn failed(
        path: impl Into<PathBuf>,
        original_size: u64,
        tool_used: ToolUsed,
        elapsed: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            success: false,
            original_size,
            final_size: original_size,
            tool_used,
            elapsed,
            error: Some(error.into()),
        }
    }

    /// Returns `final_size - original_size`.
    #[must_use]
    pub fn size_change(&self) -> i64 {
        self.final_size as i64 - self.original_size as i64
    }

    /// Returns the size reduction in percent; negative when the file grew.
    #[must_use]
    pub fn size_reduction_percent(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        -(self.size_change() as f64) / self.original_size as f64 * 100.0
    }

    /// Returns the extension with a leading dot, or `(none)`.
    #[must_use]
    pub fn extension_label(&self) -> String {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or_else(|| "(none)".to_string(), |ext| format!(".{}", ext.to_ascii_lowercase()))
    }
}

/// Timing and size figures for one file extension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtensionStats {
    /// Number of files
    pub count: usize,
    /// Mean time per file in seconds
    pub avg_time: f64,
    /// Median time per file in seconds
    pub median_time: f64,
    /// Fastest file in seconds
    pub min_time: f64,
    /// Slowest file in seconds
    pub max_time: f64,
    /// Sum of all file times in seconds
    pub total_time: f64,
    /// Mean original size in bytes
    pub avg_size: f64,
}

impl ExtensionStats {
    fn from_results(results: &[&FileResult]) -> Self {
        let mut times: Vec<f64> = results.iter().map(|r| r.elapsed.as_secs_f64()).collect();
        times.sort_by(f64::total_cmp);

        let count = results.len();
        let total_time: f64 = times.iter().sum();
        let total_size: u64 = results.iter().map(|r| r.original_size).sum();

        let median_time = match count {
            0 => 0.0,
            n if n % 2 == 1 => times[n / 2],
            n => (times[n / 2 - 1] + times[n / 2]) / 2.0,
        };

        Self {
            count,
            avg_time: if count > 0 { total_time / count as f64 } else { 0.0 },
            median_time,
            min_time: times.first().copied().unwrap_or(0.0),
            max_time: times.last().copied().unwrap_or(0.0),
            total_time,
            avg_size: if count > 0 { total_size as f64 / count as f64 } else { 0.0 },
        }
    }
}

/// Aggregated outcome of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    /// Operation that was applied
    pub operation: Operation,

    /// Whether tools ran or results were estimated
    pub mode: ExecutionMode,

    /// Number of files processed
    pub total_files: usize,

    /// Files that succeeded
    pub successful: usize,

    /// Files that failed
    pub failed: usize,

    /// Sum of original sizes
    pub total_size_before: u64,

    /// Sum of final sizes
    pub total_size_after: u64,

    /// Wall time of the whole batch
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,

    /// Per-file results, sorted by path
    pub results: Vec<FileResult>,
}

impl BatchSummary {
    /// Aggregates per-file results. Results are sorted by path.
    #[must_use]
    pub fn new(
        operation: Operation,
        mode: ExecutionMode,
        mut results: Vec<FileResult>,
        elapsed: Duration,
    ) -> Self {
        results.sort_by(|a, b| a.path.cmp(&b.path));

        let successful = results.iter().filter(|r| r.success).count();

        Self {
            operation,
            mode,
            total_files: results.len(),
            successful,
            failed: results.len() - successful,
            total_size_before: results.iter().map(|r| r.original_size).sum(),
            total_size_after: results.iter().map(|r| r.final_size).sum(),
            elapsed,
            results,
        }
    }

    /// Returns the share of successful files in percent.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total_files as f64 * 100.0
    }

    /// Returns the number of bytes saved; negative when files grew.
    #[must_use]
    pub fn size_reduction(&self) -> i64 {
        self.total_size_before as i64 - self.total_size_after as i64
    }

    /// Returns the size reduction in percent of the original total.
    #[must_use]
    pub fn size_reduction_percent(&self) -> f64 {
        if self.total_size_before == 0 {
            return 0.0;
        }
        self.size_reduction() as f64 / self.total_size_before as f64 * 100.0
    }

    /// Returns the throughput in files per second.
    #[must_use]
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_files as f64 / secs
        } else {
            0.0
        }
    }

    /// Returns the mean wall time per file.
    #[must_use]
    pub fn avg_time_per_file(&self) -> Duration {
        match u32::try_from(self.total_files) {
            Ok(n) if n > 0 => self.elapsed / n,
            _ => Duration::ZERO,
        }
    }

    /// Counts how many files each tool handled successfully.
    #[must_use]
    pub fn tool_usage(&self) -> BTreeMap<String, usize> {
        let mut usage = BTreeMap::new();
        for result in self.results.iter().filter(|r| r.success) {
            if let Some(tool) = result.tool_used.tool_name() {
                *usage.entry(tool.to_string()).or_insert(0) += 1;
            }
        }
        usage
    }

    /// Computes per-extension timing and size statistics.
    #[must_use]
    pub fn extension_stats(&self) -> BTreeMap<String, ExtensionStats> {
        let mut groups: BTreeMap<String, Vec<&FileResult>> = BTreeMap::new();
        for result in &self.results {
            groups.entry(result.extension_label()).or_default().push(result);
        }

        groups
            .into_iter()
            .map(|(ext, results)| (ext, ExtensionStats::from_results(&results)))
            .collect()
    }

    /// Returns the failed results.
    pub fn failures(&self) -> impl Iterator<Item = &FileResult> {
        self.results.iter().filter(|r| !r.success)
    }

    /// Prints a human-readable summary to stdout.
    pub fn print_summary(&self) {
        let title = if self.mode.is_dry_run() {
            format!("{} (dry run)", self.operation)
        } else {
            self.operation.to_string()
        };

        println!("\n╔═══════════════════════════════════════════════════════╗");
        println!("║ Summary: {:<44} ║", title);
        println!("╠═══════════════════════════════════════════════════════╣");
        println!("║ Files Processed:      {:>8}                        ║", self.total_files);
        println!("║   - Successful:       {:>8}                        ║", self.successful);
        println!("║   - Failed:           {:>8}                        ║", self.failed);
        println!("║ Success Rate:         {:>8.1}%                       ║", self.success_rate());
        println!("║                                                       ║");
        println!("║ Size Before:          {:>8} bytes                  ║", self.total_size_before);
        println!("║ Size After:           {:>8} bytes                  ║", self.total_size_after);
        println!("║ Reduction:            {:>8.1}%                       ║", self.size_reduction_percent());
        println!("║                                                       ║");
        println!("║ Elapsed:              {:>8.2}s                       ║", self.elapsed.as_secs_f64());
        println!("║ Throughput:           {:>8.1} files/s                ║", self.files_per_second());

        let usage = self.tool_usage();
        if !usage.is_empty() {
            println!("║                                                       ║");
            println!("║ Tools Used:                                           ║");
            for (tool, count) in &usage {
                println!("║   - {:<24} {:>8}                  ║", tool, count);
            }
        }

        if self.mode.is_dry_run() {
            println!("║                                                       ║");
            println!("║ ⚠ No files were modified (dry run mode)               ║");
        }
        println!("╚═══════════════════════════════════════════════════════╝\n");
    }

    /// Writes a JSON report with the summary and derived statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be serialized or written.
    pub fn write_report(&self, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct Report<'a> {
            generated_at: String,
            #[serde(flatten)]
            summary: &'a BatchSummary,
            success_rate: f64,
            size_reduction_percent: f64,
            files_per_second: f64,
            tool_usage: BTreeMap<String, usize>,
            extension_stats: BTreeMap<String, ExtensionStats>,
        }

        let report = Report {
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            summary: self,
            success_rate: self.success_rate(),
            size_reduction_percent: self.size_reduction_percent(),
            files_per_second: self.files_per_second(),
            tool_usage: self.tool_usage(),
            extension_stats: self.extension_stats(),
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
        serde_json::to_writer_pretty(file, &report)?;

        info!("Wrote report to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    fn ok(path: &str, before: u64, after: u64, tool: ToolUsed, millis: u64) -> FileResult {
        FileResult::succeeded(path, before, after, tool, Duration::from_millis(millis))
    }

    fn sample() -> BatchSummary {
        BatchSummary::new(
            Operation::Compact,
            ExecutionMode::Apply,
            vec![
                ok("/p/b.js", 1000, 600, ToolUsed::Tool("esbuild".into()), 30),
                ok("/p/a.js", 500, 400, ToolUsed::Tool("esbuild".into()), 10),
                ok("/p/c.css", 200, 150, ToolUsed::Tool("lightningcss".into()), 20),
                FileResult::failed(
                    "/p/d.xyz",
                    100,
                    ToolUsed::Unsupported,
                    Duration::ZERO,
                    "No compact tools available for .xyz",
                ),
            ],
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_aggregates() {
        let summary = sample();

        assert_eq!(summary.total_files, 4);
        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_size_before, 1800);
        assert_eq!(summary.total_size_after, 1250);
        assert_eq!(summary.size_reduction(), 550);
        assert!((summary.success_rate() - 75.0).abs() < f64::EPSILON);
        assert!((summary.files_per_second() - 2.0).abs() < f64::EPSILON);
        assert_eq!(summary.avg_time_per_file(), Duration::from_millis(500));
        assert_eq!(summary.failures().count(), 1);
    }

    #[test]
    fn test_results_sorted_by_path() {
        let summary = sample();
        let paths: Vec<_> = summary.results.iter().map(|r| r.path.clone()).collect();

        assert_eq!(
            paths,
            vec![
                PathBuf::from("/p/a.js"),
                PathBuf::from("/p/b.js"),
                PathBuf::from("/p/c.css"),
                PathBuf::from("/p/d.xyz"),
            ]
        );
    }

    #[test]
    fn test_tool_usage_strips_dry_run() {
        let summary = BatchSummary::new(
            Operation::Reformat,
            ExecutionMode::DryRun,
            vec![
                ok("/p/a.py", 100, 105, ToolUsed::DryRun("ruff".into()), 1),
                ok("/p/b.py", 100, 105, ToolUsed::DryRun("ruff".into()), 1),
                ok("/p/c.ts", 100, 102, ToolUsed::Tool("biome".into()), 1),
            ],
            Duration::from_millis(10),
        );

        let usage = summary.tool_usage();
        assert_eq!(usage.get("ruff"), Some(&2));
        assert_eq!(usage.get("biome"), Some(&1));
        assert_eq!(usage.len(), 2);
    }

    #[test]
    fn test_extension_stats() {
        let stats = sample().extension_stats();
        let js = &stats[".js"];

        assert_eq!(js.count, 2);
        assert!((js.median_time - 0.02).abs() < 1e-9);
        assert!((js.min_time - 0.01).abs() < 1e-9);
        assert!((js.max_time - 0.03).abs() < 1e-9);
        assert!((js.avg_size - 750.0).abs() < 1e-9);
        assert_eq!(stats[".xyz"].count, 1);
    }

    #[test]
    fn test_tool_used_labels() {
        assert_eq!(ToolUsed::DryRun("esbuild".into()).to_string(), "esbuild (dry-run)");
        assert_eq!(ToolUsed::NoTool.to_string(), "no_tool");
        assert_eq!(ToolUsed::Validation.to_string(), "validation");
        assert_eq!(ToolUsed::Unsupported.tool_name(), None);
    }

    #[test]
    fn test_file_result_size_change() {
        let grown = ok("/p/a.json", 100, 110, ToolUsed::Tool("biome".into()), 1);
        assert_eq!(grown.size_change(), 10);
        assert!((grown.size_reduction_percent() + 10.0).abs() < 1e-9);

        let failed = FileResult::failed("/p/a.json", 100, ToolUsed::NoTool, Duration::ZERO, "x");
        assert_eq!(failed.final_size, 100);
    }

    #[test]
    fn test_write_report() {
        let temp = assert_fs::TempDir::new().unwrap();
        let report = temp.child("reports/run.json");

        sample().write_report(report.path()).unwrap();

        let raw = std::fs::read_to_string(report.path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["operation"], "compact");
        assert_eq!(json["mode"], "apply");
        assert_eq!(json["total_files"], 4);
        assert_eq!(json["tool_usage"]["esbuild"], 2);
        assert_eq!(json["results"][3]["tool_used"], "unsupported");
        assert!(json["generated_at"].is_string());
    }
}
