//! Synthetic results for dry runs.

use crate::catalog::{extension_of, CommandCatalog};
use crate::config::Operation;
use crate::registry::ToolRegistry;
use crate::summary::{FileResult, ToolUsed};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Estimated `final / original` size ratios per extension.
#[derive(Debug, Clone, PartialEq)]
pub struct SizeFactors {
    compact: HashMap<String, f64>,
    reformat: HashMap<String, f64>,
    compact_default: f64,
    reformat_default: f64,
}

impl SizeFactors {
    /// Ratio for compacting files without a specific factor.
    pub const DEFAULT_COMPACT: f64 = 0.90;
    /// Ratio for reformatting files without a specific factor.
    pub const DEFAULT_REFORMAT: f64 = 1.00;

    /// Built-in compact ratios.
    pub const COMPACT: &'static [(&'static str, f64)] =
        &[("js", 0.65), ("css", 0.70), ("html", 0.75), ("json", 0.80)];

    /// Built-in reformat ratios.
    pub const REFORMAT: &'static [(&'static str, f64)] = &[
        ("py", 1.05),
        ("js", 1.02),
        ("ts", 1.02),
        ("css", 1.03),
        ("json", 1.10),
        ("html", 1.05),
    ];

    /// Overrides the ratio for one extension and operation.
    #[must_use]
    pub fn with_factor(mut self, ext: &str, operation: Operation, factor: f64) -> Self {
        let ext = crate::catalog::normalize_extension(ext);
        match operation {
            Operation::Compact => self.compact.insert(ext, factor),
            Operation::Reformat => self.reformat.insert(ext, factor),
        };
        self
    }

    /// Returns the ratio for an extension.
    #[must_use]
    pub fn factor(&self, ext: &str, operation: Operation) -> f64 {
        let (table, default) = match operation {
            Operation::Compact => (&self.compact, self.compact_default),
            Operation::Reformat => (&self.reformat, self.reformat_default),
        };
        table.get(ext).copied().unwrap_or(default)
    }

    /// Returns the estimated size after the operation, truncated to whole bytes.
    #[must_use]
    pub fn estimate(&self, ext: &str, operation: Operation, original_size: u64) -> u64 {
        (original_size as f64 * self.factor(ext, operation)) as u64
    }
}

fn factor_table(entries: &[(&str, f64)]) -> HashMap<String, f64> {
    entries
        .iter()
        .map(|(ext, factor)| ((*ext).to_string(), *factor))
        .collect()
}

impl Default for SizeFactors {
    fn default() -> Self {
        Self {
            compact: factor_table(Self::COMPACT),
            reformat: factor_table(Self::REFORMAT),
            compact_default: Self::DEFAULT_COMPACT,
            reformat_default: Self::DEFAULT_REFORMAT,
        }
    }
}

/// Predicts what a run would do without spawning tools or touching files.
pub struct DryRunEstimator {
    registry: Arc<ToolRegistry>,
    catalog: Arc<CommandCatalog>,
    factors: SizeFactors,
}

impl DryRunEstimator {
    /// Creates an estimator with the built-in size factors.
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>, catalog: Arc<CommandCatalog>) -> Self {
        Self {
            registry,
            catalog,
            factors: SizeFactors::default(),
        }
    }

    /// Replaces the size factors.
    #[must_use]
    pub fn with_factors(mut self, factors: SizeFactors) -> Self {
        self.factors = factors;
        self
    }

    /// Estimates the result of applying `operation` to `file`.
    ///
    /// The label names the first available candidate. Fails with
    /// [`ToolUsed::NoTool`] when no candidate is available.
    #[must_use]
    pub fn estimate(&self, file: &Path, operation: Operation, original_size: u64) -> FileResult {
        let start = Instant::now();
        let ext = extension_of(file);

        let chosen = self
            .catalog
            .candidates(&ext, operation)
            .iter()
            .find(|c| self.registry.is_available(&c.tool));

        match chosen {
            Some(candidate) => FileResult::succeeded(
                file,
                original_size,
                self.factors.estimate(&ext, operation, original_size),
                ToolUsed::DryRun(candidate.tool.clone()),
                start.elapsed(),
            ),
            None => FileResult::failed(
                file,
                original_size,
                ToolUsed::NoTool,
                start.elapsed(),
                format!("No {operation} tools available for .{ext}"),
            ),
        }
    }
}
