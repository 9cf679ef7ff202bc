//! Fallback chains of external tools per file extension.
//!
//! Each `(extension, operation)` pair maps to an ordered list of
//! [`CommandCandidate`]s. The order is the priority order: the fastest tool
//! comes first. Chains are built once and never reordered while running;
//! missing tools are skipped by the executor, not removed here.

use crate::config::Operation;
use crate::registry::ToolRegistry;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::Path;

/// Placeholder replaced with the file being processed.
pub const INPUT_PLACEHOLDER: &str = "{input}";
/// Placeholder replaced with the path the tool should write to.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// How a tool hands back its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The tool rewrites the input file itself.
    InPlace,
    /// The tool writes the result to the `{output}` path.
    OutputFile,
    /// The tool prints the result to standard output.
    Stdout,
}

impl Delivery {
    /// Returns true if the result has to be installed by formi.
    #[must_use]
    pub const fn needs_install(self) -> bool {
        !matches!(self, Self::InPlace)
    }
}

/// One tool invocation that can handle an extension/operation pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandCandidate {
    /// Tool name, also the executable looked up on `PATH`
    pub tool: String,
    /// Arguments passed to the tool, with placeholders
    pub args: Vec<String>,
    /// How the tool delivers its result
    pub delivery: Delivery,
}

impl CommandCandidate {
    /// Creates a candidate.
    #[must_use]
    pub fn new<I, S>(tool: impl Into<String>, args: I, delivery: Delivery) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tool: tool.into(),
            args: args.into_iter().map(Into::into).collect(),
            delivery,
        }
    }

    /// Substitutes the placeholders with concrete paths.
    #[must_use]
    pub fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();

        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

/// Normalizes `".JS"`, `"js"` and `"Js"` to `"js"`.
#[must_use]
pub fn normalize_extension(ext: &str) -> String {
    ext.trim_start_matches('.').to_ascii_lowercase()
}

/// Returns the normalized extension of a path, or an empty string.
#[must_use]
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(normalize_extension)
        .unwrap_or_default()
}

/// Lookup table from extension to fallback chain, one per operation.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    compact: HashMap<String, Vec<CommandCandidate>>,
    reformat: HashMap<String, Vec<CommandCandidate>>,
}

static BUILTIN: Lazy<CommandCatalog> = Lazy::new(CommandCatalog::build_builtin);

impl CommandCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        BUILTIN.clone()
    }

    /// Appends a candidate to the end of a chain.
    pub fn register(&mut self, ext: &str, operation: Operation, candidate: CommandCandidate) {
        self.table_mut(operation)
            .entry(normalize_extension(ext))
            .or_default()
            .push(candidate);
    }

    /// Moves `tool` to the front of every chain for `ext`.
    ///
    /// Chains that do not contain the tool are left untouched.
    #[must_use]
    pub fn with_preference(mut self, ext: &str, tool: &str) -> Self {
        let ext = normalize_extension(ext);
        for table in [&mut self.compact, &mut self.reformat] {
            if let Some(chain) = table.get_mut(&ext) {
                if let Some(pos) = chain.iter().position(|c| c.tool == tool) {
                    let preferred = chain.remove(pos);
                    chain.insert(0, preferred);
                }
            }
        }
        self
    }

    /// Returns the ordered candidates for an extension, possibly empty.
    #[must_use]
    pub fn candidates(&self, ext: &str, operation: Operation) -> &[CommandCandidate] {
        self.table(operation)
            .get(&normalize_extension(ext))
            .map_or(&[][..], Vec::as_slice)
    }

    /// Returns true if any chain exists for the extension, regardless of tools installed.
    #[must_use]
    pub fn has_chain(&self, ext: &str, operation: Operation) -> bool {
        !self.candidates(ext, operation).is_empty()
    }

    /// Returns true if at least one candidate tool for the extension is available.
    ///
    /// Stops at the first available tool.
    #[must_use]
    pub fn supports_operation(
        &self,
        ext: &str,
        operation: Operation,
        registry: &ToolRegistry,
    ) -> bool {
        self.candidates(ext, operation)
            .iter()
            .any(|c| registry.is_available(&c.tool))
    }

    /// Returns the extensions that have a chain for the operation, sorted.
    #[must_use]
    pub fn extensions(&self, operation: Operation) -> Vec<&str> {
        let mut exts: Vec<&str> = self.table(operation).keys().map(String::as_str).collect();
        exts.sort_unstable();
        exts
    }

    /// Returns every distinct tool referenced by the catalog, sorted.
    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        let mut tools: Vec<&str> = self
            .compact
            .values()
            .chain(self.reformat.values())
            .flatten()
            .map(|c| c.tool.as_str())
            .collect();
        tools.sort_unstable();
        tools.dedup();
        tools
    }

    const fn table(&self, operation: Operation) -> &HashMap<String, Vec<CommandCandidate>> {
        match operation {
            Operation::Compact => &self.compact,
            Operation::Reformat => &self.reformat,
        }
    }

    fn table_mut(&mut self, operation: Operation) -> &mut HashMap<String, Vec<CommandCandidate>> {
        match operation {
            Operation::Compact => &mut self.compact,
            Operation::Reformat => &mut self.reformat,
        }
    }

    fn add_chain(&mut self, exts: &[&str], operation: Operation, chain: &[CommandCandidate]) {
        for ext in exts {
            for candidate in chain {
                self.register(ext, operation, candidate.clone());
            }
        }
    }

    fn build_builtin() -> Self {
        use Delivery::{InPlace, OutputFile, Stdout};
        use Operation::{Compact, Reformat};

        let esbuild = CommandCandidate::new(
            "esbuild",
            ["{input}", "--minify", "--outfile={output}"],
            OutputFile,
        );
        let swc = CommandCandidate::new("swc", ["{input}", "--minify", "-o", "{output}"], OutputFile);
        let terser = CommandCandidate::new("terser", ["{input}", "-c", "-m", "-o", "{output}"], OutputFile);
        let lightningcss = CommandCandidate::new(
            "lightningcss",
            ["{input}", "-o", "{output}", "--minify"],
            OutputFile,
        );
        let html_minifier = CommandCandidate::new(
            "html-minifier-terser",
            [
                "{input}",
                "-o",
                "{output}",
                "--collapse-whitespace",
                "--remove-comments",
            ],
            OutputFile,
        );
        let biome = CommandCandidate::new("biome", ["format", "--write", "{input}"], InPlace);
        let prettier = CommandCandidate::new("prettier", ["--write", "{input}"], InPlace);
        let dprint = CommandCandidate::new("dprint", ["fmt", "{input}"], InPlace);
        let ruff = CommandCandidate::new("ruff", ["format", "{input}"], InPlace);
        let black = CommandCandidate::new("black", ["{input}"], InPlace);
        let taplo = CommandCandidate::new("taplo", ["fmt", "{input}"], InPlace);
        let yq = CommandCandidate::new("yq", ["-i", "e", ".", "{input}"], InPlace);

        let mut catalog = Self::new();

        // compact
        catalog.add_chain(&["js"], Compact, &[esbuild.clone(), swc.clone(), terser]);
        catalog.add_chain(&["ts", "jsx", "tsx"], Compact, &[esbuild, swc]);
        catalog.add_chain(&["css"], Compact, &[lightningcss.clone(), biome.clone()]);
        catalog.add_chain(&["scss"], Compact, &[lightningcss]);
        catalog.add_chain(&["html", "htm"], Compact, &[html_minifier]);
        catalog.add_chain(
            &["json"],
            Compact,
            &[CommandCandidate::new("jq", ["-c", ".", "{input}"], Stdout)],
        );
        catalog.add_chain(&["jsonc"], Compact, &[biome.clone()]);

        // reformat
        catalog.add_chain(&["py"], Reformat, &[ruff, black]);
        catalog.add_chain(
            &["js", "ts"],
            Reformat,
            &[biome.clone(), prettier.clone(), dprint.clone()],
        );
        catalog.add_chain(
            &["jsx", "tsx", "css", "scss"],
            Reformat,
            &[biome.clone(), prettier.clone()],
        );
        catalog.add_chain(&["html"], Reformat, &[prettier.clone(), biome.clone()]);
        catalog.add_chain(
            &["json"],
            Reformat,
            &[
                biome,
                prettier.clone(),
                CommandCandidate::new("jq", [".", "{input}"], Stdout),
            ],
        );
        catalog.add_chain(&["toml"], Reformat, &[taplo, dprint.clone()]);
        catalog.add_chain(&["yaml", "yml"], Reformat, &[prettier.clone(), yq]);
        catalog.add_chain(&["md"], Reformat, &[dprint, prettier]);

        catalog
    }
}
