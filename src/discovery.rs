//! Expansion of command-line inputs into the files a batch will process.

use crate::catalog::{extension_of, CommandCatalog};
use crate::config::{Config, Operation};
use crate::error::{Error, Result};
use crate::install::is_artifact;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{WalkBuilder, WalkState};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace, warn};

/// Finds files under directories, honoring `.gitignore` and exclude globs.
///
/// Only files whose extension has a fallback chain for the operation are
/// kept. Files passed explicitly are always kept, so the batch can report
/// why they were not processed.
#[derive(Debug, Clone)]
pub struct Discovery {
    excludes: GlobSet,
    extensions: HashSet<String>,
}

impl Discovery {
    /// Creates a discovery pass for `operation`.
    ///
    /// # Errors
    ///
    /// Returns an error if an exclude pattern is not a valid glob.
    pub fn new(config: &Config, catalog: &CommandCatalog, operation: Operation) -> Result<Self> {
        Ok(Self {
            excludes: build_globset(&config.exclude_patterns)?,
            extensions: catalog
                .extensions(operation)
                .into_iter()
                .map(ToString::to_string)
                .collect(),
        })
    }

    /// Returns true if `path`, taken relative to `root`, matches an exclude pattern.
    #[must_use]
    pub fn is_excluded(&self, path: &Path, root: &Path) -> bool {
        let relative = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
        self.excludes.is_match(relative)
    }

    /// Returns true if a walked file should be processed.
    fn accepts(&self, path: &Path, root: &Path) -> bool {
        if is_artifact(path) {
            return false;
        }
        if !self.extensions.contains(&extension_of(path)) {
            return false;
        }
        !self.is_excluded(path, root)
    }

    /// Expands files and directories into a sorted, de-duplicated file list.
    ///
    /// # Errors
    ///
    /// Returns an error if an input does not exist, or if nothing was found.
    pub fn collect(&self, inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for input in inputs {
            if input.is_file() {
                files.push(input.clone());
            } else if input.is_dir() {
                files.extend(self.walk(input));
            } else {
                return Err(Error::io(
                    input,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
                ));
            }
        }

        files.sort();
        files.dedup();

        if files.is_empty() {
            let root = inputs.first().cloned().unwrap_or_else(|| PathBuf::from("."));
            return Err(Error::no_files(root));
        }

        debug!("Discovered {} files", files.len());
        Ok(files)
    }

    fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let found = Arc::new(Mutex::new(Vec::new()));

        debug!("Starting parallel scan of {}", root.display());

        let walker = WalkBuilder::new(root)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .require_git(false)
            .hidden(true)
            .follow_links(false)
            .threads(num_cpus::get())
            .build_parallel();

        walker.run(|| {
            let found = Arc::clone(&found);
            Box::new(move |result| {
                match result {
                    Ok(entry) if entry.file_type().is_some_and(|ft| ft.is_file()) => {
                        let path = entry.path();
                        if self.accepts(path, root) {
                            trace!("Found {}", path.display());
                            found
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push(path.to_path_buf());
                        }
                    }
                    Err(e) => warn!("Walk error: {}", e),
                    _ => {}
                }
                WalkState::Continue
            })
        });

        let mut found = found.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *found)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();

    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| Error::invalid_pattern(pattern, e.to_string()))?;
        builder.add(glob);
    }

    builder
        .build()
        .map_err(|e| Error::config(format!("Failed to build glob set: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    fn discovery(config: &Config, operation: Operation) -> Discovery {
        Discovery::new(config, &CommandCatalog::builtin(), operation).unwrap()
    }

    fn names(files: &[PathBuf], root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|f| {
                pathdiff::diff_paths(f, root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_keeps_supported_extensions() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("src/app.js").write_str("a").unwrap();
        temp.child("src/style.css").write_str("b").unwrap();
        temp.child("src/main.py").write_str("c").unwrap();
        temp.child("README.txt").write_str("d").unwrap();

        let config = Config::builder().no_cache().build().unwrap();
        let files = discovery(&config, Operation::Compact)
            .collect(&[temp.path().to_path_buf()])
            .unwrap();

        assert_eq!(names(&files, temp.path()), vec!["src/app.js", "src/style.css"]);
    }

    #[test]
    fn test_default_excludes_and_artifacts() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("app.js").write_str("a").unwrap();
        temp.child("app.min.js").write_str("a").unwrap();
        temp.child("node_modules/lib/index.js").write_str("a").unwrap();
        temp.child("dist/bundle.js").write_str("a").unwrap();
        temp.child("app.js.formi_backup").write_str("a").unwrap();

        let config = Config::builder().no_cache().build().unwrap();
        let files = discovery(&config, Operation::Compact)
            .collect(&[temp.path().to_path_buf()])
            .unwrap();

        assert_eq!(names(&files, temp.path()), vec!["app.js"]);
    }

    #[test]
    fn test_gitignore_respected() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child(".gitignore").write_str("generated/\n").unwrap();
        temp.child("generated/schema.json").write_str("{}").unwrap();
        temp.child("config.json").write_str("{}").unwrap();

        let config = Config::builder().no_cache().build().unwrap();
        let files = discovery(&config, Operation::Reformat)
            .collect(&[temp.path().to_path_buf()])
            .unwrap();

        assert_eq!(names(&files, temp.path()), vec!["config.json"]);
    }

    #[test]
    fn test_custom_excludes() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("keep/a.py").write_str("a").unwrap();
        temp.child("vendor/b.py").write_str("b").unwrap();

        let config = Config::builder()
            .no_cache()
            .exclude(vec!["**/vendor/**".to_string()])
            .build()
            .unwrap();
        let files = discovery(&config, Operation::Reformat)
            .collect(&[temp.path().to_path_buf()])
            .unwrap();

        assert_eq!(names(&files, temp.path()), vec!["keep/a.py"]);
    }

    #[test]
    fn test_explicit_files_always_kept() {
        let temp = assert_fs::TempDir::new().unwrap();
        let odd = temp.child("notes.xyz");
        odd.write_str("x").unwrap();
        let js = temp.child("a.js");
        js.write_str("x").unwrap();

        let config = Config::builder().no_cache().build().unwrap();
        let files = discovery(&config, Operation::Compact)
            .collect(&[
                odd.path().to_path_buf(),
                js.path().to_path_buf(),
                js.path().to_path_buf(),
            ])
            .unwrap();

        assert_eq!(names(&files, temp.path()), vec!["a.js", "notes.xyz"]);
    }

    #[test]
    fn test_missing_input_and_empty_result() {
        let temp = assert_fs::TempDir::new().unwrap();
        let config = Config::builder().no_cache().build().unwrap();
        let discovery = discovery(&config, Operation::Compact);

        let missing = discovery.collect(&[temp.path().join("missing")]);
        assert!(missing.unwrap_err().is_io());

        temp.child("only.md").write_str("# hi").unwrap();
        let empty = discovery.collect(&[temp.path().to_path_buf()]);
        assert!(matches!(empty, Err(Error::NoFiles { .. })));
    }
}
