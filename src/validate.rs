//! Pre-flight checks run on each file before any tool touches it.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

static BINARY_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "exe", "dll", "so", "dylib", "bin", "app", "a", "o", "obj", "lib", "png", "jpg", "jpeg",
        "gif", "bmp", "tiff", "ico", "webp", "mp3", "mp4", "avi", "mkv", "mov", "wav", "flac",
        "ogg", "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "tar", "gz", "bz2",
        "xz", "7z", "rar", "ttf", "otf", "woff", "woff2", "wasm", "class", "jar", "war", "pyc",
        "pyo", "pyd",
    ]
    .into_iter()
    .collect()
});

static TEXT_EXTENSIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "txt", "md", "rst", "log", "ini", "cfg", "conf", "json", "jsonc", "xml", "yaml", "yml",
        "toml", "csv", "js", "ts", "jsx", "tsx", "mjs", "cjs", "py", "pyi", "rb", "php", "sh",
        "css", "scss", "sass", "less", "html", "htm", "xhtml", "c", "cpp", "h", "hpp", "java",
        "go", "rs", "swift", "sql", "graphql", "proto",
    ]
    .into_iter()
    .collect()
});

/// Why a file was rejected before processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Nothing exists at the path.
    #[error("File does not exist")]
    Missing,

    /// The path is a directory or special file.
    #[error("Path is not a regular file")]
    NotAFile,

    /// The file has no content.
    #[error("Empty file")]
    Empty,

    /// The file exceeds the configured limit.
    #[error("File too large ({size} bytes, limit {limit})")]
    TooLarge {
        /// Actual size
        size: u64,
        /// Configured maximum
        limit: u64,
    },

    /// The file cannot be replaced.
    #[error("File is read-only")]
    ReadOnly,

    /// The file looks like binary data.
    #[error("Binary file detected")]
    Binary,

    /// Metadata or content could not be read.
    #[error("Cannot inspect file: {0}")]
    Unreadable(String),
}

/// Checks that `path` is a writable, non-empty text file within `max_size`.
///
/// Returns the file size on success.
///
/// # Errors
///
/// Returns the first check that failed.
pub fn validate_file(path: &Path, max_size: u64) -> Result<u64, ValidationError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(ValidationError::Missing),
        Err(e) => return Err(ValidationError::Unreadable(e.to_string())),
    };

    if !metadata.is_file() {
        return Err(ValidationError::NotAFile);
    }

    let size = metadata.len();
    if size == 0 {
        return Err(ValidationError::Empty);
    }
    if size > max_size {
        return Err(ValidationError::TooLarge {
            size,
            limit: max_size,
        });
    }

    if metadata.permissions().readonly() {
        return Err(ValidationError::ReadOnly);
    }

    let binary = is_likely_binary(path).map_err(|e| ValidationError::Unreadable(e.to_string()))?;
    if binary {
        return Err(ValidationError::Binary);
    }

    Ok(size)
}

/// Determines if a file is likely binary.
///
/// # Algorithm
///
/// 1. Known binary extensions are binary, known text extensions are text
/// 2. Otherwise the first 8KB are sampled
/// 3. Any null byte, or more than 5% control characters, means binary
///
/// Bytes above 127 are not counted against the file, so UTF-8 text passes.
pub(crate) fn is_likely_binary(path: &Path) -> std::io::Result<bool> {
    const BUFFER_SIZE: usize = 8192;
    const CONTROL_THRESHOLD: f64 = 0.05;

    if has_binary_extension(path) {
        return Ok(true);
    }
    if has_text_extension(path) {
        return Ok(false);
    }

    let file = File::open(path)?;
    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut buffer = [0u8; BUFFER_SIZE];

    let bytes_read = reader.read(&mut buffer)?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let sample = &buffer[..bytes_read];

    if memchr::memchr(0, sample).is_some() {
        return Ok(true);
    }

    let control = sample
        .iter()
        .filter(|&&b| b < 32 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0c))
        .count();

    Ok(control as f64 / bytes_read as f64 > CONTROL_THRESHOLD)
}

fn extension_matches(path: &Path, set: &HashSet<&'static str>) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| set.contains(ext.to_ascii_lowercase().as_str()))
}

/// Checks if a file extension suggests a binary file.
#[must_use]
pub(crate) fn has_binary_extension(path: &Path) -> bool {
    extension_matches(path, &BINARY_EXTENSIONS)
}

/// Checks if a file extension suggests a text file.
#[must_use]
pub(crate) fn has_text_extension(path: &Path) -> bool {
    extension_matches(path, &TEXT_EXTENSIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_valid_text_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("app.js");
        file.write_str("const a = 1;\n").unwrap();

        assert_eq!(validate_file(file.path(), 1024), Ok(13));
    }

    #[test]
    fn test_missing_and_directory() {
        let temp = assert_fs::TempDir::new().unwrap();

        assert_eq!(
            validate_file(&temp.path().join("nope.js"), 1024),
            Err(ValidationError::Missing)
        );
        assert_eq!(validate_file(temp.path(), 1024), Err(ValidationError::NotAFile));
    }

    #[test]
    fn test_empty_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("empty.css");
        file.touch().unwrap();

        assert_eq!(validate_file(file.path(), 1024), Err(ValidationError::Empty));
    }

    #[test]
    fn test_size_limit() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("big.json");
        file.write_str(&"1".repeat(100)).unwrap();

        assert_eq!(
            validate_file(file.path(), 50),
            Err(ValidationError::TooLarge {
                size: 100,
                limit: 50
            })
        );
    }

    #[test]
    fn test_readonly_file() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("locked.py");
        file.write_str("x = 1\n").unwrap();

        let mut permissions = fs::metadata(file.path()).unwrap().permissions();
        permissions.set_readonly(true);
        fs::set_permissions(file.path(), permissions).unwrap();

        assert_eq!(validate_file(file.path(), 1024), Err(ValidationError::ReadOnly));
    }

    #[test]
    fn test_binary_detection() {
        let temp = assert_fs::TempDir::new().unwrap();

        let blob = temp.child("data.unknown");
        blob.write_binary(&[0u8; 100]).unwrap();
        assert_eq!(validate_file(blob.path(), 1024), Err(ValidationError::Binary));

        let image = temp.child("logo.PNG");
        image.write_str("not really a png").unwrap();
        assert!(is_likely_binary(image.path()).unwrap());

        let utf8 = temp.child("notes.unknown");
        utf8.write_str("héllo wörld, привет мир\n").unwrap();
        assert!(!is_likely_binary(utf8.path()).unwrap());
    }

    #[test]
    fn test_extension_sets() {
        assert!(has_binary_extension(Path::new("app.exe")));
        assert!(has_binary_extension(Path::new("font.woff2")));
        assert!(!has_binary_extension(Path::new("code.rs")));
        assert!(has_text_extension(Path::new("config.TOML")));
        assert!(!has_text_extension(Path::new("no_extension")));
    }
}
