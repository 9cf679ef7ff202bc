use crate::error::{Error, Result};
use ignore::WalkBuilder;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix of the pre-write copy kept next to a replaced file.
pub const BACKUP_SUFFIX: &str = ".formi_backup";
/// Suffix of the staging file written before the final rename.
pub const TEMP_SUFFIX: &str = ".formi_temp";
/// Marker in the name of scratch files that tools write their output to.
pub const SCRATCH_MARKER: &str = ".formi_out";

/// Returns `<path>.formi_backup`.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, BACKUP_SUFFIX)
}

/// Returns `<path>.formi_temp`.
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, TEMP_SUFFIX)
}

/// Returns true if the path is a file formi itself creates.
#[must_use]
pub fn is_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };

    name.ends_with(BACKUP_SUFFIX)
        || name.ends_with(TEMP_SUFFIX)
        || (name.starts_with('.') && name.contains(SCRATCH_MARKER))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Commits new file contents to disk transactionally.
///
/// # Process
///
/// 1. Copies the current target to `<path>.formi_backup` if backups are enabled
/// 2. Writes the new bytes to `<path>.formi_temp` and syncs it
/// 3. Renames the temporary file onto the target
///
/// A reader sees either the old or the new contents, never a partial write.
/// Backups are never removed here; see [`cleanup_artifacts`].
#[derive(Debug, Clone, Copy)]
pub struct FileInstaller {
    make_backup: bool,
}

impl FileInstaller {
    /// Creates an installer.
    #[must_use]
    pub const fn new(make_backup: bool) -> Self {
        Self { make_backup }
    }

    /// Atomically replaces `path` with `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup, the temporary write or the rename fails.
    /// On failure the temporary file is removed and the target is left as it
    /// was; if the target went missing it is restored from the backup.
    pub fn install(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let existing = fs::metadata(path).ok().filter(fs::Metadata::is_file);

        if existing.is_some() {
            self.backup(path)?;
        }

        let temp = temp_path(path);
        let result = write_and_swap(path, &temp, bytes, existing.as_ref());

        if let Err(e) = result {
            if temp.exists() {
                let _ = fs::remove_file(&temp);
            }
            self.restore_if_missing(path);
            return Err(e);
        }

        debug!("Installed {} bytes into {}", bytes.len(), path.display());
        Ok(())
    }

    /// Writes the backup copy of `path` if backups are enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the copy fails.
    pub fn backup(&self, path: &Path) -> Result<()> {
        if !self.make_backup {
            return Ok(());
        }

        let backup = backup_path(path);
        fs::copy(path, &backup).map_err(|e| Error::io(&backup, e))?;
        debug!("Created backup: {}", backup.display());
        Ok(())
    }

    /// Writes `original` as the backup of `path` if backups are enabled.
    ///
    /// Used when the target was already rewritten by someone else and only
    /// its previous contents are left in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the backup cannot be written.
    pub fn backup_contents(&self, path: &Path, original: &[u8]) -> Result<()> {
        if !self.make_backup {
            return Ok(());
        }

        let backup = backup_path(path);
        fs::write(&backup, original).map_err(|e| Error::io(&backup, e))?;
        debug!("Created backup: {}", backup.display());
        Ok(())
    }

    fn restore_if_missing(&self, path: &Path) {
        if !self.make_backup || path.exists() {
            return;
        }

        let backup = backup_path(path);
        if backup.exists() {
            match fs::copy(&backup, path) {
                Ok(_) => warn!("Restored {} from backup", path.display()),
                Err(e) => warn!("Failed to restore {} from backup: {}", path.display(), e),
            }
        }
    }
}

impl Default for FileInstaller {
    fn default() -> Self {
        Self::new(true)
    }
}

fn write_and_swap(
    path: &Path,
    temp: &Path,
    bytes: &[u8],
    existing: Option<&fs::Metadata>,
) -> Result<()> {
    let mut temp_file = fs::File::create(temp).map_err(|e| Error::io(temp, e))?;

    temp_file.write_all(bytes).map_err(|e| Error::io(temp, e))?;

    // Ensure data is flushed to disk before it becomes visible under the real name
    temp_file.sync_all().map_err(|e| Error::io(temp, e))?;

    drop(temp_file);

    if let Some(metadata) = existing {
        fs::set_permissions(temp, metadata.permissions()).map_err(|e| Error::io(temp, e))?;
    }

    // rename() does not replace an existing file on Windows
    if cfg!(windows) && existing.is_some() {
        fs::remove_file(path).map_err(|e| Error::io(path, e))?;
    }

    fs::rename(temp, path).map_err(|e| Error::io(path, e))
}

/// Removes every backup, temporary and scratch file under `dir`.
///
/// Returns the number of files removed.
///
/// # Errors
///
/// Returns an error if `dir` is not a directory or a file cannot be removed.
pub fn cleanup_artifacts(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Err(Error::io(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let walker = WalkBuilder::new(dir)
        .standard_filters(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    let mut removed = 0;
    for entry in walker.flatten() {
        let path = entry.path();
        let is_file = entry.file_type().is_some_and(|t| t.is_file());

        if is_file && is_artifact(path) {
            fs::remove_file(path).map_err(|e| Error::io(path, e))?;
            removed += 1;
            debug!("Removed artifact: {}", path.display());
        }
    }

    if removed > 0 {
        info!("Cleaned up {} formi artifacts", removed);
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn test_artifact_paths() {
        let path = Path::new("/src/app.min.js");
        assert_eq!(backup_path(path), PathBuf::from("/src/app.min.js.formi_backup"));
        assert_eq!(temp_path(path), PathBuf::from("/src/app.min.js.formi_temp"));

        assert!(is_artifact(&backup_path(path)));
        assert!(is_artifact(&temp_path(path)));
        assert!(is_artifact(Path::new("/src/.app.js.formi_outa1b2.js")));
        assert!(!is_artifact(path));
        assert!(!is_artifact(Path::new("/src/formi_out.js")));
    }

    #[test]
    fn test_install_replaces_with_backup() {
        let temp = assert_fs::TempDir::new().unwrap();
        let target = temp.child("data.json");
        target.write_binary(&[b'a'; 50]).unwrap();

        let payload = [b'b'; 100];
        FileInstaller::new(true).install(target.path(), &payload).unwrap();

        assert_eq!(fs::read(target.path()).unwrap().len(), 100);
        assert_eq!(fs::read(backup_path(target.path())).unwrap(), vec![b'a'; 50]);
        assert!(!temp_path(target.path()).exists());
    }

    #[test]
    fn test_install_without_backup() {
        let temp = assert_fs::TempDir::new().unwrap();
        let target = temp.child("style.css");
        target.write_str("body { color: red; }").unwrap();

        FileInstaller::new(false)
            .install(target.path(), b"body{color:red}")
            .unwrap();

        target.assert("body{color:red}");
        assert!(!backup_path(target.path()).exists());
    }

    #[test]
    fn test_install_new_file_skips_backup() {
        let temp = assert_fs::TempDir::new().unwrap();
        let target = temp.child("fresh.js");

        FileInstaller::new(true).install(target.path(), b"x=1").unwrap();

        target.assert("x=1");
        assert!(!backup_path(target.path()).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_install_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp = assert_fs::TempDir::new().unwrap();
        let target = temp.child("run.sh");
        target.write_str("echo  hi\n").unwrap();
        fs::set_permissions(target.path(), fs::Permissions::from_mode(0o750)).unwrap();

        FileInstaller::new(false).install(target.path(), b"echo hi\n").unwrap();

        let mode = fs::metadata(target.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[test]
    fn test_failed_install_leaves_no_temp() {
        let temp = assert_fs::TempDir::new().unwrap();
        let target = temp.child("occupied");
        target.create_dir_all().unwrap();

        let result = FileInstaller::new(false).install(target.path(), b"content");

        assert!(result.unwrap_err().is_io());
        assert!(target.path().is_dir());
        assert!(!temp_path(target.path()).exists());
    }

    #[test]
    fn test_cleanup_artifacts() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("a.js").write_str("a").unwrap();
        temp.child("a.js.formi_backup").write_str("a").unwrap();
        temp.child("nested/b.css.formi_temp").write_str("b").unwrap();
        temp.child("nested/.b.css.formi_out123.css").write_str("b").unwrap();
        temp.child("nested/b.css").write_str("b").unwrap();

        let removed = cleanup_artifacts(temp.path()).unwrap();

        assert_eq!(removed, 3);
        assert!(temp.child("a.js").exists());
        assert!(temp.child("nested/b.css").exists());
        assert!(!temp.child("a.js.formi_backup").exists());
    }

    #[test]
    fn test_cleanup_requires_directory() {
        let temp = assert_fs::TempDir::new().unwrap();
        let file = temp.child("plain.txt");
        file.write_str("x").unwrap();

        assert!(cleanup_artifacts(file.path()).is_err());
    }
}
