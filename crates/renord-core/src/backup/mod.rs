//! Original-file backups taken before any rename.
//!
//! Backups land in a directory tree partitioned by calendar day. A rename
//! is only allowed once the backup copy has been verified against the
//! source, and nothing in this module ever deletes a backup.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::BackupError;

/// Record of one completed, verified backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    /// File the backup was taken of.
    pub original_path: PathBuf,
    /// Where the copy lives.
    pub backup_path: PathBuf,
    /// When the backup was taken.
    pub timestamp: DateTime<Local>,
}

/// Copies originals into the dated backup area.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
}

impl BackupManager {
    /// Create a manager rooted at the given backup directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Back up the file at `original` and verify the copy.
    ///
    /// The target directory is `<root>/<YYYY-MM-DD>/`; creating it is
    /// idempotent, so concurrent workers may race on the same date folder
    /// freely. An existing target name gets a numeric disambiguator rather
    /// than being overwritten. The copy is verified by size against the
    /// source before the record is returned; on verification failure the
    /// incomplete copy is removed and the original is untouched.
    pub fn backup(&self, original: &Path) -> Result<BackupRecord, BackupError> {
        let timestamp = Local::now();
        let day_dir = self.root.join(timestamp.format("%Y-%m-%d").to_string());
        std::fs::create_dir_all(&day_dir)?;

        let file_name = original
            .file_name()
            .ok_or_else(|| {
                BackupError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("no file name in path {}", original.display()),
                ))
            })?
            .to_owned();

        let backup_path = disambiguate(&day_dir.join(&file_name));

        std::fs::copy(original, &backup_path)?;
        debug!(
            "Copied {} -> {}",
            original.display(),
            backup_path.display()
        );

        let source_len = std::fs::metadata(original)?.len();
        let backup_len = std::fs::metadata(&backup_path)?.len();
        if source_len != backup_len {
            // Remove the incomplete copy; the original stays untouched.
            let _ = std::fs::remove_file(&backup_path);
            return Err(BackupError::VerificationFailed {
                source_len,
                backup_len,
            });
        }

        info!("Backed up {} ({} bytes)", original.display(), source_len);

        Ok(BackupRecord {
            original_path: original.to_path_buf(),
            backup_path,
            timestamp,
        })
    }
}

/// Append `_2`, `_3`, ... before the extension until the name is free.
pub fn disambiguate(target: &Path) -> PathBuf {
    if !target.exists() {
        return target.to_path_buf();
    }

    let stem = target
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("backup");
    let extension = target.extension().and_then(|e| e.to_str());
    let parent = target.parent().unwrap_or_else(|| Path::new("."));

    let mut counter = 2u32;
    loop {
        let name = match extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_backup_lands_in_dated_directory() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("invoice.pdf");
        fs::write(&source, b"pdf bytes").unwrap();

        let manager = BackupManager::new(dir.path().join("backup"));
        let record = manager.backup(&source).unwrap();

        let day = Local::now().format("%Y-%m-%d").to_string();
        assert!(record.backup_path.starts_with(dir.path().join("backup").join(day)));
        assert_eq!(fs::read(&record.backup_path).unwrap(), b"pdf bytes");
        // Original untouched.
        assert_eq!(fs::read(&source).unwrap(), b"pdf bytes");
    }

    #[test]
    fn test_backup_collision_gets_disambiguator() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("invoice.pdf");
        fs::write(&source, b"pdf bytes").unwrap();

        let manager = BackupManager::new(dir.path().join("backup"));
        let first = manager.backup(&source).unwrap();
        let second = manager.backup(&source).unwrap();
        let third = manager.backup(&source).unwrap();

        assert_ne!(first.backup_path, second.backup_path);
        assert_ne!(second.backup_path, third.backup_path);
        assert!(second
            .backup_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .contains("_2"));
        // The first backup was never overwritten.
        assert_eq!(fs::read(&first.backup_path).unwrap(), b"pdf bytes");
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("backup"));
        let result = manager.backup(&dir.path().join("missing.pdf"));
        assert!(matches!(result, Err(BackupError::Io(_))));
    }

    #[test]
    fn test_disambiguate_preserves_extension() {
        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("name.pdf");
        fs::write(&taken, b"x").unwrap();

        let next = disambiguate(&taken);
        assert_eq!(next.file_name().unwrap().to_string_lossy(), "name_2.pdf");
    }
}
