// src/ledger/snapshot.rs

//! Point-in-time copies of files and directories
//!
//! A snapshot is taken before a step modifies a path and is written back if
//! the session unwinds. Backups live in the ledger's backup directory under
//! a name derived from the original path, the capture time and the ledger's
//! sequence counter. Ordering between snapshots of the same path always uses
//! the sequence number; the file name is only there to keep backups unique
//! and recognizable on disk.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Number of hex characters of the path digest kept in backup names
const PATH_DIGEST_LEN: usize = 12;

/// Appended to the original's file name while a restore is staged
const STAGING_SUFFIX: &str = ".rtinstall-restore";

/// A backup copy of one original path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub original: PathBuf,
    pub backup: PathBuf,
    /// Ledger-wide capture order; higher is more recent
    pub seq: u64,
    pub taken_at: DateTime<Utc>,
}

/// Build the on-disk file name for a backup of `original`
pub fn backup_name(original: &Path, taken_at: DateTime<Utc>, seq: u64) -> String {
    let file_name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());

    let digest = format!("{:x}", Sha256::digest(original.as_os_str().as_encoded_bytes()));

    format!(
        "{}.{}.{}.{}.bak",
        file_name,
        &digest[..PATH_DIGEST_LEN],
        taken_at.format("%Y%m%dT%H%M%S%6f"),
        seq
    )
}

/// Copy `original` into `backup_dir`
///
/// Returns `Ok(None)` when the original does not exist. On a failed copy the
/// partial backup is removed before the error is returned. A directory that
/// contains `backup_dir` is refused, since copying it would walk into its own
/// backups.
pub(crate) fn capture(original: &Path, backup_dir: &Path, seq: u64) -> Result<Option<Snapshot>> {
    let meta = match fs::symlink_metadata(original) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(snapshot_failure(original, e)),
    };

    let taken_at = Utc::now();
    let backup = backup_dir.join(backup_name(original, taken_at, seq));

    fs::create_dir_all(backup_dir).map_err(|e| snapshot_failure(original, e))?;

    if meta.file_type().is_dir() && contains(original, backup_dir)? {
        return Err(Error::SnapshotFailure {
            path: original.display().to_string(),
            reason: format!("backup directory {} lies inside it", backup_dir.display()),
        });
    }

    if let Err(e) = copy_entry(original, &backup) {
        let _ = remove_entry(&backup);
        return Err(snapshot_failure(original, e));
    }

    debug!("Snapshot of {} stored at {}", original.display(), backup.display());

    Ok(Some(Snapshot {
        original: original.to_path_buf(),
        backup,
        seq,
        taken_at,
    }))
}

/// Overwrite the original path with the contents of this snapshot
///
/// The backup is first copied next to the original and then renamed over
/// it, so a failed copy leaves the original as the workflow left it.
pub(crate) fn restore(snapshot: &Snapshot) -> Result<()> {
    let original = &snapshot.original;
    let to_restore_failure = |e: io::Error| Error::RestoreFailure {
        path: original.display().to_string(),
        reason: e.to_string(),
    };

    let staging = staging_path(original).map_err(to_restore_failure)?;

    if let Some(parent) = original.parent() {
        fs::create_dir_all(parent).map_err(to_restore_failure)?;
    }
    remove_entry(&staging).map_err(to_restore_failure)?;

    if let Err(e) = copy_entry(&snapshot.backup, &staging) {
        let _ = remove_entry(&staging);
        return Err(to_restore_failure(e));
    }

    if let Err(e) = swap_into_place(&staging, original) {
        let _ = remove_entry(&staging);
        return Err(to_restore_failure(e));
    }

    debug!("Restored {} from {}", original.display(), snapshot.backup.display());
    Ok(())
}

/// Delete the backup copy of this snapshot
pub(crate) fn discard(snapshot: &Snapshot) -> io::Result<()> {
    remove_entry(&snapshot.backup)
}

/// Sibling of `original` the backup is staged in before the final rename
fn staging_path(original: &Path) -> io::Result<PathBuf> {
    let name = original.file_name().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "path has no file name to restore")
    })?;

    let mut staged = name.to_os_string();
    staged.push(STAGING_SUFFIX);
    Ok(original.with_file_name(staged))
}

/// Rename `staging` over `original`
///
/// A rename only replaces files and symlinks, so an existing directory on
/// either side means the original is removed first.
fn swap_into_place(staging: &Path, original: &Path) -> io::Result<()> {
    let original_is_dir = match fs::symlink_metadata(original) {
        Ok(meta) => meta.file_type().is_dir(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => return Err(e),
    };
    let staging_is_dir = fs::symlink_metadata(staging)?.file_type().is_dir();

    if original_is_dir || staging_is_dir {
        remove_entry(original)?;
    }

    fs::rename(staging, original)
}

/// Whether `inner` is `outer` or lies somewhere below it
fn contains(outer: &Path, inner: &Path) -> Result<bool> {
    let outer = fs::canonicalize(outer).map_err(|e| snapshot_failure(outer, e))?;
    let inner = fs::canonicalize(inner).map_err(|e| snapshot_failure(inner, e))?;
    Ok(inner.starts_with(&outer))
}

fn snapshot_failure(path: &Path, e: io::Error) -> Error {
    Error::SnapshotFailure {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

/// Copy a file, symlink or directory tree from `src` to `dst`
fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    let file_type = meta.file_type();

    if file_type.is_symlink() {
        copy_symlink(src, dst)
    } else if file_type.is_dir() {
        copy_dir(src, dst)
    } else {
        // fs::copy carries the permission bits over
        fs::copy(src, dst).map(|_| ())
    }
}

fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    let mut dir_permissions = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
            dir_permissions.push((target, entry.metadata()?.permissions()));
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }

    // Deepest directories first so a read-only parent never blocks a child
    for (dir, permissions) in dir_permissions.into_iter().rev() {
        fs::set_permissions(&dir, permissions)?;
    }

    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

/// Remove a file, symlink or directory tree; a missing path is not an error
fn remove_entry(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if meta.file_type().is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_backup_name_is_unique_per_directory() {
        let now = Utc::now();
        let a = backup_name(Path::new("/etc/apt/sources.list"), now, 1);
        let b = backup_name(Path::new("/tmp/sources.list"), now, 1);

        assert!(a.starts_with("sources.list."));
        assert!(a.ends_with(".1.bak"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_capture_missing_path_is_none() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        let snapshot = capture(&missing, &dir.path().join("backups"), 1).unwrap();
        assert!(snapshot.is_none());
        assert!(!dir.path().join("backups").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_reports_non_missing_errors() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();

        let result = capture(&blocker.join("child"), &dir.path().join("backups"), 1);
        assert!(matches!(result, Err(Error::SnapshotFailure { .. })));
    }

    #[test]
    fn test_capture_and_restore_file() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("daemon.json");
        fs::write(&original, "v1").unwrap();

        let snapshot = capture(&original, &dir.path().join("backups"), 7)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.seq, 7);
        assert_eq!(fs::read_to_string(&snapshot.backup).unwrap(), "v1");

        fs::write(&original, "v2").unwrap();
        restore(&snapshot).unwrap();
        assert_eq!(fs::read_to_string(&original).unwrap(), "v1");

        discard(&snapshot).unwrap();
        assert!(!snapshot.backup.exists());
    }

    #[test]
    fn test_capture_and_restore_directory_tree() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("keyrings");
        fs::create_dir_all(original.join("nested")).unwrap();
        fs::write(original.join("a.gpg"), "key-a").unwrap();
        fs::write(original.join("nested/b.gpg"), "key-b").unwrap();

        let snapshot = capture(&original, &dir.path().join("backups"), 1)
            .unwrap()
            .unwrap();

        fs::remove_file(original.join("a.gpg")).unwrap();
        fs::write(original.join("c.gpg"), "added later").unwrap();

        restore(&snapshot).unwrap();
        assert_eq!(fs::read_to_string(original.join("a.gpg")).unwrap(), "key-a");
        assert_eq!(fs::read_to_string(original.join("nested/b.gpg")).unwrap(), "key-b");
        assert!(!original.join("c.gpg").exists());
    }

    #[test]
    fn test_restore_replaces_directory_with_file() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("docker.list");
        fs::write(&original, "deb stable").unwrap();

        let snapshot = capture(&original, &dir.path().join("backups"), 1)
            .unwrap()
            .unwrap();

        fs::remove_file(&original).unwrap();
        fs::create_dir(&original).unwrap();

        restore(&snapshot).unwrap();
        assert!(original.is_file());
        assert_eq!(fs::read_to_string(&original).unwrap(), "deb stable");
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_keeps_symlinks() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        fs::write(&target, "data").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let snapshot = capture(&link, &dir.path().join("backups"), 1).unwrap().unwrap();
        let meta = fs::symlink_metadata(&snapshot.backup).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(&snapshot.backup).unwrap(), target);
    }

    #[test]
    fn test_failed_restore_keeps_current_contents() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("x");
        fs::write(&original, "v1").unwrap();

        let snapshot = capture(&original, &dir.path().join("backups"), 1)
            .unwrap()
            .unwrap();
        fs::write(&original, "v2").unwrap();
        fs::remove_file(&snapshot.backup).unwrap();

        let result = restore(&snapshot);

        assert!(matches!(result, Err(Error::RestoreFailure { .. })));
        assert_eq!(fs::read_to_string(&original).unwrap(), "v2");
        assert!(!staging_path(&original).unwrap().exists());
    }

    #[test]
    fn test_restore_recreates_deleted_original() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("apt/sources.list.d/docker.list");
        fs::create_dir_all(original.parent().unwrap()).unwrap();
        fs::write(&original, "deb stable").unwrap();

        let snapshot = capture(&original, &dir.path().join("backups"), 1)
            .unwrap()
            .unwrap();
        fs::remove_dir_all(dir.path().join("apt")).unwrap();

        restore(&snapshot).unwrap();
        assert_eq!(fs::read_to_string(&original).unwrap(), "deb stable");
        assert!(snapshot.backup.exists());
    }

    #[test]
    fn test_restore_replaces_file_with_directory() {
        let dir = tempdir().unwrap();
        let original = dir.path().join("conf.d");
        fs::create_dir(&original).unwrap();
        fs::write(original.join("a.conf"), "a").unwrap();

        let snapshot = capture(&original, &dir.path().join("backups"), 1)
            .unwrap()
            .unwrap();
        fs::remove_dir_all(&original).unwrap();
        fs::write(&original, "now a file").unwrap();

        restore(&snapshot).unwrap();
        assert!(original.is_dir());
        assert_eq!(fs::read_to_string(original.join("a.conf")).unwrap(), "a");
    }

    #[test]
    fn test_capture_refuses_directory_holding_backups() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("etc");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("hosts"), "127.0.0.1").unwrap();
        let backups = root.join("backups");

        let result = capture(&root, &backups, 1);

        match result {
            Err(Error::SnapshotFailure { reason, .. }) => assert!(reason.contains("lies inside")),
            other => panic!("expected a snapshot failure, got {:?}", other),
        }
        assert_eq!(fs::read_dir(&backups).unwrap().count(), 0);
    }

    #[test]
    fn test_capture_directory_beside_backups() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("etc");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("hosts"), "127.0.0.1").unwrap();

        let snapshot = capture(&root, &dir.path().join("etc-backups"), 1).unwrap();
        assert!(snapshot.is_some());
    }

    #[test]
    fn test_discard_missing_backup_is_ok() {
        let snapshot = Snapshot {
            original: PathBuf::from("/nonexistent/original"),
            backup: PathBuf::from("/nonexistent/backup.bak"),
            seq: 1,
            taken_at: Utc::now(),
        };
        assert!(discard(&snapshot).is_ok());
    }
}
