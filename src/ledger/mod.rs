// src/ledger/mod.rs

//! Transaction ledger
//!
//! The ledger records everything a workflow did that can be reversed:
//! - Compensating actions, undone last-recorded-first
//! - Snapshots of files and directories taken before they were modified
//! - Entities (packages) the workflow newly installed
//!
//! A failed session is unwound with [`Ledger::unwind`], a successful one is
//! cleared with [`Ledger::commit`]. Neither procedure fails outward: every
//! problem is logged and collected into the returned report.

pub mod compensation;
pub mod report;
pub mod snapshot;

pub use compensation::Compensation;
pub use report::{CommitReport, UndoFailure, UndoFailureKind, UnwindReport};
pub use snapshot::Snapshot;

use crate::error::{Error, Result};
use crate::host::Host;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

/// Whether the ledger is currently holding records for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    Idle,
    Recording,
}

/// Ordered undo information for one session
#[derive(Debug)]
pub struct Ledger {
    state: LedgerState,
    compensations: Vec<Compensation>,
    snapshots: Vec<Snapshot>,
    installed_entities: Vec<String>,
    /// Never reset, so snapshot order stays monotonic across reuse
    next_seq: u64,
    backup_dir: Option<PathBuf>,
    private_dir: Option<TempDir>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Create a ledger that keeps backups in a private temporary directory
    pub fn new() -> Self {
        Self {
            state: LedgerState::Idle,
            compensations: Vec::new(),
            snapshots: Vec::new(),
            installed_entities: Vec::new(),
            next_seq: 0,
            backup_dir: None,
            private_dir: None,
        }
    }

    /// Create a ledger that writes backups into `dir`
    pub fn with_backup_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: Some(dir.into()),
            ..Self::new()
        }
    }

    pub fn state(&self) -> LedgerState {
        self.state
    }

    /// Enter the recording state
    pub fn begin(&mut self) {
        if self.state == LedgerState::Idle {
            debug!("Ledger recording");
            self.state = LedgerState::Recording;
        }
    }

    /// Record a reversal to run if the session unwinds
    pub fn record_compensation(&mut self, action: Compensation) {
        self.begin();
        debug!("Recorded compensation: {}", action.label());
        self.compensations.push(action);
    }

    /// Record that `name` was newly installed by this session
    pub fn record_installed_entity(&mut self, name: impl Into<String>) {
        self.begin();
        let name = name.into();
        debug!("Recorded installed entity: {}", name);
        self.installed_entities.push(name);
    }

    /// Back up `path` before it gets modified
    ///
    /// A path that does not exist has nothing to protect and yields `None`.
    /// A failed copy is logged and also yields `None`; the workflow carries
    /// on without protection for that path.
    pub fn record_snapshot(&mut self, path: impl AsRef<Path>) -> Option<&Snapshot> {
        let path = path.as_ref();
        self.begin();

        if matches!(fs::symlink_metadata(path), Err(ref e) if e.kind() == io::ErrorKind::NotFound) {
            debug!("Nothing to snapshot at {}", path.display());
            return None;
        }

        let dir = match self.resolve_backup_dir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(
                    "{}",
                    Error::SnapshotFailure {
                        path: path.display().to_string(),
                        reason: e.to_string(),
                    }
                );
                return None;
            }
        };

        self.next_seq += 1;
        match snapshot::capture(path, &dir, self.next_seq) {
            Ok(Some(snapshot)) => {
                info!("Backed up {}", path.display());
                self.snapshots.push(snapshot);
                self.snapshots.last()
            }
            Ok(None) => {
                debug!("{} disappeared before it could be backed up", path.display());
                None
            }
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    pub fn compensation_count(&self) -> usize {
        self.compensations.len()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn installed_entities(&self) -> &[String] {
        &self.installed_entities
    }

    pub fn is_empty(&self) -> bool {
        self.compensations.is_empty() && self.snapshots.is_empty() && self.installed_entities.is_empty()
    }

    /// Directory backups are written to, if one has been chosen yet
    pub fn backup_dir(&self) -> Option<&Path> {
        self.backup_dir
            .as_deref()
            .or_else(|| self.private_dir.as_ref().map(TempDir::path))
    }

    /// Undo everything recorded so far, best-effort
    ///
    /// Installed entities are removed first, then every snapshotted path is
    /// restored from its most recent backup, then compensations run in
    /// reverse recorded order. A cache cleanup pass follows. The ledger is
    /// empty and idle afterwards.
    pub fn unwind(&mut self, host: &mut dyn Host) -> UnwindReport {
        let mut report = UnwindReport::default();

        if self.is_empty() {
            debug!("Unwind requested on an empty ledger");
            self.state = LedgerState::Idle;
            return report;
        }

        let entities = std::mem::take(&mut self.installed_entities);
        let snapshots = std::mem::take(&mut self.snapshots);
        let compensations = std::mem::take(&mut self.compensations);

        info!(
            "Rolling back: {} entities, {} snapshots, {} compensations",
            entities.len(),
            snapshots.len(),
            compensations.len()
        );

        for name in &entities {
            match host.remove_entity(name) {
                Ok(()) => {
                    info!("Removed {}", name);
                    report.entities_removed += 1;
                }
                Err(e) => {
                    let e = Error::EntityRemovalFailure {
                        name: name.clone(),
                        reason: e.to_string(),
                    };
                    warn!("{}", e);
                    report.fail(UndoFailureKind::EntityRemoval, name.as_str(), e);
                }
            }
        }

        restore_snapshots(&snapshots, &mut report);
        if !report.backups_kept.is_empty() {
            self.keep_private_dir();
        }

        for action in compensations.into_iter().rev() {
            let label = action.label();
            match action.execute(host) {
                Ok(()) => {
                    info!("Compensated: {}", label);
                    report.compensations_run += 1;
                }
                Err(e) => {
                    warn!("{}", e);
                    report.fail(UndoFailureKind::Compensation, label, e);
                }
            }
        }

        report.cleanup_ran = true;
        if let Err(e) = host.clean_caches() {
            warn!("Cache cleanup failed: {}", e);
            report.fail(UndoFailureKind::Cleanup, "package caches", e);
        }

        if report.is_complete() {
            info!("Rollback finished: {}", report);
        } else {
            error!("Rollback finished with failures: {}", report);
        }

        self.state = LedgerState::Idle;
        report
    }

    /// Discard all records and delete every backup
    pub fn commit(&mut self) -> CommitReport {
        let mut report = CommitReport::default();

        for snapshot in std::mem::take(&mut self.snapshots) {
            match snapshot::discard(&snapshot) {
                Ok(()) => report.backups_removed += 1,
                Err(e) => {
                    warn!("Could not delete backup {}: {}", snapshot.backup.display(), e);
                    report.backups_leaked.push(snapshot.backup.display().to_string());
                }
            }
        }

        let had_records = !self.compensations.is_empty() || !self.installed_entities.is_empty();
        self.compensations.clear();
        self.installed_entities.clear();
        self.state = LedgerState::Idle;

        if had_records || report.backups_removed > 0 || !report.backups_leaked.is_empty() {
            info!("Committed; removed {} backups", report.backups_removed);
        }

        report
    }

    /// Detach the private backup directory so it outlives the ledger
    fn keep_private_dir(&mut self) {
        if let Some(dir) = self.private_dir.take() {
            let path = dir.keep();
            warn!("Backups that could not be restored are kept in {}", path.display());
        }
    }

    fn resolve_backup_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.backup_dir {
            return Ok(dir.clone());
        }

        if self.private_dir.is_none() {
            let dir = tempfile::Builder::new().prefix("rtinstall-backup-").tempdir()?;
            debug!("Using private backup directory {}", dir.path().display());
            self.private_dir = Some(dir);
        }

        self.private_dir
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .ok_or_else(|| Error::Config("backup directory unavailable".to_string()))
    }
}

/// Restore each distinct path from its newest snapshot
///
/// A restored path's backups are deleted. When the restore fails they stay
/// on disk and are listed in the report.
fn restore_snapshots(snapshots: &[Snapshot], report: &mut UnwindReport) {
    let mut seen = HashSet::new();
    let originals: Vec<&Path> = snapshots
        .iter()
        .map(|s| s.original.as_path())
        .filter(|path| seen.insert(*path))
        .collect();

    for original in originals {
        let group: Vec<&Snapshot> = snapshots.iter().filter(|s| s.original == original).collect();

        let Some(latest) = group.iter().max_by_key(|s| s.seq) else {
            continue;
        };

        match snapshot::restore(latest) {
            Ok(()) => {
                info!("Restored {}", original.display());
                report.paths_restored += 1;
            }
            Err(e) => {
                warn!("{}", e);
                report.fail(UndoFailureKind::Restore, original.display().to_string(), e);
                report
                    .backups_kept
                    .extend(group.iter().map(|s| s.backup.display().to_string()));
                continue;
            }
        }

        for snapshot in group {
            if let Err(e) = snapshot::discard(snapshot) {
                warn!("Could not delete backup {}: {}", snapshot.backup.display(), e);
            }
        }
    }
}
