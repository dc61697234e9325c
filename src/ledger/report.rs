// src/ledger/report.rs

//! Outcome summaries for unwind and commit
//!
//! Neither procedure returns an error to its caller. Everything that went
//! wrong is collected here instead so the orchestrator can log or persist it.

use std::fmt;

/// Which part of the unwind a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoFailureKind {
    EntityRemoval,
    Restore,
    Compensation,
    Cleanup,
}

impl UndoFailureKind {
    pub fn as_str(&self) -> &str {
        match self {
            UndoFailureKind::EntityRemoval => "entity-removal",
            UndoFailureKind::Restore => "restore",
            UndoFailureKind::Compensation => "compensation",
            UndoFailureKind::Cleanup => "cleanup",
        }
    }
}

/// A single unit of the unwind that could not be undone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoFailure {
    pub kind: UndoFailureKind,
    /// Entity name, path or compensation label
    pub subject: String,
    pub reason: String,
}

/// Result of running the unwind procedure over a ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnwindReport {
    pub entities_removed: usize,
    pub paths_restored: usize,
    pub compensations_run: usize,
    pub cleanup_ran: bool,
    pub failures: Vec<UndoFailure>,
    /// Backups left on disk because their path could not be restored
    pub backups_kept: Vec<String>,
}

impl UnwindReport {
    /// True when nothing was recorded, so nothing was attempted
    pub fn is_noop(&self) -> bool {
        self.entities_removed == 0
            && self.paths_restored == 0
            && self.compensations_run == 0
            && !self.cleanup_ran
            && self.failures.is_empty()
    }

    /// True when every attempted unit succeeded
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, kind: UndoFailureKind, subject: impl Into<String>, reason: impl ToString) {
        self.failures.push(UndoFailure {
            kind,
            subject: subject.into(),
            reason: reason.to_string(),
        });
    }

    /// Failures for a single phase
    pub fn failures_of(&self, kind: UndoFailureKind) -> impl Iterator<Item = &UndoFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }
}

impl fmt::Display for UnwindReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "removed {} entities, restored {} paths, ran {} compensations",
            self.entities_removed, self.paths_restored, self.compensations_run
        )?;

        if self.failures.is_empty() {
            return write!(f, "; nothing left undone");
        }

        write!(f, "; {} not undone:", self.failures.len())?;
        for failure in &self.failures {
            write!(f, " [{} {}: {}]", failure.kind.as_str(), failure.subject, failure.reason)?;
        }
        if !self.backups_kept.is_empty() {
            write!(f, "; backups kept: {}", self.backups_kept.join(", "))?;
        }
        Ok(())
    }
}

/// Result of committing a ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub backups_removed: usize,
    /// Backups that could not be deleted and were left on disk
    pub backups_leaked: Vec<String>,
}
