// src/lib.rs

//! rtinstall
//!
//! Installer, uninstaller and post-install configurator for a container
//! runtime, built around a transactional rollback engine.
//!
//! # Architecture
//!
//! - Ledger: records compensations, file snapshots and installed entities
//! - Unwind: best-effort reversal of a failed session, never fails outward
//! - Commit: discards records and reclaims backups after success
//! - Sessions: one ledger per workflow run, exactly one outcome signal
//! - Steps: declarative records fed through a runner that does the ledger calls
//! - Host: the seam to package manager, processes and caches

pub mod config;
pub mod db;
mod error;
pub mod host;
pub mod ledger;
pub mod plan;
pub mod session;
pub mod step;

pub use error::{Error, Result};
pub use ledger::{Compensation, Ledger, LedgerState, UnwindReport};
pub use session::{Session, SessionState, WorkflowKind};
pub use step::{Step, StepRunner};
