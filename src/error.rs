// src/error.rs

use crate::ledger::report::UnwindReport;
use thiserror::Error;

/// Core error types for rtinstall
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed plan or settings JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// A backup copy could not be created
    #[error("Failed to snapshot {path}: {reason}")]
    SnapshotFailure { path: String, reason: String },

    /// A backup could not be written back to its original location
    #[error("Failed to restore {path}: {reason}")]
    RestoreFailure { path: String, reason: String },

    /// A recorded reversal action failed
    #[error("Compensation '{action}' failed: {reason}")]
    CompensationFailure { action: String, reason: String },

    /// An installed entity could not be removed
    #[error("Failed to remove {name}: {reason}")]
    EntityRemovalFailure { name: String, reason: String },

    /// An external step ran past its time budget
    #[error("{what} timed out after {seconds}s")]
    Timeout { what: String, seconds: u64 },

    /// An external process exited unsuccessfully
    #[error("Command '{command}' failed: {status}")]
    CommandFailed { command: String, status: String },

    /// A workflow step failed and the session was rolled back
    #[error("Step '{step}' failed: {cause}")]
    StepFailed {
        step: String,
        cause: Box<Error>,
        report: UnwindReport,
    },

    /// The session already received its success or failure signal
    #[error("Session outcome was already signalled")]
    OutcomeAlreadySignalled,

    /// Plan file is structurally valid JSON but not a usable plan
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Settings are unusable
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using rtinstall's Error type
pub type Result<T> = std::result::Result<T, Error>;
