// src/db/models.rs

//! Data models for session history
//!
//! Rust structs for the `sessions` and `undo_failures` tables with methods
//! for creating, reading and updating records.

use crate::db;
use crate::error::{Error, Result};
use crate::ledger::{UndoFailure, UnwindReport};
use crate::session::WorkflowKind;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::str::FromStr;

/// Recorded status of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Recording,
    Committed,
    RolledBack,
}

impl SessionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SessionStatus::Recording => "recording",
            SessionStatus::Committed => "committed",
            SessionStatus::RolledBack => "rolled_back",
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "recording" => Ok(SessionStatus::Recording),
            "committed" => Ok(SessionStatus::Committed),
            "rolled_back" => Ok(SessionStatus::RolledBack),
            _ => Err(format!("Invalid session status: {}", s)),
        }
    }
}

/// One workflow run
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: Option<i64>,
    pub workflow: WorkflowKind,
    pub description: String,
    pub status: SessionStatus,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub undo_summary: Option<String>,
}

impl SessionRecord {
    /// Create a new record in the recording state
    pub fn new(workflow: WorkflowKind, description: String) -> Self {
        Self {
            id: None,
            workflow,
            description,
            status: SessionStatus::Recording,
            started_at: None,
            finished_at: None,
            undo_summary: None,
        }
    }

    /// Insert this record into the database
    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO sessions (workflow, description, status) VALUES (?1, ?2, ?3)",
            params![self.workflow.as_str(), &self.description, self.status.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    /// Find a record by ID
    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, workflow, description, status, started_at, finished_at, undo_summary
             FROM sessions WHERE id = ?1",
        )?;

        let record = stmt.query_row([id], Self::from_row).optional()?;

        Ok(record)
    }

    /// List all records, newest first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, workflow, description, status, started_at, finished_at, undo_summary
             FROM sessions ORDER BY id DESC",
        )?;

        let records = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Mark the session committed
    pub fn mark_committed(&mut self, conn: &Connection) -> Result<()> {
        self.finish(conn, SessionStatus::Committed, None)
    }

    /// Mark the session rolled back and store what the unwind left undone
    ///
    /// The status update and the failure rows are written in one transaction.
    pub fn mark_rolled_back(&mut self, conn: &mut Connection, report: &UnwindReport) -> Result<()> {
        let id = self.require_id()?;
        let summary = report.to_string();

        db::transaction(conn, |tx| {
            write_status(tx, id, SessionStatus::RolledBack, Some(&summary))?;
            for failure in &report.failures {
                UndoFailureRecord::from_failure(id, failure).insert(tx)?;
            }
            Ok(())
        })?;

        self.status = SessionStatus::RolledBack;
        self.undo_summary = Some(summary);
        Ok(())
    }

    fn finish(&mut self, conn: &Connection, status: SessionStatus, summary: Option<String>) -> Result<()> {
        let id = self.require_id()?;
        write_status(conn, id, status, summary.as_deref())?;

        self.status = status;
        self.undo_summary = summary;
        Ok(())
    }

    fn require_id(&self) -> Result<i64> {
        self.id
            .ok_or_else(|| Error::InitError("Cannot update session without ID".to_string()))
    }

    /// Convert a database row to a SessionRecord
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let workflow_str: String = row.get(1)?;
        let workflow = workflow_str.parse::<WorkflowKind>().map_err(|e| conversion_error(1, e))?;

        let status_str: String = row.get(3)?;
        let status = status_str.parse::<SessionStatus>().map_err(|e| conversion_error(3, e))?;

        Ok(Self {
            id: Some(row.get(0)?),
            workflow,
            description: row.get(2)?,
            status,
            started_at: row.get(4)?,
            finished_at: row.get(5)?,
            undo_summary: row.get(6)?,
        })
    }
}

fn write_status(conn: &Connection, id: i64, status: SessionStatus, summary: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE sessions
         SET status = ?1, finished_at = CURRENT_TIMESTAMP, undo_summary = ?2
         WHERE id = ?3",
        params![status.as_str(), summary, id],
    )?;
    Ok(())
}

/// A unit a rollback could not reverse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoFailureRecord {
    pub id: Option<i64>,
    pub session_id: i64,
    pub kind: String,
    pub subject: String,
    pub reason: String,
}

impl UndoFailureRecord {
    pub fn from_failure(session_id: i64, failure: &UndoFailure) -> Self {
        Self {
            id: None,
            session_id,
            kind: failure.kind.as_str().to_string(),
            subject: failure.subject.clone(),
            reason: failure.reason.clone(),
        }
    }

    pub fn insert(&mut self, conn: &Connection) -> Result<i64> {
        conn.execute(
            "INSERT INTO undo_failures (session_id, kind, subject, reason) VALUES (?1, ?2, ?3, ?4)",
            params![self.session_id, &self.kind, &self.subject, &self.reason],
        )?;

        let id = conn.last_insert_rowid();
        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_session(conn: &Connection, session_id: i64) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, session_id, kind, subject, reason FROM undo_failures
             WHERE session_id = ?1 ORDER BY id",
        )?;

        let records = stmt
            .query_map([session_id], |row| {
                Ok(Self {
                    id: Some(row.get(0)?),
                    session_id: row.get(1)?,
                    kind: row.get(2)?,
                    subject: row.get(3)?,
                    reason: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}
