// src/db/schema.rs

//! Session history schema and migrations
//!
//! Each migration is applied once, in order, and recorded in the
//! `schema_version` table.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

    Ok(version)
}

/// Set the schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        2 => migrate_v2(conn),
        _ => Err(Error::InitError(format!("Unknown migration version: {}", version))),
    }
}

/// Sessions: one row per workflow run
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workflow TEXT NOT NULL CHECK(workflow IN ('install', 'uninstall', 'post-install')),
            description TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('recording', 'committed', 'rolled_back')),
            started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            finished_at TEXT,
            undo_summary TEXT
        );

        CREATE INDEX idx_sessions_status ON sessions(status);
        CREATE INDEX idx_sessions_started_at ON sessions(started_at);
        ",
    )?;
    Ok(())
}

/// Undo failures: units a rollback could not reverse
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE undo_failures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id INTEGER NOT NULL,
            kind TEXT NOT NULL CHECK(kind IN ('entity-removal', 'restore', 'compensation', 'cleanup')),
            subject TEXT NOT NULL,
            reason TEXT NOT NULL,
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_undo_failures_session ON undo_failures(session_id);
        ",
    )?;
    Ok(())
}
