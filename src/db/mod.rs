// src/db/mod.rs

//! Session history database
//!
//! Every `run` can leave a row behind describing which workflow ran, how it
//! ended and what a rollback failed to undo:
//! - Database initialization and migrations
//! - Connection management
//! - Session and undo-failure records

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

/// Initialize the history database at the specified path
///
/// Creates the database file and brings the schema up to date. Calling it
/// on an existing database is safe.
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::InitError(format!("Failed to create database directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Open an existing history database
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    Ok(conn)
}

/// Open the database, creating it first if it does not exist yet
pub fn open_or_init(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        init(db_path)?;
    }
    let conn = open(db_path)?;
    schema::migrate(&conn)?;
    Ok(conn)
}

/// Run `f` inside a SQLite transaction, committing only if it succeeds
pub fn transaction<T, F>(conn: &mut Connection, f: F) -> Result<T>
where
    F: FnOnce(&rusqlite::Transaction) -> Result<T>,
{
    let tx = conn.transaction()?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}
