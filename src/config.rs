// src/config.rs

//! Runtime settings
//!
//! Settings come from an optional JSON file and are then overridden by
//! command-line flags. Every field has a default so an empty object (or no
//! file at all) is a valid configuration.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Session history database read by `history` when no path is given
pub const DEFAULT_DB_PATH: &str = "/var/lib/rtinstall/history.db";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Where snapshot backups are written; a private temp dir when unset
    pub backup_dir: Option<PathBuf>,
    /// Time budget for each external step, unlimited when unset
    pub step_timeout_secs: Option<u64>,
    /// argv prefix that removes one installed entity
    pub remove_command: Vec<String>,
    /// argv prefix that reinstalls one entity
    pub restore_command: Vec<String>,
    /// argv run once after an unwind to clear transient caches
    pub cleanup_command: Vec<String>,
    /// Session history database; nothing is recorded when unset
    pub db_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        let argv = |parts: &[&str]| -> Vec<String> { parts.iter().map(|s| s.to_string()).collect() };

        Self {
            backup_dir: None,
            step_timeout_secs: None,
            remove_command: argv(&["apt-get", "remove", "-y"]),
            restore_command: argv(&["apt-get", "install", "-y"]),
            cleanup_command: argv(&["apt-get", "clean"]),
            db_path: None,
        }
    }
}

impl Settings {
    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading settings from {}", path.display());

        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Reject settings the host could not act on
    pub fn validate(&self) -> Result<()> {
        for (field, argv) in [
            ("remove_command", &self.remove_command),
            ("restore_command", &self.restore_command),
            ("cleanup_command", &self.cleanup_command),
        ] {
            if argv.first().is_none_or(|program| program.is_empty()) {
                return Err(Error::Config(format!("{} must name a program", field)));
            }
        }

        if self.step_timeout_secs == Some(0) {
            return Err(Error::Config("step_timeout_secs must be positive".to_string()));
        }

        Ok(())
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}
