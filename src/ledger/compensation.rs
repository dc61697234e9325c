// src/ledger/compensation.rs

//! Recorded reversal operations

use crate::error::{Error, Result};
use crate::host::{Host, command_line};
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Boxed no-argument reversal procedure
pub type CustomAction = Box<dyn FnOnce() -> Result<()>>;

/// A reversal operation executed during unwind
///
/// The closed variants cover what install, uninstall and post-install
/// workflows need to undo. `Custom` takes any captured procedure.
pub enum Compensation {
    /// Reinstall a package that the session removed
    RestorePackage { name: String },
    /// Delete a file or directory the session created
    DeletePath { path: PathBuf },
    /// Run a process with a fixed argument vector
    RunProcess { program: String, args: Vec<String> },
    /// Run a captured procedure
    Custom { label: String, action: CustomAction },
}

impl Compensation {
    pub fn restore_package(name: impl Into<String>) -> Self {
        Compensation::RestorePackage { name: name.into() }
    }

    pub fn delete_path(path: impl Into<PathBuf>) -> Self {
        Compensation::DeletePath { path: path.into() }
    }

    pub fn run_process<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Compensation::RunProcess {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn custom<F>(label: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        Compensation::Custom {
            label: label.into(),
            action: Box::new(action),
        }
    }

    /// Short human-readable description used in logs and reports
    pub fn label(&self) -> String {
        match self {
            Compensation::RestorePackage { name } => format!("restore package {}", name),
            Compensation::DeletePath { path } => format!("delete {}", path.display()),
            Compensation::RunProcess { program, args } => command_line(program, args),
            Compensation::Custom { label, .. } => label.clone(),
        }
    }

    /// Execute the reversal, consuming it
    pub fn execute(self, host: &mut dyn Host) -> Result<()> {
        let label = self.label();
        let outcome = match self {
            Compensation::RestorePackage { name } => host.restore_entity(&name),
            Compensation::DeletePath { path } => delete_path(&path),
            Compensation::RunProcess { program, args } => host.run(&program, &args, None),
            Compensation::Custom { action, .. } => action(),
        };

        outcome.map_err(|e| Error::CompensationFailure {
            action: label,
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::RestorePackage { name } => {
                f.debug_struct("RestorePackage").field("name", name).finish()
            }
            Compensation::DeletePath { path } => f.debug_struct("DeletePath").field("path", path).finish(),
            Compensation::RunProcess { program, args } => f
                .debug_struct("RunProcess")
                .field("program", program)
                .field("args", args)
                .finish(),
            Compensation::Custom { label, .. } => {
                f.debug_struct("Custom").field("label", label).finish_non_exhaustive()
            }
        }
    }
}

/// Already-absent paths count as deleted
fn delete_path(path: &std::path::Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if meta.file_type().is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}
