// src/host.rs

//! System primitives the ledger and step runner depend on
//!
//! The ledger never talks to a package manager directly. Removing an
//! installed entity, reinstalling one, running a fixed-argv process and
//! clearing transient caches all go through the [`Host`] trait so the
//! rollback engine can be exercised without touching the real system.

use crate::config::Settings;
use crate::error::{Error, Result};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a running child is polled while a timeout is armed
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// System seam used during recording and unwind
pub trait Host {
    /// Remove an entity that the session installed
    fn remove_entity(&mut self, name: &str) -> Result<()>;

    /// Reinstall an entity that the session removed
    fn restore_entity(&mut self, name: &str) -> Result<()>;

    /// Run a process with a fixed argument vector
    fn run(&mut self, program: &str, args: &[String], timeout: Option<Duration>) -> Result<()>;

    /// Clear transient package caches after an unwind
    fn clean_caches(&mut self) -> Result<()>;
}

/// Host backed by real processes
///
/// Each primitive is an argv prefix from [`Settings`]; the entity name is
/// appended as a single argument, never spliced into a shell string.
#[derive(Debug, Clone)]
pub struct SystemHost {
    remove_command: Vec<String>,
    restore_command: Vec<String>,
    cleanup_command: Vec<String>,
    timeout: Option<Duration>,
}

impl SystemHost {
    /// Create a host from validated settings
    pub fn new(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        Ok(Self {
            remove_command: settings.remove_command.clone(),
            restore_command: settings.restore_command.clone(),
            cleanup_command: settings.cleanup_command.clone(),
            timeout: settings.step_timeout(),
        })
    }

    fn run_prefixed(&mut self, prefix: &[String], extra: Option<&str>) -> Result<()> {
        let (program, rest) = prefix
            .split_first()
            .ok_or_else(|| Error::Config("empty command prefix".to_string()))?;

        let mut args = rest.to_vec();
        if let Some(extra) = extra {
            args.push(extra.to_string());
        }

        run_command(program, &args, self.timeout)
    }
}

impl Host for SystemHost {
    fn remove_entity(&mut self, name: &str) -> Result<()> {
        let prefix = self.remove_command.clone();
        self.run_prefixed(&prefix, Some(name))
    }

    fn restore_entity(&mut self, name: &str) -> Result<()> {
        let prefix = self.restore_command.clone();
        self.run_prefixed(&prefix, Some(name))
    }

    fn run(&mut self, program: &str, args: &[String], timeout: Option<Duration>) -> Result<()> {
        run_command(program, args, timeout.or(self.timeout))
    }

    fn clean_caches(&mut self) -> Result<()> {
        let prefix = self.cleanup_command.clone();
        self.run_prefixed(&prefix, None)
    }
}

/// Render an argv for log lines and error messages
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a process to completion, killing it if `timeout` elapses first
pub fn run_command(program: &str, args: &[String], timeout: Option<Duration>) -> Result<()> {
    let rendered = command_line(program, args);
    debug!("Running: {}", rendered);

    let mut child = Command::new(program)
        .args(args)
        .spawn()
        .map_err(|e| Error::CommandFailed {
            command: rendered.clone(),
            status: format!("failed to start: {}", e),
        })?;

    let status = match timeout {
        None => child.wait()?,
        Some(limit) => {
            let deadline = Instant::now() + limit;
            loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if Instant::now() >= deadline {
                    warn!("Killing '{}' after {}s", rendered, limit.as_secs());
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::Timeout {
                        what: rendered,
                        seconds: limit.as_secs(),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    };

    if !status.success() {
        return Err(Error::CommandFailed {
            command: rendered,
            status: status.to_string(),
        });
    }

    Ok(())
}
