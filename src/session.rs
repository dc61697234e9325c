// src/session.rs

//! Workflow sessions
//!
//! A session is one run of an install, uninstall or post-install workflow.
//! It owns a single [`Ledger`] and accepts exactly one outcome signal:
//! [`Session::commit`] on success or [`Session::rollback`] on failure. Any
//! record or outcome call after that signal is refused.

use crate::error::{Error, Result};
use crate::host::Host;
use crate::ledger::{CommitReport, Compensation, Ledger, LedgerState, Snapshot, UnwindReport};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

/// Workflow a session belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    Install,
    Uninstall,
    PostInstall,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowKind::Install => "install",
            WorkflowKind::Uninstall => "uninstall",
            WorkflowKind::PostInstall => "post-install",
        }
    }
}

impl FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "install" => Ok(WorkflowKind::Install),
            "uninstall" => Ok(WorkflowKind::Uninstall),
            "post-install" => Ok(WorkflowKind::PostInstall),
            _ => Err(format!("Invalid workflow kind: {}", s)),
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Recording,
    Committed,
    RolledBack,
}

impl SessionState {
    pub fn as_str(&self) -> &str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Committed => "committed",
            SessionState::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Committed | SessionState::RolledBack)
    }
}

/// One workflow run and its ledger
pub struct Session {
    kind: WorkflowKind,
    description: String,
    state: SessionState,
    ledger: Ledger,
    host: Box<dyn Host>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("state", &self.state)
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session around a fresh ledger
    pub fn new(kind: WorkflowKind, description: impl Into<String>, host: Box<dyn Host>) -> Self {
        Self::with_ledger(kind, description, Ledger::new(), host)
    }

    /// Create a session around an existing ledger
    ///
    /// The ledger must be idle; leftover records from an earlier session
    /// would otherwise be committed or unwound as part of this one.
    pub fn with_ledger(
        kind: WorkflowKind,
        description: impl Into<String>,
        ledger: Ledger,
        host: Box<dyn Host>,
    ) -> Self {
        debug_assert_eq!(
            ledger.state(),
            LedgerState::Idle,
            "session given a ledger that is still recording"
        );

        Self {
            kind,
            description: description.into(),
            state: SessionState::Idle,
            ledger,
            host,
        }
    }

    pub fn kind(&self) -> WorkflowKind {
        self.kind
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Host the session unwinds against, for steps that need to run processes
    pub fn host_mut(&mut self) -> &mut dyn Host {
        self.host.as_mut()
    }

    /// Start recording
    pub fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.state == SessionState::Idle {
            info!("Starting {} session: {}", self.kind, self.description);
            self.state = SessionState::Recording;
            self.ledger.begin();
        }
        Ok(())
    }

    pub fn record_compensation(&mut self, action: Compensation) -> Result<()> {
        self.begin()?;
        self.ledger.record_compensation(action);
        Ok(())
    }

    pub fn record_snapshot(&mut self, path: impl AsRef<Path>) -> Result<Option<&Snapshot>> {
        self.begin()?;
        Ok(self.ledger.record_snapshot(path))
    }

    pub fn record_installed_entity(&mut self, name: impl Into<String>) -> Result<()> {
        self.begin()?;
        self.ledger.record_installed_entity(name);
        Ok(())
    }

    /// Signal success: discard records and reclaim backups
    pub fn commit(&mut self) -> Result<CommitReport> {
        self.ensure_open()?;

        let report = self.ledger.commit();
        self.state = SessionState::Committed;
        info!("{} session committed: {}", self.kind, self.description);

        Ok(report)
    }

    /// Signal failure: unwind everything recorded so far
    pub fn rollback(&mut self) -> Result<UnwindReport> {
        self.ensure_open()?;

        warn!("{} session failed, rolling back: {}", self.kind, self.description);
        let report = self.ledger.unwind(self.host.as_mut());
        self.state = SessionState::RolledBack;

        Ok(report)
    }

    /// Give back the (idle) ledger for reuse in another session
    pub fn into_ledger(self) -> Ledger {
        self.ledger
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::OutcomeAlreadySignalled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerState;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SharedHost {
        calls: Rc<RefCell<Vec<String>>>,
    }

    impl Host for SharedHost {
        fn remove_entity(&mut self, name: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("remove {}", name));
            Ok(())
        }

        fn restore_entity(&mut self, name: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("restore {}", name));
            Ok(())
        }

        fn run(&mut self, program: &str, _args: &[String], _timeout: Option<Duration>) -> Result<()> {
            self.calls.borrow_mut().push(format!("run {}", program));
            Ok(())
        }

        fn clean_caches(&mut self) -> Result<()> {
            self.calls.borrow_mut().push("clean".to_string());
            Ok(())
        }
    }

    fn session(host: &SharedHost) -> Session {
        Session::new(WorkflowKind::Install, "install runtime", Box::new(host.clone()))
    }

    #[test]
    fn test_workflow_kind_round_trip() {
        for kind in [WorkflowKind::Install, WorkflowKind::Uninstall, WorkflowKind::PostInstall] {
            assert_eq!(kind.as_str().parse::<WorkflowKind>().unwrap(), kind);
        }
        assert!("reinstall".parse::<WorkflowKind>().is_err());
    }

    #[test]
    fn test_state_transitions_to_committed() {
        let host = SharedHost::default();
        let mut session = session(&host);
        assert_eq!(session.state(), SessionState::Idle);

        session.record_installed_entity("docker-ce").unwrap();
        assert_eq!(session.state(), SessionState::Recording);

        session.commit().unwrap();
        assert_eq!(session.state(), SessionState::Committed);
        assert_eq!(session.ledger().state(), LedgerState::Idle);
        assert!(host.calls.borrow().is_empty());
    }

    #[test]
    fn test_rollback_unwinds_through_host() {
        let host = SharedHost::default();
        let mut session = session(&host);
        session.record_installed_entity("docker-ce").unwrap();
        session
            .record_compensation(Compensation::restore_package("podman"))
            .unwrap();

        let report = session.rollback().unwrap();

        assert_eq!(session.state(), SessionState::RolledBack);
        assert_eq!(report.entities_removed, 1);
        assert_eq!(
            *host.calls.borrow(),
            vec!["remove docker-ce", "restore podman", "clean"]
        );
    }

    #[test]
    fn test_only_one_outcome_accepted() {
        let host = SharedHost::default();
        let mut session = session(&host);
        session.record_installed_entity("pkg1").unwrap();
        session.commit().unwrap();

        assert!(matches!(session.rollback(), Err(Error::OutcomeAlreadySignalled)));
        assert!(matches!(session.commit(), Err(Error::OutcomeAlreadySignalled)));
        assert!(matches!(
            session.record_installed_entity("pkg2"),
            Err(Error::OutcomeAlreadySignalled)
        ));
        assert!(session.ledger().is_empty());
        assert!(host.calls.borrow().is_empty());
    }

    #[test]
    fn test_no_mutation_after_rollback() {
        let host = SharedHost::default();
        let mut session = session(&host);
        session.rollback().unwrap();

        assert!(matches!(
            session.record_compensation(Compensation::delete_path("/tmp/never")),
            Err(Error::OutcomeAlreadySignalled)
        ));
        assert!(session.ledger().is_empty());
    }

    #[test]
    fn test_ledger_reusable_after_session() {
        let host = SharedHost::default();
        let mut first = session(&host);
        first.record_installed_entity("pkg1").unwrap();
        first.rollback().unwrap();

        let ledger = first.into_ledger();
        assert_eq!(ledger.state(), LedgerState::Idle);
        assert!(ledger.is_empty());

        let mut second = Session::with_ledger(
            WorkflowKind::PostInstall,
            "configure",
            ledger,
            Box::new(host.clone()),
        );
        second.record_installed_entity("pkg2").unwrap();
        assert_eq!(second.ledger().installed_entities(), ["pkg2".to_string()]);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "still recording")]
    fn test_recording_ledger_is_rejected() {
        let mut ledger = Ledger::new();
        ledger.record_installed_entity("leftover");

        let _ = Session::with_ledger(
            WorkflowKind::Install,
            "install runtime",
            ledger,
            Box::new(SharedHost::default()),
        );
    }
}
