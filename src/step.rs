// src/step.rs

//! Declarative workflow steps and the runner that feeds them to a session
//!
//! Each step names what it touches (paths to snapshot, entities it installs,
//! the compensation that reverses it) and the runner takes care of the
//! ledger calls. On the first failing step the session is rolled back and
//! [`Error::StepFailed`] is returned; after the last step it is committed.

use crate::error::{Error, Result};
use crate::host::Host;
use crate::ledger::{CommitReport, Compensation, UnwindReport};
use crate::session::Session;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Boxed step body run against the session's host
pub type CustomStep = Box<dyn FnOnce(&mut dyn Host) -> Result<()>>;

/// What a step does
pub enum StepAction {
    /// Run a process with a fixed argument vector
    Command { program: String, args: Vec<String> },
    /// Run a captured procedure
    Custom(CustomStep),
}

impl fmt::Debug for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Command { program, args } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .finish(),
            StepAction::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One state-changing unit of a workflow
#[derive(Debug)]
pub struct Step {
    pub description: String,
    pub action: StepAction,
    /// Recorded before the action runs so partial effects are covered too
    pub compensation: Option<Compensation>,
    /// Paths backed up before the action runs
    pub snapshot_paths: Vec<PathBuf>,
    /// Entities recorded as installed once the action succeeds
    pub installs: Vec<String>,
    /// Question asked before the step; a "no" skips it
    pub confirm: Option<String>,
    /// Overrides the runner's default time budget
    pub timeout: Option<Duration>,
}

impl Step {
    fn new(description: impl Into<String>, action: StepAction) -> Self {
        Self {
            description: description.into(),
            action,
            compensation: None,
            snapshot_paths: Vec::new(),
            installs: Vec::new(),
            confirm: None,
            timeout: None,
        }
    }

    pub fn command<I, S>(description: impl Into<String>, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            description,
            StepAction::Command {
                program: program.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn custom<F>(description: impl Into<String>, action: F) -> Self
    where
        F: FnOnce(&mut dyn Host) -> Result<()> + 'static,
    {
        Self::new(description, StepAction::Custom(Box::new(action)))
    }

    pub fn with_compensation(mut self, compensation: Compensation) -> Self {
        self.compensation = Some(compensation);
        self
    }

    pub fn snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_paths.push(path.into());
        self
    }

    pub fn installs(mut self, name: impl Into<String>) -> Self {
        self.installs.push(name.into());
        self
    }

    pub fn confirm(mut self, prompt: impl Into<String>) -> Self {
        self.confirm = Some(prompt.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Source of yes/no answers for confirmation prompts
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Answers yes to everything (`--yes`)
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Asks on a writer and reads `y`/`yes` from a line reader; anything else,
/// including end of input, is a no
#[derive(Debug)]
pub struct LinePrompt<R, W> {
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> LinePrompt<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }
}

impl LinePrompt<io::StdinLock<'static>, io::Stderr> {
    /// Prompt on stderr, answer on stdin
    pub fn terminal() -> Self {
        Self::new(io::stdin().lock(), io::stderr())
    }
}

impl<R: BufRead, W: Write> Confirm for LinePrompt<R, W> {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        write!(self.writer, "{} [y/N] ", prompt)?;
        self.writer.flush()?;

        let mut answer = String::new();
        self.reader.read_line(&mut answer)?;

        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// What a successful run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: Vec<String>,
    pub skipped: Vec<String>,
    pub commit: CommitReport,
}

/// Drives a session through a list of steps
pub struct StepRunner<'a> {
    confirm: &'a mut dyn Confirm,
    default_timeout: Option<Duration>,
}

impl<'a> StepRunner<'a> {
    pub fn new(confirm: &'a mut dyn Confirm) -> Self {
        Self {
            confirm,
            default_timeout: None,
        }
    }

    /// Time budget for steps that do not set their own
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Run every step, then commit; roll back on the first failure
    pub fn run(&mut self, session: &mut Session, steps: Vec<Step>) -> Result<RunSummary> {
        session.begin()?;
        let mut summary = RunSummary::default();
        let total = steps.len();

        for (index, step) in steps.into_iter().enumerate() {
            let Step {
                description,
                action,
                compensation,
                snapshot_paths,
                installs,
                confirm,
                timeout,
            } = step;

            if let Some(prompt) = confirm {
                match self.confirm.confirm(&prompt) {
                    Ok(true) => {}
                    Ok(false) => {
                        info!("Skipping step: {}", description);
                        summary.skipped.push(description);
                        continue;
                    }
                    Err(e) => return Err(fail(session, description, e)),
                }
            }

            info!("[{}/{}] {}", index + 1, total, description);

            for path in &snapshot_paths {
                session.record_snapshot(path)?;
            }
            if let Some(compensation) = compensation {
                session.record_compensation(compensation)?;
            }

            let timeout = timeout.or(self.default_timeout);
            let result = match action {
                StepAction::Command { program, args } => session.host_mut().run(&program, &args, timeout),
                StepAction::Custom(body) => body(session.host_mut()),
            };

            if let Err(e) = result {
                return Err(fail(session, description, e));
            }

            for name in installs {
                session.record_installed_entity(name)?;
            }
            summary.completed.push(description);
        }

        summary.commit = session.commit()?;
        Ok(summary)
    }
}

/// Roll the session back and wrap the triggering error
fn fail(session: &mut Session, step: String, cause: Error) -> Error {
    error!("Step '{}' failed: {}", step, cause);

    let report = match session.rollback() {
        Ok(report) => report,
        Err(e) => {
            warn!("Rollback not performed: {}", e);
            UnwindReport::default()
        }
    };

    Error::StepFailed {
        step,
        cause: Box::new(cause),
        report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionState, WorkflowKind};
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;
    use tempfile::tempdir;

    #[derive(Clone, Default)]
    struct ScriptedHost {
        calls: Rc<RefCell<Vec<String>>>,
        failing_programs: Vec<String>,
        hanging_programs: Vec<String>,
    }

    impl Host for ScriptedHost {
        fn remove_entity(&mut self, name: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("remove {}", name));
            Ok(())
        }

        fn restore_entity(&mut self, name: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("restore {}", name));
            Ok(())
        }

        fn run(&mut self, program: &str, args: &[String], timeout: Option<Duration>) -> Result<()> {
            let suffix = timeout.map(|t| format!(" ({}s)", t.as_secs())).unwrap_or_default();
            self.calls
                .borrow_mut()
                .push(format!("run {}{}", crate::host::command_line(program, args), suffix));
            if self.failing_programs.iter().any(|p| p == program) {
                return Err(Error::CommandFailed {
                    command: program.to_string(),
                    status: "exit status: 1".to_string(),
                });
            }
            if self.hanging_programs.iter().any(|p| p == program) {
                return Err(Error::Timeout {
                    what: crate::host::command_line(program, args),
                    seconds: timeout.map(|t| t.as_secs()).unwrap_or_default(),
                });
            }
            Ok(())
        }

        fn clean_caches(&mut self) -> Result<()> {
            self.calls.borrow_mut().push("clean".to_string());
            Ok(())
        }
    }

    struct Answers(Vec<bool>);

    impl Confirm for Answers {
        fn confirm(&mut self, _prompt: &str) -> Result<bool> {
            Ok(self.0.remove(0))
        }
    }

    fn session(host: &ScriptedHost) -> Session {
        Session::new(WorkflowKind::Install, "test", Box::new(host.clone()))
    }

    #[test]
    fn test_successful_run_commits() {
        let host = ScriptedHost::default();
        let mut session = session(&host);
        let mut yes = AssumeYes;

        let steps = vec![
            Step::command("install engine", "apt-get", ["install", "-y", "docker-ce"]).installs("docker-ce"),
            Step::command("enable service", "systemctl", ["enable", "docker"])
                .with_compensation(Compensation::run_process("systemctl", ["disable", "docker"])),
        ];

        let summary = StepRunner::new(&mut yes).run(&mut session, steps).unwrap();

        assert_eq!(summary.completed, vec!["install engine", "enable service"]);
        assert_eq!(session.state(), SessionState::Committed);
        assert_eq!(
            *host.calls.borrow(),
            vec![
                "run apt-get install -y docker-ce",
                "run systemctl enable docker"
            ]
        );
    }

    #[test]
    fn test_failure_rolls_back_and_reports() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("docker.list");
        fs::write(&list, "original").unwrap();

        let host = ScriptedHost {
            failing_programs: vec!["systemctl".to_string()],
            ..Default::default()
        };
        let mut session = session(&host);
        let mut yes = AssumeYes;

        let list_for_step = list.clone();
        let steps = vec![
            Step::command("install engine", "apt-get", ["install", "-y", "docker-ce"]).installs("docker-ce"),
            Step::custom("write source list", move |_host| {
                fs::write(&list_for_step, "modified")?;
                Ok(())
            })
            .snapshot(&list),
            Step::command("start service", "systemctl", ["start", "docker"])
                .with_compensation(Compensation::run_process("systemctl", ["stop", "docker"])),
            Step::command("never reached", "true", Vec::<String>::new()),
        ];

        let err = StepRunner::new(&mut yes).run(&mut session, steps).unwrap_err();

        match err {
            Error::StepFailed { step, report, .. } => {
                assert_eq!(step, "start service");
                assert_eq!(report.entities_removed, 1);
                assert_eq!(report.paths_restored, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.state(), SessionState::RolledBack);
        assert_eq!(fs::read_to_string(&list).unwrap(), "original");
        assert_eq!(
            *host.calls.borrow(),
            vec![
                "run apt-get install -y docker-ce",
                "run systemctl start docker",
                "remove docker-ce",
                "run systemctl stop docker",
                "clean",
            ]
        );
    }

    #[test]
    fn test_timed_out_step_rolls_back() {
        let host = ScriptedHost {
            hanging_programs: vec!["curl".to_string()],
            ..Default::default()
        };
        let mut session = session(&host);
        let mut yes = AssumeYes;

        let steps = vec![
            Step::command("install engine", "apt-get", ["install", "-y", "docker-ce"]).installs("docker-ce"),
            Step::command("fetch compose", "curl", ["-fsSLO", "https://example.invalid/compose"])
                .with_compensation(Compensation::run_process("rm", ["-f", "compose"])),
        ];

        let err = StepRunner::new(&mut yes)
            .with_timeout(Some(Duration::from_secs(30)))
            .run(&mut session, steps)
            .unwrap_err();

        match err {
            Error::StepFailed { step, cause, report } => {
                assert_eq!(step, "fetch compose");
                assert!(matches!(*cause, Error::Timeout { seconds: 30, .. }));
                assert_eq!(report.entities_removed, 1);
                assert_eq!(report.compensations_run, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.state(), SessionState::RolledBack);
        assert_eq!(
            *host.calls.borrow(),
            vec![
                "run apt-get install -y docker-ce (30s)",
                "run curl -fsSLO https://example.invalid/compose (30s)",
                "remove docker-ce",
                "run rm -f compose",
                "clean",
            ]
        );
    }

    #[test]
    fn test_declined_step_is_skipped() {
        let host = ScriptedHost::default();
        let mut session = session(&host);
        let mut answers = Answers(vec![false, true]);

        let steps = vec![
            Step::command("add user to group", "usermod", ["-aG", "docker", "me"]).confirm("Add user?"),
            Step::command("enable service", "systemctl", ["enable", "docker"]).confirm("Enable?"),
        ];

        let summary = StepRunner::new(&mut answers).run(&mut session, steps).unwrap();

        assert_eq!(summary.skipped, vec!["add user to group"]);
        assert_eq!(summary.completed, vec!["enable service"]);
        assert_eq!(*host.calls.borrow(), vec!["run systemctl enable docker"]);
    }

    #[test]
    fn test_step_timeout_overrides_default() {
        let host = ScriptedHost::default();
        let mut session = session(&host);
        let mut yes = AssumeYes;

        let steps = vec![
            Step::command("fetch key", "curl", ["-fsSL", "https://example.invalid/gpg"])
                .timeout(Duration::from_secs(10)),
            Step::command("update index", "apt-get", ["update"]),
        ];

        StepRunner::new(&mut yes)
            .with_timeout(Some(Duration::from_secs(60)))
            .run(&mut session, steps)
            .unwrap();

        assert_eq!(
            *host.calls.borrow(),
            vec![
                "run curl -fsSL https://example.invalid/gpg (10s)",
                "run apt-get update (60s)"
            ]
        );
    }

    #[test]
    fn test_line_prompt_answers() {
        let mut out = Vec::new();
        let mut prompt = LinePrompt::new("Yes\n".as_bytes(), &mut out);
        assert!(prompt.confirm("Continue?").unwrap());
        assert_eq!(String::from_utf8(out).unwrap(), "Continue? [y/N] ");

        let mut prompt = LinePrompt::new("n\n".as_bytes(), Vec::new());
        assert!(!prompt.confirm("Continue?").unwrap());

        let mut prompt = LinePrompt::new("".as_bytes(), Vec::new());
        assert!(!prompt.confirm("Continue?").unwrap());
    }
}
