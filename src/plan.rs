// src/plan.rs

//! JSON workflow plans
//!
//! A plan lists the steps of one workflow in the order they run:
//!
//! ```json
//! {
//!   "name": "container runtime",
//!   "workflow": "install",
//!   "steps": [
//!     {
//!       "description": "Add repository list",
//!       "command": ["cp", "docker.list", "/etc/apt/sources.list.d/docker.list"],
//!       "compensation": { "kind": "delete-path", "path": "/etc/apt/sources.list.d/docker.list" }
//!     },
//!     {
//!       "description": "Install engine",
//!       "command": ["apt-get", "install", "-y", "docker-ce"],
//!       "installs": ["docker-ce"],
//!       "confirm": "Install docker-ce?",
//!       "timeout_secs": 600
//!     }
//!   ]
//! }
//! ```

use crate::error::{Error, Result};
use crate::ledger::Compensation;
use crate::session::WorkflowKind;
use crate::step::Step;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// A parsed workflow plan
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub name: String,
    pub workflow: WorkflowKind,
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
    pub description: String,
    /// argv; the first element is the program
    pub command: Vec<String>,
    #[serde(default)]
    pub confirm: Option<String>,
    #[serde(default)]
    pub snapshot: Vec<PathBuf>,
    #[serde(default)]
    pub installs: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub compensation: Option<PlanCompensation>,
}

/// Serializable subset of [`Compensation`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PlanCompensation {
    RestorePackage {
        name: String,
    },
    DeletePath {
        path: PathBuf,
    },
    Run {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl From<PlanCompensation> for Compensation {
    fn from(value: PlanCompensation) -> Self {
        match value {
            PlanCompensation::RestorePackage { name } => Compensation::RestorePackage { name },
            PlanCompensation::DeletePath { path } => Compensation::DeletePath { path },
            PlanCompensation::Run { program, args } => Compensation::RunProcess { program, args },
        }
    }
}

impl Plan {
    /// Read and validate a plan file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading plan from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let plan: Plan = serde_json::from_str(raw)?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidPlan("plan name is empty".to_string()));
        }

        for (index, step) in self.steps.iter().enumerate() {
            let position = index + 1;
            if step.description.trim().is_empty() {
                return Err(Error::InvalidPlan(format!("step {} has no description", position)));
            }
            if step.command.first().is_none_or(|program| program.is_empty()) {
                return Err(Error::InvalidPlan(format!(
                    "step {} ({}) has no command",
                    position, step.description
                )));
            }
            if step.timeout_secs == Some(0) {
                return Err(Error::InvalidPlan(format!(
                    "step {} ({}) has a zero timeout",
                    position, step.description
                )));
            }
            if let Some(PlanCompensation::Run { program, .. }) = &step.compensation {
                if program.is_empty() {
                    return Err(Error::InvalidPlan(format!(
                        "step {} ({}) has a compensation without a program",
                        position, step.description
                    )));
                }
            }
        }

        Ok(())
    }

    /// Turn the plan into runnable steps
    pub fn into_steps(self) -> Vec<Step> {
        self.steps.into_iter().map(PlanStep::into_step).collect()
    }
}

impl PlanStep {
    fn into_step(self) -> Step {
        let mut argv = self.command.into_iter();
        let program = argv.next().unwrap_or_default();
        let mut step = Step::command(self.description, program, argv);

        for path in self.snapshot {
            step = step.snapshot(path);
        }
        for name in self.installs {
            step = step.installs(name);
        }
        if let Some(prompt) = self.confirm {
            step = step.confirm(prompt);
        }
        if let Some(secs) = self.timeout_secs {
            step = step.timeout(Duration::from_secs(secs));
        }
        if let Some(compensation) = self.compensation {
            step = step.with_compensation(compensation.into());
        }

        step
    }
}
