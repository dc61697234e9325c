// src/main.rs

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use rtinstall::config::{DEFAULT_DB_PATH, Settings};
use rtinstall::db::models::SessionRecord;
use rtinstall::host::SystemHost;
use rtinstall::plan::Plan;
use rtinstall::step::{AssumeYes, Confirm, LinePrompt, StepRunner};
use rtinstall::{Error, Ledger, Session};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "rtinstall")]
#[command(author, version, about = "Container runtime installer with transactional rollback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow plan, rolling back every recorded step if one fails
    Run {
        /// Path to the plan file (JSON)
        plan: PathBuf,
        /// Answer yes to every confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Settings file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory for snapshot backups (default: private temp dir)
        #[arg(short, long)]
        backup_dir: Option<PathBuf>,
        /// Time budget in seconds for each external step
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Record the session in this history database
        #[arg(short, long)]
        db_path: Option<PathBuf>,
    },
    /// Show recorded sessions
    History {
        /// Database path (default: /var/lib/rtinstall/history.db)
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Print a shell completion script
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Settings from file (if any) with command-line overrides applied
fn load_settings(
    config: Option<&Path>,
    backup_dir: Option<PathBuf>,
    timeout: Option<u64>,
    db_path: Option<PathBuf>,
) -> Result<Settings> {
    let mut settings = match config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };

    if backup_dir.is_some() {
        settings.backup_dir = backup_dir;
    }
    if timeout.is_some() {
        settings.step_timeout_secs = timeout;
    }
    if db_path.is_some() {
        settings.db_path = db_path;
    }

    settings.validate()?;
    Ok(settings)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow::anyhow!("Path is not valid UTF-8: {}", path.display()))
}

fn run_plan(plan_path: &Path, yes: bool, settings: Settings) -> Result<ExitCode> {
    let plan = Plan::load(plan_path)
        .with_context(|| format!("Failed to load plan {}", plan_path.display()))?;
    info!(
        "Loaded plan '{}' ({} workflow, {} steps)",
        plan.name,
        plan.workflow,
        plan.steps.len()
    );

    let host = SystemHost::new(&settings)?;
    let ledger = match &settings.backup_dir {
        Some(dir) => Ledger::with_backup_dir(dir),
        None => Ledger::new(),
    };
    let workflow = plan.workflow;
    let name = plan.name.clone();
    let mut session = Session::with_ledger(workflow, name.clone(), ledger, Box::new(host));

    let mut history = match &settings.db_path {
        Some(path) => {
            let conn = rtinstall::db::open_or_init(path_str(path)?)?;
            let mut record = SessionRecord::new(workflow, name.clone());
            record.insert(&conn)?;
            Some((conn, record))
        }
        None => None,
    };

    let mut confirm: Box<dyn Confirm> = if yes {
        Box::new(AssumeYes)
    } else {
        Box::new(LinePrompt::terminal())
    };

    let result = StepRunner::new(confirm.as_mut())
        .with_timeout(settings.step_timeout())
        .run(&mut session, plan.into_steps());

    match result {
        Ok(summary) => {
            if let Some((conn, record)) = history.as_mut() {
                if let Err(e) = record.mark_committed(conn) {
                    warn!("Could not record session outcome: {}", e);
                }
            }

            println!("{} {} completed", workflow, name);
            println!("  Steps run: {}", summary.completed.len());
            if !summary.skipped.is_empty() {
                println!("  Skipped: {}", summary.skipped.join(", "));
            }
            if !summary.commit.backups_leaked.is_empty() {
                println!("  Backups left on disk: {}", summary.commit.backups_leaked.join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(Error::StepFailed { step, cause, report }) => {
            if let Some((conn, record)) = history.as_mut() {
                if let Err(e) = record.mark_rolled_back(conn, &report) {
                    warn!("Could not record session outcome: {}", e);
                }
            }

            error!("{} {} failed at '{}': {}", workflow, name, step, cause);
            eprintln!("{} failed at step '{}': {}", workflow, step, cause);
            eprintln!("Rollback: {}", report);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

fn show_history(db_path: &str) -> Result<()> {
    let conn = rtinstall::db::open(db_path)?;
    let records = SessionRecord::list_all(&conn)?;

    if records.is_empty() {
        println!("No session history.");
        return Ok(());
    }

    println!("Session history:");
    for record in &records {
        let timestamp = record
            .finished_at
            .as_ref()
            .or(record.started_at.as_ref())
            .map(|s| s.as_str())
            .unwrap_or("unknown");

        println!(
            "  [{}] {} - {} {} ({})",
            record.id.unwrap_or_default(),
            timestamp,
            record.workflow,
            record.description,
            record.status.as_str()
        );
        if let Some(summary) = &record.undo_summary {
            println!("      {}", summary);
        }
    }
    println!("\nTotal: {} session(s)", records.len());

    Ok(())
}

fn main() -> Result<ExitCode> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run {
            plan,
            yes,
            config,
            backup_dir,
            timeout,
            db_path,
        }) => {
            let settings = load_settings(config.as_deref(), backup_dir, timeout, db_path)?;
            run_plan(&plan, yes, settings)
        }
        Some(Commands::History { db_path }) => {
            show_history(&db_path)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "rtinstall", &mut std::io::stdout());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("rtinstall v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'rtinstall --help' for usage information");
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "rtinstall", "run", "plan.json", "--yes", "--timeout", "30", "--backup-dir", "/tmp/b",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Run {
                plan,
                yes,
                timeout,
                backup_dir,
                config,
                db_path,
            }) => {
                assert_eq!(plan, PathBuf::from("plan.json"));
                assert!(yes);
                assert_eq!(timeout, Some(30));
                assert_eq!(backup_dir, Some(PathBuf::from("/tmp/b")));
                assert!(config.is_none());
                assert!(db_path.is_none());
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_history_default_db_path() {
        let cli = Cli::try_parse_from(["rtinstall", "history"]).unwrap();
        match cli.command {
            Some(Commands::History { db_path }) => assert_eq!(db_path, DEFAULT_DB_PATH),
            _ => panic!("expected history command"),
        }
    }

    #[test]
    fn test_flags_override_settings_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{ "step_timeout_secs": 10, "backup_dir": "/from/file" }"#).unwrap();

        let settings = load_settings(Some(file.path()), None, Some(99), Some(PathBuf::from("/h.db"))).unwrap();

        assert_eq!(settings.step_timeout_secs, Some(99));
        assert_eq!(settings.backup_dir, Some(PathBuf::from("/from/file")));
        assert_eq!(settings.db_path, Some(PathBuf::from("/h.db")));
    }

    #[test]
    fn test_zero_timeout_flag_rejected() {
        assert!(load_settings(None, None, Some(0), None).is_err());
    }
}
