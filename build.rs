// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("rtinstall")
        .version(env!("CARGO_PKG_VERSION"))
        .author("rtinstall Contributors")
        .about("Container runtime installer with transactional rollback")
        .subcommand_required(false)
        .subcommand(
            Command::new("run")
                .about("Run a workflow plan, rolling back every recorded step if one fails")
                .arg(Arg::new("plan").required(true).help("Path to the plan file (JSON)"))
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .action(clap::ArgAction::SetTrue)
                        .help("Answer yes to every confirmation prompt"),
                )
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("Settings file (JSON)"),
                )
                .arg(
                    Arg::new("backup_dir")
                        .short('b')
                        .long("backup-dir")
                        .value_name("DIR")
                        .help("Directory for snapshot backups"),
                )
                .arg(
                    Arg::new("timeout")
                        .short('t')
                        .long("timeout")
                        .value_name("SECS")
                        .help("Time budget in seconds for each external step"),
                )
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .value_name("PATH")
                        .help("Record the session in this history database"),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("Show recorded sessions")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .value_name("PATH")
                        .default_value("/var/lib/rtinstall/history.db")
                        .help("Database path"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Print a shell completion script")
                .arg(Arg::new("shell").required(true).help("Target shell")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("rtinstall.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
