#![forbid(unsafe_code)]

//! `spawn-relay-ctl`: offline maintenance companion for `spawn-relay`.
//!
//! Works directly on the files the server keeps, so it is safe to run while
//! the server is stopped.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use spawn_relay::config::GlobalConfig;
use spawn_relay::persistence::registry_store::RegistryStore;

#[derive(Debug, Parser)]
#[command(
    name = "spawn-relay-ctl",
    about = "Offline maintenance for spawn-relay",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the server's TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the persisted spawn registry.
    List,

    /// Delete the agent's backup session logs
    /// (`<agent_home>/codex-master/*/sessions/*`).
    PruneBackups {
        /// Only print what would be deleted.
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();

    let config = match GlobalConfig::load_from_path(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match args.command {
        Command::List => list(&config),
        Command::PruneBackups { dry_run } => prune_backups(&config.agent.home_dir, dry_run),
    }
}

fn list(config: &GlobalConfig) -> ExitCode {
    let store = RegistryStore::new(config.registry_path(), config.allowed_providers.clone());
    let records = store.load();
    if records.is_empty() {
        println!("No spawns registered in {}", store.path().display());
        return ExitCode::SUCCESS;
    }
    for record in records.values() {
        println!(
            "{} ({}, {}) provider={} model={} dir={} conversation={}",
            record.spawn_id,
            record.execution_mode,
            record.verbosity,
            record.provider,
            record.model,
            record.working_dir.display(),
            record.conversation_ref.as_deref().unwrap_or("-"),
        );
    }
    ExitCode::SUCCESS
}

fn prune_backups(agent_home: &Path, dry_run: bool) -> ExitCode {
    let pattern = agent_home.join("codex-master").join("*").join("sessions").join("*");
    let paths = match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths,
        Err(err) => {
            eprintln!("Error: invalid backup pattern: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut failed = false;
    let mut removed = 0_usize;
    for path in paths.filter_map(std::result::Result::ok) {
        if dry_run {
            println!("would delete {}", path.display());
            continue;
        }
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => {
                println!("deleted {}", path.display());
                removed += 1;
            }
            Err(err) => {
                eprintln!("failed to delete {}: {err}", path.display());
                failed = true;
            }
        }
    }
    if !dry_run {
        println!("{removed} backup(s) deleted");
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
