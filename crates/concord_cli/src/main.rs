//! Concord CLI
//!
//! Offline tools for Concord transaction logs.
//!
//! # Commands
//!
//! - `inspect` - Summarize the latest state of every coordinator
//! - `verify` - Check every record's framing and checksum
//! - `dump-log` - Print log records for debugging
//! - `lock-status` - Report whether a running instance holds the log

mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use crate::error::CliError;

/// Concord transaction log tools.
#[derive(Parser)]
#[command(name = "concord")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Base name of the log and lock files
    #[arg(global = true, short, long, default_value = "tmlog")]
    base: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the latest state of every coordinator
    Inspect {
        /// Also list terminated coordinators
        #[arg(short, long)]
        all: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify log integrity
    Verify,

    /// Dump log records for debugging
    DumpLog {
        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only records of this coordinator
        #[arg(short, long)]
        coordinator: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Report whether the log is locked by a running instance
    LockStatus,

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let base = cli.base;
    match cli.command {
        Commands::Inspect { all, format } => {
            let path = cli.path.ok_or(CliError::PathRequired("inspect"))?;
            commands::inspect::run(&path, &base, all, &format)
        }
        Commands::Verify => {
            let path = cli.path.ok_or(CliError::PathRequired("verify"))?;
            commands::verify::run(&path, &base)
        }
        Commands::DumpLog {
            limit,
            coordinator,
            format,
        } => {
            let path = cli.path.ok_or(CliError::PathRequired("dump-log"))?;
            commands::dump_log::run(&path, &base, limit, coordinator.as_deref(), &format)
        }
        Commands::LockStatus => {
            let path = cli.path.ok_or(CliError::PathRequired("lock-status"))?;
            commands::lock_status::run(&path, &base)
        }
        Commands::Version => {
            println!("Concord CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Log format v{}", concord_core::log::LOG_VERSION);
            Ok(())
        }
    }
}
