//! Strata Command-Line Migration Runner
//!
//! Applies the JSON migrations in a folder to a local Strata data directory.

mod commands;
mod error;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use strata_core::migration::{DEFAULT_LEDGER_COLLECTION, DEFAULT_MIGRATION_DIR};
use tracing_subscriber::filter::LevelFilter;

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Strata migration runner
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about = "Apply Strata migrations to a data directory")]
pub struct Args {
    /// Data directory of the store
    #[arg(long, env = "STRATA_DATA_DIR", default_value = "./strata_data")]
    pub data_dir: PathBuf,

    /// Folder containing migration files
    #[arg(long, env = "MIGRATION_FOLDER", default_value = DEFAULT_MIGRATION_DIR)]
    pub migration_folder: PathBuf,

    /// Collection holding applied-migration records
    #[arg(long, env = "MIGRATION_COLLECTION", default_value = DEFAULT_LEDGER_COLLECTION)]
    pub migration_collection: String,

    /// Continue when an applied migration file has changed
    #[arg(long, env = "FORCE")]
    pub force: bool,

    /// Roll back every migration of the run when one fails
    #[arg(long, env = "AUTO_ROLLBACK")]
    pub auto_rollback: bool,

    /// Show what would run without changing anything
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// Debug-level logging
    #[arg(short, long, env = "VERBOSE", conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, env = "QUIET")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What to do.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Apply pending migrations (default)
    Migrate,
    /// List every migration with its ledger status
    Status,
    /// List pending migrations without applying them
    Plan,
}

impl Args {
    fn log_level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::DEBUG
        } else if self.quiet {
            LevelFilter::ERROR
        } else {
            LevelFilter::INFO
        }
    }
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(args.log_level().into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut stdout = std::io::stdout().lock();
    if let Err(e) = commands::execute(&args, &mut stdout) {
        tracing::error!(error = %e, "migration failed");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
