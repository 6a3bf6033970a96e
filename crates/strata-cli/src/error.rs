//! CLI error types.

use std::path::PathBuf;
use strata_core::MigrationError;
use thiserror::Error;

/// Errors surfaced by the command-line runner.
#[derive(Debug, Error)]
pub enum CliError {
    /// The migration folder is missing.
    #[error("migration folder does not exist: {}", .0.display())]
    MissingFolder(PathBuf),

    /// The data directory could not be opened.
    #[error("failed to open data directory {}: {source}", .path.display())]
    Store {
        /// Data directory.
        path: PathBuf,
        /// Store error.
        #[source]
        source: strata_store::Error,
    },

    /// The engine failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Writing output failed.
    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code. Inconsistent databases get their own code so
    /// scripts can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Migration(e) if e.is_inconsistent() => 2,
            _ => 1,
        }
    }
}
