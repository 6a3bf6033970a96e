//! Migration-specific error types.

use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Migration-specific errors.
///
/// None of these are retried by the engine. Any of them aborts the current
/// run; [`MigrationError::is_inconsistent`] tells the caller whether manual
/// intervention is needed.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Reading the migration directory or a migration file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A migration file is not well-formed.
    #[error("failed to parse migration {id}: {message}")]
    Parse {
        /// Migration identifier.
        id: String,
        /// Parser message.
        message: String,
    },

    /// A migration file is well-formed but structurally invalid.
    #[error("invalid migration {id}: {reason}")]
    Validation {
        /// Migration identifier.
        id: String,
        /// What is wrong with it.
        reason: String,
    },

    /// An applied migration's file changed after it was applied.
    #[error("migration file has been modified since last applied: {id} (use force to override)")]
    Integrity {
        /// Migration identifier.
        id: String,
        /// Hash recorded in the ledger.
        recorded: String,
        /// Hash of the file on disk.
        actual: String,
    },

    /// Operation type has no handler.
    #[error("unsupported operation type: {kind}")]
    UnsupportedOperation {
        /// The type tag from the file.
        kind: String,
        /// Operation name.
        name: String,
    },

    /// A document placeholder could not be expanded.
    #[error("placeholder substitution failed for field '{field}': {reason}")]
    Substitution {
        /// Field holding the placeholder.
        field: String,
        /// Why expansion failed.
        reason: String,
    },

    /// A store call made by an operation handler failed.
    #[error("{kind} '{name}' failed: {source}")]
    OperationExecution {
        /// Operation type.
        kind: String,
        /// Operation name.
        name: String,
        /// Store error.
        #[source]
        source: StoreError,
    },

    /// Compensation was attempted on an operation with no inverse.
    #[error("cannot compensate {kind} '{name}': {reason}")]
    IrreversibleOperation {
        /// Operation type.
        kind: String,
        /// Operation name.
        name: String,
        /// Why it cannot be undone.
        reason: String,
    },

    /// Compensation failed after an operation failure. The database may be
    /// inconsistent.
    #[error("compensation failed, database may be inconsistent: {compensation} (original failure: {original})")]
    CompensationFailed {
        /// The failure that triggered compensation.
        original: Box<MigrationError>,
        /// The failure raised while compensating.
        compensation: Box<MigrationError>,
    },

    /// The caller's cancellation token fired at an operation boundary.
    #[error("run cancelled: {reason}")]
    Cancelled {
        /// Why the token fired.
        reason: String,
    },

    /// An operation of a migration failed.
    #[error("migration {id} failed at operation {index}: {source}")]
    OperationFailed {
        /// Migration identifier.
        id: String,
        /// Zero-based operation index.
        index: usize,
        /// The failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// Reading or creating the ledger failed.
    #[error("ledger error: {0}")]
    Ledger(#[source] StoreError),

    /// A ledger record could not be decoded.
    #[error("failed to decode ledger record {id}: {message}")]
    LedgerDecode {
        /// Record key.
        id: String,
        /// Decoder message.
        message: String,
    },

    /// Operations succeeded but the ledger record could not be written.
    #[error("failed to mark migration {id} as applied, database may be inconsistent: {source}")]
    CommitFailed {
        /// Migration identifier.
        id: String,
        /// Store error.
        #[source]
        source: StoreError,
    },
}

impl MigrationError {
    /// The underlying cause, looking through [`MigrationError::OperationFailed`].
    pub fn root(&self) -> &MigrationError {
        match self {
            MigrationError::OperationFailed { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the store may be left in a state that needs manual repair.
    pub fn is_inconsistent(&self) -> bool {
        matches!(
            self,
            MigrationError::CompensationFailed { .. } | MigrationError::CommitFailed { .. }
        )
    }

    pub(crate) fn validation(id: &str, reason: impl Into<String>) -> Self {
        MigrationError::Validation {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
