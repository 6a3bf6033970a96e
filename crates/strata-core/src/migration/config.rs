//! Engine configuration.

use super::compensation::RollbackScope;
use std::path::PathBuf;

/// Default migration directory.
pub const DEFAULT_MIGRATION_DIR: &str = "./migrations";

/// Default ledger collection name.
pub const DEFAULT_LEDGER_COLLECTION: &str = "migrations";

/// Configuration for a [`Migrator`](super::Migrator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigratorConfig {
    /// Directory holding migration files.
    pub migration_dir: PathBuf,
    /// Collection holding ledger records.
    pub ledger_collection: String,
    /// Continue past hash mismatches on applied migrations (they are still
    /// not re-applied).
    pub force: bool,
    /// Which operations are undone when one fails.
    pub rollback_scope: RollbackScope,
    /// Plan only; execute nothing and leave the ledger untouched.
    pub dry_run: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            migration_dir: PathBuf::from(DEFAULT_MIGRATION_DIR),
            ledger_collection: DEFAULT_LEDGER_COLLECTION.to_string(),
            force: false,
            rollback_scope: RollbackScope::default(),
            dry_run: false,
        }
    }
}

impl MigratorConfig {
    /// Configuration reading migrations from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            migration_dir: dir.into(),
            ..Self::default()
        }
    }

    /// Set the ledger collection name.
    pub fn with_ledger_collection(mut self, name: impl Into<String>) -> Self {
        self.ledger_collection = name.into();
        self
    }

    /// Set the force flag.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Set the rollback scope.
    pub fn with_rollback_scope(mut self, scope: RollbackScope) -> Self {
        self.rollback_scope = scope;
        self
    }

    /// Set dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}
