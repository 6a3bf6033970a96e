//! Compensation of applied operations after a failure.

use super::error::MigrationError;
use super::event::{MigrationEvent, MigrationObserver};
use super::executor::OperationExecutor;
use super::operation::OperationResult;

/// Which applied operations are undone when an operation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RollbackScope {
    /// Undo only the failing migration's operations. Earlier migrations of
    /// the run stay applied and recorded.
    #[default]
    PerMigration,
    /// Undo every operation of the run. Nothing is recorded unless the whole
    /// run succeeds.
    Batch,
}

impl std::fmt::Display for RollbackScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RollbackScope::PerMigration => write!(f, "per-migration"),
            RollbackScope::Batch => write!(f, "batch"),
        }
    }
}

/// Undo `applied` in reverse order.
///
/// Stops at the first operation that cannot be undone and returns its error.
/// Returns the number of operations undone otherwise.
pub fn compensate(
    executor: &OperationExecutor<'_>,
    applied: &[OperationResult],
    observer: &dyn MigrationObserver,
) -> Result<usize, MigrationError> {
    observer.on_event(&MigrationEvent::CompensationStarted {
        operations: applied.len(),
    });

    for result in applied.iter().rev() {
        if let Err(e) = executor.compensate(result) {
            observer.on_event(&MigrationEvent::CompensationFailed {
                kind: result.kind.clone(),
                name: result.name.clone(),
                error: e.to_string(),
            });
            return Err(e);
        }
        observer.on_event(&MigrationEvent::OperationCompensated {
            kind: result.kind.clone(),
            name: result.name.clone(),
        });
    }

    Ok(applied.len())
}
