//! Run state machine and cancellation.

use super::error::MigrationError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How a failed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Failed before any operation executed; nothing to undo.
    Aborted,
    /// Applied operations were undone.
    Compensated,
    /// The store may hold partial effects that need manual repair.
    Inconsistent,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Aborted => write!(f, "aborted"),
            FailureKind::Compensated => write!(f, "compensated"),
            FailureKind::Inconsistent => write!(f, "inconsistent"),
        }
    }
}

/// State of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Reading the migration directory.
    Scanning,
    /// Computing the pending set.
    Planning,
    /// Executing an operation.
    Applying {
        /// Migration id.
        migration: String,
        /// Zero-based operation index.
        operation: usize,
    },
    /// Writing ledger records.
    Committing,
    /// Undoing applied operations after a failure.
    Compensating,
    /// Every pending migration was applied and recorded.
    Done,
    /// The run failed.
    Failed(FailureKind),
}

impl RunState {
    /// Whether the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed(_))
    }

    /// Whether moving to `next` is a legal transition.
    ///
    /// `Committing` may return to `Applying` because per-migration scope
    /// commits each migration before starting the next one.
    pub fn can_transition_to(&self, next: &RunState) -> bool {
        use RunState::*;

        match (self, next) {
            (Scanning, Planning) => true,
            (Scanning, Failed(FailureKind::Aborted)) => true,
            (Planning, Applying { .. } | Committing) => true,
            // Dry runs stop after planning.
            (Planning, Done) => true,
            (Planning, Failed(FailureKind::Aborted)) => true,
            (Applying { .. }, Applying { .. } | Committing | Compensating) => true,
            (Committing, Applying { .. } | Done) => true,
            (Committing, Failed(FailureKind::Inconsistent)) => true,
            (Compensating, Failed(FailureKind::Compensated | FailureKind::Inconsistent)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Scanning => write!(f, "scanning"),
            RunState::Planning => write!(f, "planning"),
            RunState::Applying {
                migration,
                operation,
            } => write!(f, "applying({}, {})", migration, operation),
            RunState::Committing => write!(f, "committing"),
            RunState::Compensating => write!(f, "compensating"),
            RunState::Done => write!(f, "done"),
            RunState::Failed(kind) => write!(f, "failed({})", kind),
        }
    }
}

/// Cooperative cancellation signal, checked before each operation.
///
/// Clones share the same flag. A deadline, if set, fires on its own.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    /// A token that only fires when [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also fires once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.deadline_passed()
    }

    /// Return [`MigrationError::Cancelled`] if the token has fired.
    pub fn check(&self) -> Result<(), MigrationError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(MigrationError::Cancelled {
                reason: "cancellation requested".to_string(),
            });
        }
        if self.deadline_passed() {
            return Err(MigrationError::Cancelled {
                reason: "deadline exceeded".to_string(),
            });
        }
        Ok(())
    }

    fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}
