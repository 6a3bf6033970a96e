//! Structured run events and observers.
//!
//! The engine reports progress as [`MigrationEvent`] values handed to an
//! injected [`MigrationObserver`]. [`TracingObserver`] forwards them to
//! `tracing`; [`MemoryObserver`] keeps them for inspection.

use super::state::RunState;
use parking_lot::Mutex;
use std::sync::Arc;

/// Importance of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Fine-grained progress.
    Debug,
    /// Normal progress.
    Info,
    /// Something unexpected that did not stop the run.
    Warn,
    /// The run failed.
    Error,
}

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationEvent {
    /// The run moved to a new state.
    StateChanged {
        /// New state.
        state: RunState,
    },
    /// A directory entry was not treated as a migration.
    FileSkipped {
        /// Entry name.
        file_name: String,
        /// Why.
        reason: String,
    },
    /// A migration is already recorded in the ledger.
    AlreadyApplied {
        /// Migration id.
        migration: String,
    },
    /// An applied migration's file no longer matches its recorded hash.
    ChecksumMismatch {
        /// Migration id.
        migration: String,
        /// Hash in the ledger.
        recorded: String,
        /// Hash of the file now.
        actual: String,
        /// Whether force let the run continue.
        forced: bool,
    },
    /// A migration was selected to run.
    MigrationPlanned {
        /// Migration id.
        migration: String,
        /// Number of operations.
        operations: usize,
    },
    /// A migration started executing.
    MigrationStarted {
        /// Migration id.
        migration: String,
        /// Description from the file.
        description: String,
    },
    /// An operation succeeded.
    OperationApplied {
        /// Migration id.
        migration: String,
        /// Zero-based index.
        index: usize,
        /// Type tag.
        kind: String,
        /// Resource name.
        name: String,
    },
    /// An operation failed.
    OperationFailed {
        /// Migration id.
        migration: String,
        /// Zero-based index.
        index: usize,
        /// Type tag.
        kind: String,
        /// Resource name.
        name: String,
        /// Error message.
        error: String,
    },
    /// Every operation of a migration succeeded.
    MigrationApplied {
        /// Migration id.
        migration: String,
        /// Number of operations applied.
        operations: usize,
    },
    /// A ledger record was written.
    LedgerCommitted {
        /// Migration id.
        migration: String,
    },
    /// Compensation began.
    CompensationStarted {
        /// Number of operations to undo.
        operations: usize,
    },
    /// An operation was undone.
    OperationCompensated {
        /// Type tag.
        kind: String,
        /// Resource name.
        name: String,
    },
    /// Undoing an operation failed.
    CompensationFailed {
        /// Type tag.
        kind: String,
        /// Resource name.
        name: String,
        /// Error message.
        error: String,
    },
    /// The run ended.
    RunFinished {
        /// Migrations applied.
        applied: usize,
        /// Migrations already recorded.
        skipped: usize,
        /// Whether nothing was executed.
        dry_run: bool,
    },
}

impl MigrationEvent {
    /// Severity of the event.
    pub fn severity(&self) -> Severity {
        match self {
            MigrationEvent::StateChanged {
                state: RunState::Failed(_),
            } => Severity::Error,
            MigrationEvent::StateChanged { .. } => Severity::Debug,
            MigrationEvent::FileSkipped { .. } => Severity::Warn,
            MigrationEvent::AlreadyApplied { .. } => Severity::Debug,
            MigrationEvent::ChecksumMismatch { forced: true, .. } => Severity::Warn,
            MigrationEvent::ChecksumMismatch { forced: false, .. } => Severity::Error,
            MigrationEvent::MigrationPlanned { .. } => Severity::Debug,
            MigrationEvent::MigrationStarted { .. } => Severity::Info,
            MigrationEvent::OperationApplied { .. } => Severity::Debug,
            MigrationEvent::OperationFailed { .. } => Severity::Error,
            MigrationEvent::MigrationApplied { .. } => Severity::Info,
            MigrationEvent::LedgerCommitted { .. } => Severity::Debug,
            MigrationEvent::CompensationStarted { .. } => Severity::Warn,
            MigrationEvent::OperationCompensated { .. } => Severity::Info,
            MigrationEvent::CompensationFailed { .. } => Severity::Error,
            MigrationEvent::RunFinished { .. } => Severity::Info,
        }
    }
}

/// Receives run events.
pub trait MigrationObserver: Send + Sync {
    /// Handle one event.
    fn on_event(&self, event: &MigrationEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl MigrationObserver for TracingObserver {
    fn on_event(&self, event: &MigrationEvent) {
        match event {
            MigrationEvent::StateChanged { state } => match event.severity() {
                Severity::Error => tracing::error!(state = %state, "migration run failed"),
                _ => tracing::debug!(state = %state, "run state changed"),
            },
            MigrationEvent::FileSkipped { file_name, reason } => {
                tracing::warn!(file = %file_name, reason = %reason, "skipping non-migration entry")
            }
            MigrationEvent::AlreadyApplied { migration } => {
                tracing::debug!(migration = %migration, "migration already applied")
            }
            MigrationEvent::ChecksumMismatch {
                migration,
                recorded,
                actual,
                forced,
            } => {
                if *forced {
                    tracing::warn!(
                        migration = %migration,
                        recorded = %recorded,
                        actual = %actual,
                        "migration file modified since applied, continuing due to force"
                    )
                } else {
                    tracing::error!(
                        migration = %migration,
                        recorded = %recorded,
                        actual = %actual,
                        "migration file modified since applied"
                    )
                }
            }
            MigrationEvent::MigrationPlanned {
                migration,
                operations,
            } => tracing::debug!(migration = %migration, operations, "migration pending"),
            MigrationEvent::MigrationStarted {
                migration,
                description,
            } => tracing::info!(migration = %migration, description = %description, "applying migration"),
            MigrationEvent::OperationApplied {
                migration,
                index,
                kind,
                name,
            } => tracing::debug!(
                migration = %migration,
                operation = index,
                kind = %kind,
                name = %name,
                "operation applied"
            ),
            MigrationEvent::OperationFailed {
                migration,
                index,
                kind,
                name,
                error,
            } => tracing::error!(
                migration = %migration,
                operation = index,
                kind = %kind,
                name = %name,
                error = %error,
                "operation failed"
            ),
            MigrationEvent::MigrationApplied {
                migration,
                operations,
            } => tracing::info!(migration = %migration, operations, "migration applied"),
            MigrationEvent::LedgerCommitted { migration } => {
                tracing::debug!(migration = %migration, "ledger record written")
            }
            MigrationEvent::CompensationStarted { operations } => {
                tracing::warn!(operations, "rolling back applied operations")
            }
            MigrationEvent::OperationCompensated { kind, name } => {
                tracing::info!(kind = %kind, name = %name, "operation rolled back")
            }
            MigrationEvent::CompensationFailed { kind, name, error } => tracing::error!(
                kind = %kind,
                name = %name,
                error = %error,
                "rollback failed, database may be inconsistent"
            ),
            MigrationEvent::RunFinished {
                applied,
                skipped,
                dry_run,
            } => tracing::info!(applied, skipped, dry_run, "migration run finished"),
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryObserver {
    events: Arc<Mutex<Vec<MigrationEvent>>>,
}

impl MemoryObserver {
    /// Create an empty observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far.
    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events.lock().clone()
    }

    /// Events at or above a severity.
    pub fn events_at(&self, severity: Severity) -> Vec<MigrationEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.severity() >= severity)
            .cloned()
            .collect()
    }

    /// Sequence of states the run passed through.
    pub fn states(&self) -> Vec<RunState> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                MigrationEvent::StateChanged { state } => Some(state.clone()),
                _ => None,
            })
            .collect()
    }

    /// Drop all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl MigrationObserver for MemoryObserver {
    fn on_event(&self, event: &MigrationEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Discards all events.
#[derive(Debug, Default)]
pub struct NullObserver;

impl MigrationObserver for NullObserver {
    fn on_event(&self, _event: &MigrationEvent) {}
}
