//! Run orchestration.
//!
//! A run walks `Scanning -> Planning -> Applying -> Committing -> Done`. When
//! an operation fails (or the cancellation token fires) the run moves to
//! `Compensating` and ends in `Failed(Compensated)` or
//! `Failed(Inconsistent)`. Failures before the first operation end in
//! `Failed(Aborted)`.

use super::compensation::{self, RollbackScope};
use super::config::MigratorConfig;
use super::error::MigrationError;
use super::event::{MigrationEvent, MigrationObserver, TracingObserver};
use super::executor::OperationExecutor;
use super::ledger::{AppliedMigrationRecord, Ledger};
use super::operation::OperationResult;
use super::planner::{self, MigrationStatusEntry, PendingMigration, Plan};
use super::source::{MigrationSource, Scan};
use super::state::{CancellationToken, FailureKind, RunState};
use crate::store::BackingStore;
use std::sync::Arc;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Migrations applied and recorded by this run.
    pub applied: Vec<String>,
    /// Migrations that were already recorded.
    pub skipped: Vec<String>,
    /// Migrations selected to run. In a dry run nothing was executed.
    pub pending: Vec<String>,
    /// Operations executed.
    pub operations_applied: usize,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Final state.
    pub state: RunState,
}

/// Tracks the run state and reports transitions.
struct StateTracker<'a> {
    state: RunState,
    observer: &'a dyn MigrationObserver,
}

impl<'a> StateTracker<'a> {
    fn new(observer: &'a dyn MigrationObserver) -> Self {
        observer.on_event(&MigrationEvent::StateChanged {
            state: RunState::Scanning,
        });
        Self {
            state: RunState::Scanning,
            observer,
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.state == next {
            return;
        }
        debug_assert!(
            self.state.can_transition_to(&next),
            "illegal run transition {} -> {}",
            self.state,
            next
        );
        self.observer.on_event(&MigrationEvent::StateChanged {
            state: next.clone(),
        });
        self.state = next;
    }
}

/// Applies pending migrations from a directory to a backing store.
pub struct Migrator {
    store: Arc<dyn BackingStore>,
    config: MigratorConfig,
    observer: Arc<dyn MigrationObserver>,
    cancel: CancellationToken,
}

impl Migrator {
    /// Create a migrator that reports through `tracing`.
    pub fn new(store: Arc<dyn BackingStore>, config: MigratorConfig) -> Self {
        Self {
            store,
            config,
            observer: Arc::new(TracingObserver),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the event observer.
    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Honor a cancellation token between operations.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Compute the pending set without executing anything or creating the
    /// ledger.
    pub fn plan(&self) -> Result<Plan, MigrationError> {
        let ledger = Ledger::attach(self.store.clone(), &self.config.ledger_collection)?;
        let scan = self.scan()?;
        planner::plan(&scan.files, &ledger, self.config.force, self.observer.as_ref())
    }

    /// Report the ledger standing of every migration file.
    pub fn status(&self) -> Result<Vec<MigrationStatusEntry>, MigrationError> {
        let ledger = Ledger::attach(self.store.clone(), &self.config.ledger_collection)?;
        let scan = self.scan()?;
        planner::status(&scan.files, &ledger)
    }

    /// Apply every pending migration.
    pub fn run(&self) -> Result<RunReport, MigrationError> {
        let mut tracker = StateTracker::new(self.observer.as_ref());
        let outcome = self.run_with(&mut tracker);

        if outcome.is_err() && !tracker.state.is_terminal() {
            tracker.transition(RunState::Failed(FailureKind::Aborted));
        }
        outcome
    }

    fn scan(&self) -> Result<Scan, MigrationError> {
        let scan = MigrationSource::new(&self.config.migration_dir).scan()?;
        for skipped in &scan.skipped {
            self.observer.on_event(&MigrationEvent::FileSkipped {
                file_name: skipped.file_name.clone(),
                reason: skipped.reason.clone(),
            });
        }
        Ok(scan)
    }

    fn run_with(&self, tracker: &mut StateTracker<'_>) -> Result<RunReport, MigrationError> {
        let dry_run = self.config.dry_run;
        let scan = self.scan()?;
        let ledger = if dry_run {
            Ledger::attach(self.store.clone(), &self.config.ledger_collection)?
        } else {
            Ledger::open(self.store.clone(), &self.config.ledger_collection)?
        };

        tracker.transition(RunState::Planning);
        let plan = planner::plan(&scan.files, &ledger, self.config.force, self.observer.as_ref())?;

        let mut report = RunReport {
            applied: Vec::new(),
            skipped: plan.applied.clone(),
            pending: plan.pending.iter().map(|p| p.id.clone()).collect(),
            operations_applied: 0,
            dry_run,
            state: RunState::Planning,
        };

        if !dry_run {
            self.apply_all(tracker, &ledger, &plan.pending, &mut report)?;
            tracker.transition(RunState::Committing);
        }
        tracker.transition(RunState::Done);

        self.observer.on_event(&MigrationEvent::RunFinished {
            applied: report.applied.len(),
            skipped: report.skipped.len(),
            dry_run,
        });
        report.state = RunState::Done;
        Ok(report)
    }

    fn apply_all(
        &self,
        tracker: &mut StateTracker<'_>,
        ledger: &Ledger,
        pending: &[PendingMigration],
        report: &mut RunReport,
    ) -> Result<(), MigrationError> {
        let executor = OperationExecutor::new(self.store.as_ref());
        let scope = self.config.rollback_scope;
        let mut completed: Vec<(&PendingMigration, Vec<OperationResult>)> = Vec::new();

        for migration in pending {
            self.observer.on_event(&MigrationEvent::MigrationStarted {
                migration: migration.id.clone(),
                description: migration.migration.description.clone(),
            });

            let mut results = Vec::with_capacity(migration.migration.up.len());
            for (index, op) in migration.migration.up.iter().enumerate() {
                tracker.transition(RunState::Applying {
                    migration: migration.id.clone(),
                    operation: index,
                });

                match self.cancel.check().and_then(|()| executor.apply(op)) {
                    Ok(result) => {
                        self.observer.on_event(&MigrationEvent::OperationApplied {
                            migration: migration.id.clone(),
                            index,
                            kind: result.kind.clone(),
                            name: result.name.clone(),
                        });
                        results.push(result);
                        report.operations_applied += 1;
                    }
                    Err(e) => {
                        self.observer.on_event(&MigrationEvent::OperationFailed {
                            migration: migration.id.clone(),
                            index,
                            kind: op.type_name().to_string(),
                            name: op.name.clone(),
                            error: e.to_string(),
                        });
                        let failure = MigrationError::OperationFailed {
                            id: migration.id.clone(),
                            index,
                            source: Box::new(e),
                        };

                        let undo: Vec<OperationResult> = match scope {
                            RollbackScope::PerMigration => results,
                            RollbackScope::Batch => completed
                                .into_iter()
                                .flat_map(|(_, done)| done)
                                .chain(results)
                                .collect(),
                        };
                        return Err(self.compensate(tracker, &executor, &undo, failure));
                    }
                }
            }

            self.observer.on_event(&MigrationEvent::MigrationApplied {
                migration: migration.id.clone(),
                operations: results.len(),
            });

            match scope {
                RollbackScope::PerMigration => {
                    tracker.transition(RunState::Committing);
                    self.commit(tracker, ledger, migration, results)?;
                    report.applied.push(migration.id.clone());
                }
                RollbackScope::Batch => completed.push((migration, results)),
            }
        }

        if !completed.is_empty() {
            tracker.transition(RunState::Committing);
            for (migration, results) in completed {
                self.commit(tracker, ledger, migration, results)?;
                report.applied.push(migration.id.clone());
            }
        }
        Ok(())
    }

    fn commit(
        &self,
        tracker: &mut StateTracker<'_>,
        ledger: &Ledger,
        migration: &PendingMigration,
        results: Vec<OperationResult>,
    ) -> Result<(), MigrationError> {
        let record =
            AppliedMigrationRecord::new(&migration.id, &migration.content_hash, results);
        if let Err(source) = ledger.append(&record) {
            tracker.transition(RunState::Failed(FailureKind::Inconsistent));
            return Err(MigrationError::CommitFailed {
                id: migration.id.clone(),
                source,
            });
        }

        self.observer.on_event(&MigrationEvent::LedgerCommitted {
            migration: migration.id.clone(),
        });
        Ok(())
    }

    fn compensate(
        &self,
        tracker: &mut StateTracker<'_>,
        executor: &OperationExecutor<'_>,
        applied: &[OperationResult],
        failure: MigrationError,
    ) -> MigrationError {
        tracker.transition(RunState::Compensating);

        match compensation::compensate(executor, applied, self.observer.as_ref()) {
            Ok(_) => {
                tracker.transition(RunState::Failed(FailureKind::Compensated));
                failure
            }
            Err(e) => {
                tracker.transition(RunState::Failed(FailureKind::Inconsistent));
                MigrationError::CompensationFailed {
                    original: Box::new(failure),
                    compensation: Box::new(e),
                }
            }
        }
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
