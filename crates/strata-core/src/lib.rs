//! Strata Core - migration engine for document-and-graph databases.
//!
//! This crate applies ordered, file-described change sets to a backing store,
//! records what has been applied, detects tampering with applied files, and
//! compensates when an operation fails mid-run.
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_core::{MemoryStore, Migrator, MigratorConfig};
//!
//! let store = Arc::new(MemoryStore::new());
//! let report = Migrator::new(store, MigratorConfig::new("./migrations")).run()?;
//! println!("applied {} migrations", report.applied.len());
//! # Ok::<(), strata_core::MigrationError>(())
//! ```

pub mod hash;
pub mod migration;
pub mod store;

pub use migration::{
    AppliedMigrationRecord, CancellationToken, FailureKind, Ledger, MemoryObserver, Migration,
    MigrationError, MigrationEvent, MigrationObserver, MigrationSource, MigrationStatus,
    MigrationStatusEntry, Migrator, MigratorConfig, NullObserver, Operation, OperationKind,
    OperationResult, PendingMigration, Plan, RollbackScope, RunReport, RunState, Severity,
    TracingObserver,
};
pub use store::{
    BackingStore, CollectionInfo, CollectionKind, CollectionStore, Document, DocumentStore,
    EdgeDefinition, GeoIndexSpec, GraphInfo, GraphStore, IndexStore, MemoryStore,
    PersistentIndexSpec, StoreError,
};
