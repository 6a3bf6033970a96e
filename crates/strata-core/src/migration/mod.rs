//! Migration engine.
//!
//! Migrations are JSON files in a directory, applied in the order of their
//! numeric id prefix. Each applied migration is recorded in a ledger
//! collection together with the SHA-256 of its file, so later runs skip it and
//! notice when the file was edited afterwards.
//!
//! A run is driven by [`Migrator`]:
//!
//! 1. **Scan** the directory ([`MigrationSource`]) and fingerprint each file.
//! 2. **Plan** the pending set against the [`Ledger`], failing on drift unless
//!    forced.
//! 3. **Apply** each operation through the handler registry, capturing what
//!    is needed to undo it.
//! 4. **Commit** ledger records, or **compensate** applied operations in
//!    reverse when something fails ([`RollbackScope`] picks how far back).

mod compensation;
mod config;
mod error;
mod event;
mod executor;
mod ledger;
mod operation;
mod planner;
mod runner;
mod source;
mod state;
pub mod substitution;

pub use compensation::{compensate, RollbackScope};
pub use config::{MigratorConfig, DEFAULT_LEDGER_COLLECTION, DEFAULT_MIGRATION_DIR};
pub use error::MigrationError;
pub use event::{
    MemoryObserver, MigrationEvent, MigrationObserver, NullObserver, Severity, TracingObserver,
};
pub use executor::{handler, Handler, OperationExecutor};
pub use ledger::{AppliedMigrationRecord, Ledger};
pub use operation::{
    AddDocumentOptions, CreateCollectionOptions, DocumentRefOptions, EdgeRefOptions,
    GeoIndexOptions, GraphOptions, IndexRefOptions, Operation, OperationKind, OperationResult,
    OperationSpec, PersistentIndexOptions, RawOperation, UpdateDocumentOptions,
};
pub use planner::{MigrationStatus, MigrationStatusEntry, PendingMigration, Plan};
pub use runner::{Migrator, RunReport};
pub use source::{
    sequence_number, Migration, MigrationSource, Scan, SkippedEntry, SourceFile,
    MIGRATION_SUFFIX,
};
pub use state::{CancellationToken, FailureKind, RunState};
