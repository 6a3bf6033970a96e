//! Ledger of applied migrations.
//!
//! Records live in a collection of the backing store, one document per
//! migration keyed by the migration id. Records are created once and never
//! updated.

use super::error::MigrationError;
use super::operation::OperationResult;
use crate::store::{BackingStore, CollectionKind, Document, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Persisted record of one applied migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedMigrationRecord {
    /// Migration id; doubles as the document key.
    #[serde(rename = "_key")]
    pub id: String,
    /// When the migration was committed.
    #[serde(rename = "appliedAt")]
    pub applied_at: DateTime<Utc>,
    /// Hex SHA-256 of the migration file at apply time.
    pub sha256: String,
    /// Results of each operation, in apply order. Absent on old records.
    #[serde(default, rename = "operationResults")]
    pub operation_results: Vec<OperationResult>,
}

impl AppliedMigrationRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        sha256: impl Into<String>,
        operation_results: Vec<OperationResult>,
    ) -> Self {
        Self {
            id: id.into(),
            applied_at: Utc::now(),
            sha256: sha256.into(),
            operation_results,
        }
    }

    fn to_document(&self) -> Result<Document, StoreError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(document)) => Ok(document),
            Ok(_) => Err(StoreError::Backend(
                "ledger record did not serialize to an object".to_string(),
            )),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }
}

/// Access to the ledger collection.
pub struct Ledger {
    store: Arc<dyn BackingStore>,
    collection: String,
    present: bool,
}

impl Ledger {
    /// Open the ledger, creating its collection if it does not exist.
    pub fn open(
        store: Arc<dyn BackingStore>,
        collection: impl Into<String>,
    ) -> Result<Self, MigrationError> {
        let collection = collection.into();
        if !store
            .collection_exists(&collection)
            .map_err(MigrationError::Ledger)?
        {
            store
                .create_collection(&collection, CollectionKind::Document)
                .map_err(MigrationError::Ledger)?;
            tracing::debug!(collection = %collection, "created ledger collection");
        }

        Ok(Self {
            store,
            collection,
            present: true,
        })
    }

    /// Attach to the ledger without creating it. A missing collection reads
    /// as an empty ledger and rejects appends.
    pub fn attach(
        store: Arc<dyn BackingStore>,
        collection: impl Into<String>,
    ) -> Result<Self, MigrationError> {
        let collection = collection.into();
        let present = store
            .collection_exists(&collection)
            .map_err(MigrationError::Ledger)?;

        Ok(Self {
            store,
            collection,
            present,
        })
    }

    /// Name of the ledger collection.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether the ledger collection exists.
    pub fn is_present(&self) -> bool {
        self.present
    }

    /// Read the record for a migration.
    pub fn lookup(&self, id: &str) -> Result<Option<AppliedMigrationRecord>, MigrationError> {
        if !self.present {
            return Ok(None);
        }

        let document = match self.store.read_document(&self.collection, id) {
            Ok(document) => document,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(MigrationError::Ledger(e)),
        };

        serde_json::from_value(Value::Object(document))
            .map(Some)
            .map_err(|e| MigrationError::LedgerDecode {
                id: id.to_string(),
                message: e.to_string(),
            })
    }

    /// Check whether a migration has been recorded.
    pub fn exists(&self, id: &str) -> Result<bool, MigrationError> {
        Ok(self.lookup(id)?.is_some())
    }

    /// Write a new record. Fails if one already exists for the id.
    pub fn append(&self, record: &AppliedMigrationRecord) -> Result<(), StoreError> {
        if !self.present {
            return Err(StoreError::CollectionNotFound(self.collection.clone()));
        }
        self.store
            .create_document(&self.collection, record.to_document()?)?;
        Ok(())
    }
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("collection", &self.collection)
            .field("present", &self.present)
            .finish()
    }
}
