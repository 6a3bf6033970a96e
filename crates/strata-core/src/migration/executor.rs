//! Operation executor and handler registry.
//!
//! Each [`OperationKind`] is paired with an apply function and, when the
//! operation can be undone, a compensate function. Kinds without a
//! compensate function are irreversible.

use super::error::MigrationError;
use super::operation::{Operation, OperationKind, OperationResult, OperationSpec};
use super::substitution::substitute;
use crate::store::{
    document_key, BackingStore, Document, GeoIndexSpec, PersistentIndexSpec, StoreError,
    KEY_FIELD,
};
use serde_json::Value;

/// What an apply function captured for the ledger and for compensation.
#[derive(Debug, Default)]
struct Captured {
    result: Document,
    rollback_data: Document,
}

impl Captured {
    fn result(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.result.insert(key.to_string(), value.into());
        self
    }

    fn original(mut self, document: Document) -> Self {
        self.rollback_data.insert(
            OperationResult::ORIGINAL_DOCUMENT.to_string(),
            Value::Object(document),
        );
        self
    }
}

type ApplyFn = fn(&dyn BackingStore, &Operation) -> Result<Captured, MigrationError>;
type CompensateFn = fn(&dyn BackingStore, &OperationResult) -> Result<(), MigrationError>;

/// Apply/compensate pair for one operation kind.
#[derive(Clone, Copy)]
pub struct Handler {
    kind: OperationKind,
    apply: ApplyFn,
    compensate: Option<CompensateFn>,
}

impl Handler {
    /// The kind this handler serves.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Whether the operation can be undone.
    pub fn is_reversible(&self) -> bool {
        self.compensate.is_some()
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("kind", &self.kind)
            .field("reversible", &self.is_reversible())
            .finish()
    }
}

/// Look up the handler for a kind.
pub fn handler(kind: OperationKind) -> Handler {
    let (apply, compensate): (ApplyFn, Option<CompensateFn>) = match kind {
        OperationKind::CreateCollection => (create_collection, Some(undo_create_collection)),
        OperationKind::DeleteCollection => (delete_collection, None),
        OperationKind::CreatePersistentIndex => (create_persistent_index, Some(undo_create_index)),
        OperationKind::CreateGeoIndex => (create_geo_index, Some(undo_create_index)),
        OperationKind::DeleteIndex => (delete_index, None),
        OperationKind::CreateGraph => (create_graph, Some(undo_create_graph)),
        OperationKind::DeleteGraph => (delete_graph, None),
        OperationKind::AddEdgeDefinition => (add_edge_definition, Some(undo_add_edge_definition)),
        OperationKind::DeleteEdgeDefinition => (delete_edge_definition, None),
        OperationKind::AddDocument => (add_document, Some(undo_add_document)),
        OperationKind::UpdateDocument => (update_document, Some(undo_update_document)),
        OperationKind::DeleteDocument => (delete_document, Some(undo_delete_document)),
    };

    Handler {
        kind,
        apply,
        compensate,
    }
}

/// Runs operations against a backing store.
pub struct OperationExecutor<'a> {
    store: &'a dyn BackingStore,
}

impl<'a> OperationExecutor<'a> {
    /// Create an executor over a store.
    pub fn new(store: &'a dyn BackingStore) -> Self {
        Self { store }
    }

    /// Apply one operation.
    ///
    /// Unknown operation types fail before any store call.
    pub fn apply(&self, op: &Operation) -> Result<OperationResult, MigrationError> {
        let kind = op.kind().ok_or_else(|| unsupported(op))?;
        let captured = (handler(kind).apply)(self.store, op)?;

        Ok(OperationResult {
            kind: kind.as_str().to_string(),
            name: op.name.clone(),
            options: op.options.clone(),
            result: captured.result,
            rollback_data: captured.rollback_data,
        })
    }

    /// Undo one previously applied operation.
    pub fn compensate(&self, applied: &OperationResult) -> Result<(), MigrationError> {
        let kind = OperationKind::parse(&applied.kind).ok_or_else(|| {
            MigrationError::UnsupportedOperation {
                kind: applied.kind.clone(),
                name: applied.name.clone(),
            }
        })?;

        match handler(kind).compensate {
            Some(compensate) => compensate(self.store, applied),
            None => Err(MigrationError::IrreversibleOperation {
                kind: applied.kind.clone(),
                name: applied.name.clone(),
                reason: format!("{} has no inverse", kind),
            }),
        }
    }
}

fn unsupported(op: &Operation) -> MigrationError {
    MigrationError::UnsupportedOperation {
        kind: op.type_name().to_string(),
        name: op.name.clone(),
    }
}

fn store_err<'a>(kind: &'a str, name: &'a str) -> impl FnOnce(StoreError) -> MigrationError + 'a {
    move |source| MigrationError::OperationExecution {
        kind: kind.to_string(),
        name: name.to_string(),
        source,
    }
}

fn op_err(op: &Operation) -> impl FnOnce(StoreError) -> MigrationError + '_ {
    store_err(op.type_name(), &op.name)
}

fn undo_err(applied: &OperationResult) -> impl FnOnce(StoreError) -> MigrationError + '_ {
    store_err(&applied.kind, &applied.name)
}

// Apply functions

fn create_collection(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    let OperationSpec::CreateCollection(options) = &op.spec else {
        return Err(unsupported(op));
    };
    store
        .create_collection(&op.name, options.kind)
        .map_err(op_err(op))?;

    Ok(Captured::default()
        .result(OperationResult::COLLECTION_NAME, op.name.as_str())
        .result(OperationResult::COLLECTION_TYPE, options.kind.as_str()))
}

fn delete_collection(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    store.remove_collection(&op.name).map_err(op_err(op))?;
    Ok(Captured::default().result(OperationResult::COLLECTION_NAME, op.name.as_str()))
}

fn create_persistent_index(
    store: &dyn BackingStore,
    op: &Operation,
) -> Result<Captured, MigrationError> {
    let OperationSpec::CreatePersistentIndex(options) = &op.spec else {
        return Err(unsupported(op));
    };
    let spec = PersistentIndexSpec {
        name: op.name.clone(),
        fields: options.fields.clone(),
        unique: options.unique,
        sparse: options.sparse,
    };
    let created = store
        .ensure_persistent_index(&options.collection, &spec)
        .map_err(op_err(op))?;

    Ok(index_captured(&op.name, &options.collection)
        .result(OperationResult::INDEX_CREATED, created))
}

fn create_geo_index(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    let OperationSpec::CreateGeoIndex(options) = &op.spec else {
        return Err(unsupported(op));
    };
    let spec = GeoIndexSpec {
        name: op.name.clone(),
        fields: options.fields.clone(),
        geo_json: options.geo_json,
    };
    let created = store
        .ensure_geo_index(&options.collection, &spec)
        .map_err(op_err(op))?;

    Ok(index_captured(&op.name, &options.collection)
        .result(OperationResult::INDEX_CREATED, created))
}

fn delete_index(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    let OperationSpec::DeleteIndex(options) = &op.spec else {
        return Err(unsupported(op));
    };
    store
        .delete_index(&options.collection, &op.name)
        .map_err(op_err(op))?;

    Ok(index_captured(&op.name, &options.collection))
}

fn index_captured(index: &str, collection: &str) -> Captured {
    Captured::default()
        .result(OperationResult::INDEX_NAME, index)
        .result(OperationResult::COLLECTION, collection)
}

fn create_graph(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    let OperationSpec::CreateGraph(options) = &op.spec else {
        return Err(unsupported(op));
    };
    store
        .create_graph(&op.name, &options.edge_definitions, &options.orphan_collections)
        .map_err(op_err(op))?;

    Ok(Captured::default().result(OperationResult::GRAPH_NAME, op.name.as_str()))
}

fn delete_graph(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    store.remove_graph(&op.name).map_err(op_err(op))?;
    Ok(Captured::default().result(OperationResult::GRAPH_NAME, op.name.as_str()))
}

fn add_edge_definition(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    let OperationSpec::AddEdgeDefinition(definition) = &op.spec else {
        return Err(unsupported(op));
    };
    store
        .add_edge_definition(&op.name, definition)
        .map_err(op_err(op))?;

    Ok(Captured::default()
        .result(OperationResult::GRAPH_NAME, op.name.as_str())
        .result(OperationResult::COLLECTION, definition.collection.as_str()))
}

fn delete_edge_definition(
    store: &dyn BackingStore,
    op: &Operation,
) -> Result<Captured, MigrationError> {
    let OperationSpec::DeleteEdgeDefinition(options) = &op.spec else {
        return Err(unsupported(op));
    };
    store
        .delete_edge_definition(&op.name, &options.collection)
        .map_err(op_err(op))?;

    Ok(Captured::default()
        .result(OperationResult::GRAPH_NAME, op.name.as_str())
        .result(OperationResult::COLLECTION, options.collection.as_str()))
}

fn add_document(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    let OperationSpec::AddDocument(options) = &op.spec else {
        return Err(unsupported(op));
    };
    let document = substitute(&options.document)?;
    let key = store
        .create_document(&op.name, document)
        .map_err(op_err(op))?;

    Ok(Captured::default()
        .result(OperationResult::DOCUMENT_ID, format!("{}/{}", op.name, key))
        .result(OperationResult::DOCUMENT_KEY, key))
}

fn update_document(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    let OperationSpec::UpdateDocument(options) = &op.spec else {
        return Err(unsupported(op));
    };
    let patch = substitute(&options.fields)?;
    let original = store
        .read_document(&op.name, &options.key)
        .map_err(op_err(op))?;
    store
        .update_document(&op.name, &options.key, patch)
        .map_err(op_err(op))?;

    Ok(Captured::default()
        .result(OperationResult::DOCUMENT_KEY, options.key.as_str())
        .original(original))
}

fn delete_document(store: &dyn BackingStore, op: &Operation) -> Result<Captured, MigrationError> {
    let OperationSpec::DeleteDocument(options) = &op.spec else {
        return Err(unsupported(op));
    };
    let original = store
        .read_document(&op.name, &options.key)
        .map_err(op_err(op))?;
    store
        .delete_document(&op.name, &options.key)
        .map_err(op_err(op))?;

    Ok(Captured::default()
        .result(OperationResult::DOCUMENT_KEY, options.key.as_str())
        .original(original))
}

// Compensate functions

fn undo_create_collection(
    store: &dyn BackingStore,
    applied: &OperationResult,
) -> Result<(), MigrationError> {
    let name = applied
        .result_str(OperationResult::COLLECTION_NAME)
        .unwrap_or(&applied.name);
    store.remove_collection(name).map_err(undo_err(applied))
}

fn undo_create_index(
    store: &dyn BackingStore,
    applied: &OperationResult,
) -> Result<(), MigrationError> {
    let created = applied
        .result
        .get(OperationResult::INDEX_CREATED)
        .and_then(Value::as_bool);
    // The index already existed before the operation ran.
    if created == Some(false) {
        return Ok(());
    }

    let index = applied
        .result_str(OperationResult::INDEX_NAME)
        .unwrap_or(&applied.name);
    let collection = applied
        .result_str(OperationResult::COLLECTION)
        .or_else(|| applied.option_str(OperationResult::COLLECTION))
        .ok_or_else(|| irreversible(applied, "index collection was not captured"))?;
    store
        .delete_index(collection, index)
        .map_err(undo_err(applied))
}

fn undo_create_graph(
    store: &dyn BackingStore,
    applied: &OperationResult,
) -> Result<(), MigrationError> {
    let name = applied
        .result_str(OperationResult::GRAPH_NAME)
        .unwrap_or(&applied.name);
    store.remove_graph(name).map_err(undo_err(applied))
}

fn undo_add_edge_definition(
    store: &dyn BackingStore,
    applied: &OperationResult,
) -> Result<(), MigrationError> {
    let graph = applied
        .result_str(OperationResult::GRAPH_NAME)
        .unwrap_or(&applied.name);
    let collection = applied
        .result_str(OperationResult::COLLECTION)
        .or_else(|| applied.option_str(OperationResult::COLLECTION))
        .ok_or_else(|| irreversible(applied, "edge collection was not captured"))?;
    store
        .delete_edge_definition(graph, collection)
        .map_err(undo_err(applied))
}

fn undo_add_document(
    store: &dyn BackingStore,
    applied: &OperationResult,
) -> Result<(), MigrationError> {
    let key = applied
        .result_str(OperationResult::DOCUMENT_KEY)
        .or_else(|| {
            applied
                .result_str(OperationResult::DOCUMENT_ID)
                .and_then(|id| id.rsplit_once('/').map(|(_, key)| key))
        })
        .or_else(|| {
            applied
                .options
                .get("document")
                .and_then(|doc| doc.get(KEY_FIELD))
                .and_then(|key| key.as_str())
        })
        .ok_or_else(|| irreversible(applied, "created document key was not captured"))?;

    store
        .delete_document(&applied.name, key)
        .map_err(undo_err(applied))
}

fn undo_update_document(
    store: &dyn BackingStore,
    applied: &OperationResult,
) -> Result<(), MigrationError> {
    let (key, original) = captured_original(applied)?;
    store
        .replace_document(&applied.name, &key, original)
        .map_err(undo_err(applied))
}

fn undo_delete_document(
    store: &dyn BackingStore,
    applied: &OperationResult,
) -> Result<(), MigrationError> {
    let (_, original) = captured_original(applied)?;
    store
        .create_document(&applied.name, original)
        .map_err(undo_err(applied))?;
    Ok(())
}

/// The captured prior document, with its `_key` guaranteed present.
fn captured_original(applied: &OperationResult) -> Result<(String, Document), MigrationError> {
    let mut original = applied
        .original_document()
        .cloned()
        .ok_or_else(|| irreversible(applied, "original document was not captured"))?;

    let key = applied
        .result_str(OperationResult::DOCUMENT_KEY)
        .or_else(|| applied.option_str(KEY_FIELD))
        .or_else(|| document_key(&original))
        .map(str::to_string)
        .ok_or_else(|| irreversible(applied, "document key was not captured"))?;

    original.insert(KEY_FIELD.to_string(), Value::String(key.clone()));
    Ok((key, original))
}

fn irreversible(applied: &OperationResult, reason: &str) -> MigrationError {
    MigrationError::IrreversibleOperation {
        kind: applied.kind.clone(),
        name: applied.name.clone(),
        reason: reason.to_string(),
    }
}
