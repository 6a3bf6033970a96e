//! Operation model.
//!
//! Migration files carry operations as `{ "type", "name", "options" }`
//! objects. Each known `type` maps to an [`OperationKind`] and a strongly
//! typed options struct, decoded when the file is parsed. Unknown types are
//! kept as [`OperationSpec::Unknown`] so that they fail at dispatch time,
//! before any store call is made.

use crate::store::{CollectionKind, Document, EdgeDefinition};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of supported operation types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Create a document or edge collection.
    CreateCollection,
    /// Drop a collection.
    DeleteCollection,
    /// Create a persistent index.
    CreatePersistentIndex,
    /// Create a geo index.
    CreateGeoIndex,
    /// Drop an index.
    DeleteIndex,
    /// Create a named graph.
    CreateGraph,
    /// Drop a named graph.
    DeleteGraph,
    /// Add an edge definition to a graph.
    AddEdgeDefinition,
    /// Remove an edge definition from a graph.
    DeleteEdgeDefinition,
    /// Insert a document.
    AddDocument,
    /// Merge-update a document.
    UpdateDocument,
    /// Delete a document.
    DeleteDocument,
}

impl OperationKind {
    /// Every supported kind.
    pub const ALL: [OperationKind; 12] = [
        OperationKind::CreateCollection,
        OperationKind::DeleteCollection,
        OperationKind::CreatePersistentIndex,
        OperationKind::CreateGeoIndex,
        OperationKind::DeleteIndex,
        OperationKind::CreateGraph,
        OperationKind::DeleteGraph,
        OperationKind::AddEdgeDefinition,
        OperationKind::DeleteEdgeDefinition,
        OperationKind::AddDocument,
        OperationKind::UpdateDocument,
        OperationKind::DeleteDocument,
    ];

    /// The `type` tag used in migration files and ledger records.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::CreateCollection => "createCollection",
            OperationKind::DeleteCollection => "deleteCollection",
            OperationKind::CreatePersistentIndex => "createPersistentIndex",
            OperationKind::CreateGeoIndex => "createGeoIndex",
            OperationKind::DeleteIndex => "deleteIndex",
            OperationKind::CreateGraph => "createGraph",
            OperationKind::DeleteGraph => "deleteGraph",
            OperationKind::AddEdgeDefinition => "addEdgeDefinition",
            OperationKind::DeleteEdgeDefinition => "deleteEdgeDefinition",
            OperationKind::AddDocument => "addDocument",
            OperationKind::UpdateDocument => "updateDocument",
            OperationKind::DeleteDocument => "deleteDocument",
        }
    }

    /// Resolve a `type` tag.
    pub fn parse(tag: &str) -> Option<OperationKind> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options of `createCollection`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCollectionOptions {
    /// Document or edge.
    #[serde(rename = "type")]
    pub kind: CollectionKind,
}

/// Options of `createPersistentIndex`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentIndexOptions {
    /// Collection to index.
    pub collection: String,
    /// Indexed fields.
    pub fields: Vec<String>,
    /// Reject duplicates.
    #[serde(default)]
    pub unique: bool,
    /// Skip documents missing the fields.
    #[serde(default)]
    pub sparse: bool,
}

/// Options of `createGeoIndex`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoIndexOptions {
    /// Collection to index.
    pub collection: String,
    /// Location field(s).
    pub fields: Vec<String>,
    /// Interpret values as GeoJSON.
    #[serde(default, rename = "geoJson")]
    pub geo_json: bool,
}

/// Options naming the collection an index lives on (`deleteIndex`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRefOptions {
    /// Collection holding the index.
    pub collection: String,
}

/// Options of `createGraph`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOptions {
    /// Edge definitions.
    #[serde(rename = "edgeDefinitions")]
    pub edge_definitions: Vec<EdgeDefinition>,
    /// Orphan vertex collections.
    #[serde(
        default,
        rename = "orphanCollections",
        alias = "orphanedCollections"
    )]
    pub orphan_collections: Vec<String>,
}

/// Options naming an edge collection of a graph (`deleteEdgeDefinition`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRefOptions {
    /// Edge collection.
    pub collection: String,
}

/// Options of `addDocument`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDocumentOptions {
    /// The document to insert. Top-level values may hold placeholders.
    pub document: Document,
}

/// Options of `updateDocument`: the key plus the fields to merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateDocumentOptions {
    /// Key of the document to update.
    #[serde(rename = "_key")]
    pub key: String,
    /// Fields to merge. Top-level values may hold placeholders.
    #[serde(flatten)]
    pub fields: Document,
}

/// Options of `deleteDocument`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRefOptions {
    /// Key of the document.
    #[serde(rename = "_key")]
    pub key: String,
}

/// Typed payload of an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationSpec {
    /// `createCollection`
    CreateCollection(CreateCollectionOptions),
    /// `deleteCollection`
    DeleteCollection,
    /// `createPersistentIndex`
    CreatePersistentIndex(PersistentIndexOptions),
    /// `createGeoIndex`
    CreateGeoIndex(GeoIndexOptions),
    /// `deleteIndex`
    DeleteIndex(IndexRefOptions),
    /// `createGraph`
    CreateGraph(GraphOptions),
    /// `deleteGraph`
    DeleteGraph,
    /// `addEdgeDefinition`
    AddEdgeDefinition(EdgeDefinition),
    /// `deleteEdgeDefinition`
    DeleteEdgeDefinition(EdgeRefOptions),
    /// `addDocument`
    AddDocument(AddDocumentOptions),
    /// `updateDocument`
    UpdateDocument(UpdateDocumentOptions),
    /// `deleteDocument`
    DeleteDocument(DocumentRefOptions),
    /// A `type` tag with no handler.
    Unknown {
        /// The tag as written.
        kind: String,
    },
}

impl OperationSpec {
    /// The kind of this payload, or `None` for unknown tags.
    pub fn kind(&self) -> Option<OperationKind> {
        let kind = match self {
            OperationSpec::CreateCollection(_) => OperationKind::CreateCollection,
            OperationSpec::DeleteCollection => OperationKind::DeleteCollection,
            OperationSpec::CreatePersistentIndex(_) => OperationKind::CreatePersistentIndex,
            OperationSpec::CreateGeoIndex(_) => OperationKind::CreateGeoIndex,
            OperationSpec::DeleteIndex(_) => OperationKind::DeleteIndex,
            OperationSpec::CreateGraph(_) => OperationKind::CreateGraph,
            OperationSpec::DeleteGraph => OperationKind::DeleteGraph,
            OperationSpec::AddEdgeDefinition(_) => OperationKind::AddEdgeDefinition,
            OperationSpec::DeleteEdgeDefinition(_) => OperationKind::DeleteEdgeDefinition,
            OperationSpec::AddDocument(_) => OperationKind::AddDocument,
            OperationSpec::UpdateDocument(_) => OperationKind::UpdateDocument,
            OperationSpec::DeleteDocument(_) => OperationKind::DeleteDocument,
            OperationSpec::Unknown { .. } => return None,
        };
        Some(kind)
    }
}

/// An operation exactly as written in a migration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOperation {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Resource name.
    #[serde(default)]
    pub name: String,
    /// Type-specific options.
    #[serde(default)]
    pub options: Value,
}

/// One parsed operation of a migration.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// Resource the operation acts on (collection, index, graph...).
    pub name: String,
    /// Options as written, kept for the ledger.
    pub options: Value,
    /// Typed payload.
    pub spec: OperationSpec,
}

impl Operation {
    /// Decode a raw operation.
    ///
    /// Known types must carry well-formed options; the error string says what
    /// is wrong. Unknown types always decode.
    pub fn from_raw(raw: RawOperation) -> Result<Operation, String> {
        let options = match raw.options {
            Value::Null => Value::Object(Document::new()),
            other => other,
        };

        let Some(kind) = OperationKind::parse(&raw.kind) else {
            return Ok(Operation {
                name: raw.name,
                options,
                spec: OperationSpec::Unknown { kind: raw.kind },
            });
        };

        if raw.name.trim().is_empty() {
            return Err(format!("{} operation requires a name", kind));
        }

        let spec = match kind {
            OperationKind::CreateCollection => OperationSpec::CreateCollection(decode(&options)?),
            OperationKind::DeleteCollection => OperationSpec::DeleteCollection,
            OperationKind::CreatePersistentIndex => {
                let options: PersistentIndexOptions = decode(&options)?;
                require_fields(&options.fields)?;
                OperationSpec::CreatePersistentIndex(options)
            }
            OperationKind::CreateGeoIndex => {
                let options: GeoIndexOptions = decode(&options)?;
                require_fields(&options.fields)?;
                OperationSpec::CreateGeoIndex(options)
            }
            OperationKind::DeleteIndex => OperationSpec::DeleteIndex(decode(&options)?),
            OperationKind::CreateGraph => OperationSpec::CreateGraph(decode(&options)?),
            OperationKind::DeleteGraph => OperationSpec::DeleteGraph,
            OperationKind::AddEdgeDefinition => OperationSpec::AddEdgeDefinition(decode(&options)?),
            OperationKind::DeleteEdgeDefinition => {
                OperationSpec::DeleteEdgeDefinition(decode(&options)?)
            }
            OperationKind::AddDocument => OperationSpec::AddDocument(decode(&options)?),
            OperationKind::UpdateDocument => OperationSpec::UpdateDocument(decode(&options)?),
            OperationKind::DeleteDocument => OperationSpec::DeleteDocument(decode(&options)?),
        };

        Ok(Operation {
            name: raw.name,
            options,
            spec,
        })
    }

    /// Operation kind, or `None` for unknown tags.
    pub fn kind(&self) -> Option<OperationKind> {
        self.spec.kind()
    }

    /// The type tag as written.
    pub fn type_name(&self) -> &str {
        match &self.spec {
            OperationSpec::Unknown { kind } => kind.as_str(),
            spec => spec.kind().map(|k| k.as_str()).unwrap_or_default(),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(options: &Value) -> Result<T, String> {
    T::deserialize(options).map_err(|e| format!("invalid options: {}", e))
}

fn require_fields(fields: &[String]) -> Result<(), String> {
    if fields.is_empty() {
        return Err("index requires at least one field".to_string());
    }
    Ok(())
}

/// Outcome of one applied operation.
///
/// `result` holds identifiers produced by execution (a generated document key,
/// the created index and collection). `rollback_data` holds pre-operation
/// state needed to undo it (a document's prior content). Both are persisted in
/// the ledger alongside the original options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Resource name.
    pub name: String,
    /// Options as written in the migration file.
    #[serde(default)]
    pub options: Value,
    /// Identifiers produced by execution.
    #[serde(default, skip_serializing_if = "Document::is_empty")]
    pub result: Document,
    /// State captured before the operation ran.
    #[serde(
        default,
        rename = "rollbackData",
        skip_serializing_if = "Document::is_empty"
    )]
    pub rollback_data: Document,
}

impl OperationResult {
    pub(crate) const COLLECTION_NAME: &'static str = "collectionName";
    pub(crate) const COLLECTION_TYPE: &'static str = "collectionType";
    pub(crate) const INDEX_NAME: &'static str = "indexName";
    pub(crate) const INDEX_CREATED: &'static str = "indexCreated";
    pub(crate) const COLLECTION: &'static str = "collection";
    pub(crate) const GRAPH_NAME: &'static str = "graphName";
    pub(crate) const DOCUMENT_ID: &'static str = "documentID";
    pub(crate) const DOCUMENT_KEY: &'static str = "documentKey";
    pub(crate) const ORIGINAL_DOCUMENT: &'static str = "originalDocument";

    /// A string value from `result`.
    pub fn result_str(&self, key: &str) -> Option<&str> {
        self.result.get(key).and_then(|v| v.as_str())
    }

    /// A string value from the original options.
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// The document captured before an update or delete.
    pub fn original_document(&self) -> Option<&Document> {
        self.rollback_data
            .get(Self::ORIGINAL_DOCUMENT)
            .and_then(|v| v.as_object())
    }
}
