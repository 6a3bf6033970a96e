//! Backing-store capability interface.
//!
//! The migration engine never talks to a database directly. It drives four
//! narrow capabilities, each implemented by the embedding application:
//!
//! | Capability | Responsibilities |
//! |------------|------------------|
//! | [`CollectionStore`] | create, inspect and remove document/edge collections |
//! | [`IndexStore`] | ensure persistent and geo indexes, delete indexes |
//! | [`GraphStore`] | named graphs and their edge definitions |
//! | [`DocumentStore`] | create, read, merge-update, replace and delete documents by `_key` |
//!
//! [`MemoryStore`] is a complete in-process implementation used by tests and
//! by embedders that want to preview a run.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};

/// A JSON document. Documents are addressed by their `_key` field.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Field holding a document's key.
pub const KEY_FIELD: &str = "_key";

/// Edge document source field.
pub const FROM_FIELD: &str = "_from";

/// Edge document target field.
pub const TO_FIELD: &str = "_to";

/// Kind of collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    /// Plain document collection.
    Document,
    /// Edge collection; documents must carry `_from` and `_to`.
    Edge,
}

impl CollectionKind {
    /// The lowercase name used in migration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Document => "document",
            CollectionKind::Edge => "edge",
        }
    }
}

impl std::fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collection metadata returned by [`CollectionStore::collection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Document or edge.
    pub kind: CollectionKind,
}

/// One edge definition of a named graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDefinition {
    /// Edge collection.
    pub collection: String,
    /// Vertex collections edges may start from.
    pub from: Vec<String>,
    /// Vertex collections edges may point to.
    pub to: Vec<String>,
}

/// Graph metadata returned by [`GraphStore::graph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphInfo {
    /// Graph name.
    pub name: String,
    /// Edge definitions in creation order.
    pub edge_definitions: Vec<EdgeDefinition>,
    /// Vertex collections not referenced by any edge definition.
    pub orphan_collections: Vec<String>,
}

/// Definition of a persistent index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentIndexSpec {
    /// Index name, unique within its collection.
    pub name: String,
    /// Indexed fields.
    pub fields: Vec<String>,
    /// Reject duplicate values.
    pub unique: bool,
    /// Skip documents missing an indexed field.
    pub sparse: bool,
}

/// Definition of a geospatial index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoIndexSpec {
    /// Index name, unique within its collection.
    pub name: String,
    /// Indexed fields (one location field or a latitude/longitude pair).
    pub fields: Vec<String>,
    /// Interpret the field as GeoJSON.
    pub geo_json: bool,
}

/// Collection management.
pub trait CollectionStore {
    /// Create a collection. Fails if it already exists.
    fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), StoreError>;

    /// Look up a collection.
    fn collection(&self, name: &str) -> Result<CollectionInfo, StoreError>;

    /// Check whether a collection exists.
    fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Drop a collection together with its documents and indexes.
    fn remove_collection(&self, name: &str) -> Result<(), StoreError>;
}

/// Index management.
pub trait IndexStore {
    /// Create a persistent index, or succeed if an identical one exists.
    ///
    /// Returns `true` when the index was created by this call.
    fn ensure_persistent_index(
        &self,
        collection: &str,
        spec: &PersistentIndexSpec,
    ) -> Result<bool, StoreError>;

    /// Create a geo index, or succeed if an identical one exists.
    ///
    /// Returns `true` when the index was created by this call.
    fn ensure_geo_index(&self, collection: &str, spec: &GeoIndexSpec)
        -> Result<bool, StoreError>;

    /// Delete a named index.
    fn delete_index(&self, collection: &str, name: &str) -> Result<(), StoreError>;
}

/// Named graph management.
pub trait GraphStore {
    /// Create a graph. Fails if it already exists.
    fn create_graph(
        &self,
        name: &str,
        edge_definitions: &[EdgeDefinition],
        orphan_collections: &[String],
    ) -> Result<(), StoreError>;

    /// Look up a graph.
    fn graph(&self, name: &str) -> Result<GraphInfo, StoreError>;

    /// Remove a graph. Its collections are left in place.
    fn remove_graph(&self, name: &str) -> Result<(), StoreError>;

    /// Add an edge definition to an existing graph.
    fn add_edge_definition(&self, graph: &str, definition: &EdgeDefinition)
        -> Result<(), StoreError>;

    /// Remove the edge definition for `collection` from a graph.
    fn delete_edge_definition(&self, graph: &str, collection: &str) -> Result<(), StoreError>;
}

/// Document access.
pub trait DocumentStore {
    /// Insert a document and return its key.
    ///
    /// A string `_key` in `document` is used as-is; otherwise the store
    /// generates one.
    fn create_document(&self, collection: &str, document: Document) -> Result<String, StoreError>;

    /// Read a document by key.
    fn read_document(&self, collection: &str, key: &str) -> Result<Document, StoreError>;

    /// Merge top-level fields of `patch` into an existing document.
    fn update_document(&self, collection: &str, key: &str, patch: Document)
        -> Result<(), StoreError>;

    /// Write `document` under `key`, replacing any existing document.
    fn replace_document(
        &self,
        collection: &str,
        key: &str,
        document: Document,
    ) -> Result<(), StoreError>;

    /// Delete a document by key.
    fn delete_document(&self, collection: &str, key: &str) -> Result<(), StoreError>;
}

/// Everything the engine needs from a database.
pub trait BackingStore: CollectionStore + IndexStore + GraphStore + DocumentStore + Send + Sync {}

impl<T> BackingStore for T where
    T: CollectionStore + IndexStore + GraphStore + DocumentStore + Send + Sync
{
}

/// Extract the `_key` of a document, if it is a string.
pub fn document_key(document: &Document) -> Option<&str> {
    document.get(KEY_FIELD).and_then(|v| v.as_str())
}

/// Check the `_from`/`_to` fields required on edge documents.
pub fn validate_edge_document(collection: &str, document: &Document) -> Result<(), StoreError> {
    for field in [FROM_FIELD, TO_FIELD] {
        if !document.get(field).is_some_and(|v| v.is_string()) {
            return Err(StoreError::InvalidDocument {
                collection: collection.to_string(),
                reason: format!("edge document requires string field '{}'", field),
            });
        }
    }
    Ok(())
}
