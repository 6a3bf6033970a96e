//! Backing-store error types.

use thiserror::Error;

/// Errors raised by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Collection does not exist.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    /// Collection already exists.
    #[error("duplicate collection: {0}")]
    DuplicateCollection(String),

    /// Index does not exist.
    #[error("index not found: {collection}/{index}")]
    IndexNotFound {
        /// Collection the index was looked up on.
        collection: String,
        /// Index name.
        index: String,
    },

    /// An index with the same name but a different definition exists.
    #[error("conflicting index definition: {collection}/{index}")]
    IndexConflict {
        /// Collection holding the index.
        collection: String,
        /// Index name.
        index: String,
    },

    /// Graph does not exist.
    #[error("graph not found: {0}")]
    GraphNotFound(String),

    /// Graph already exists.
    #[error("duplicate graph: {0}")]
    DuplicateGraph(String),

    /// Edge definition missing from graph.
    #[error("edge definition not found: {graph}/{collection}")]
    EdgeDefinitionNotFound {
        /// Graph name.
        graph: String,
        /// Edge collection.
        collection: String,
    },

    /// Edge definition already present in graph.
    #[error("duplicate edge definition: {graph}/{collection}")]
    DuplicateEdgeDefinition {
        /// Graph name.
        graph: String,
        /// Edge collection.
        collection: String,
    },

    /// Document does not exist.
    #[error("document not found: {collection}/{key}")]
    DocumentNotFound {
        /// Collection name.
        collection: String,
        /// Document key.
        key: String,
    },

    /// A document with this key already exists.
    #[error("unique constraint violated: {collection}/{key}")]
    DuplicateDocument {
        /// Collection name.
        collection: String,
        /// Document key.
        key: String,
    },

    /// Document rejected by the collection.
    #[error("invalid document for {collection}: {reason}")]
    InvalidDocument {
        /// Collection name.
        collection: String,
        /// Why the document was rejected.
        reason: String,
    },

    /// Underlying storage failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether this error reports a missing resource.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::CollectionNotFound(_)
                | StoreError::IndexNotFound { .. }
                | StoreError::GraphNotFound(_)
                | StoreError::EdgeDefinitionNotFound { .. }
                | StoreError::DocumentNotFound { .. }
        )
    }
}
