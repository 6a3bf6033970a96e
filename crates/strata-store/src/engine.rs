//! Sled-backed implementation of the backing-store capabilities.

use crate::catalog::{CollectionEntry, EdgeEntry, GraphEntry, IndexEntry};
use crate::config::StoreConfig;
use crate::error::Error;
use parking_lot::Mutex;
use serde_json::Value;
use sled::{Db, Tree};
use strata_core::store::{
    document_key, validate_edge_document, CollectionInfo, GeoIndexSpec, GraphInfo,
    PersistentIndexSpec, KEY_FIELD,
};
use strata_core::{
    CollectionKind, CollectionStore, Document, DocumentStore, EdgeDefinition, GraphStore,
    IndexStore, StoreError,
};

/// Tree name for collection metadata.
const COLLECTIONS_TREE: &str = "catalog:collections";

/// Tree name for graph metadata.
const GRAPHS_TREE: &str = "catalog:graphs";

/// Prefix of per-collection document trees.
const DOCUMENTS_PREFIX: &str = "docs:";

/// An embedded document and graph store.
///
/// Collection and graph metadata are rkyv-encoded in catalog trees. Each
/// collection keeps its documents as JSON in a tree of its own, keyed by
/// `_key`.
pub struct SledStore {
    /// The underlying sled database.
    db: Db,

    /// Collection name -> [`CollectionEntry`].
    collections: Tree,

    /// Graph name -> [`GraphEntry`].
    graphs: Tree,

    /// Serializes read-modify-write sequences.
    write_lock: Mutex<()>,
}

impl SledStore {
    /// Open or create a store with the given configuration.
    pub fn open(config: StoreConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let collections = db.open_tree(COLLECTIONS_TREE)?;
        let graphs = db.open_tree(GRAPHS_TREE)?;

        if db.was_recovered() {
            tracing::debug!(
                path = %config.path.display(),
                collections = collections.len(),
                graphs = graphs.len(),
                "opened existing store"
            );
        }

        Ok(Self {
            db,
            collections,
            graphs,
            write_lock: Mutex::new(()),
        })
    }

    /// Open a throwaway store for testing.
    pub fn temporary() -> Result<Self, Error> {
        Self::open(StoreConfig::temporary())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Result<Vec<String>, Error> {
        self.names(&self.collections)
    }

    /// Names of all graphs, sorted.
    pub fn graph_names(&self) -> Result<Vec<String>, Error> {
        self.names(&self.graphs)
    }

    /// Index names defined on a collection, in creation order.
    pub fn index_names(&self, collection: &str) -> Result<Vec<String>, Error> {
        let entry = self.collection_entry(collection)?;
        Ok(entry
            .indexes
            .iter()
            .map(|index| index.name().to_string())
            .collect())
    }

    /// Number of documents in a collection.
    pub fn document_count(&self, collection: &str) -> Result<usize, Error> {
        self.collection_entry(collection)?;
        Ok(self.documents(collection)?.len())
    }

    fn names(&self, tree: &Tree) -> Result<Vec<String>, Error> {
        tree.iter()
            .keys()
            .map(|key| {
                let key = key?;
                String::from_utf8(key.to_vec())
                    .map_err(|e| Error::Deserialization(e.to_string()))
            })
            .collect()
    }

    fn documents(&self, collection: &str) -> Result<Tree, Error> {
        Ok(self
            .db
            .open_tree(format!("{}{}", DOCUMENTS_PREFIX, collection))?)
    }

    fn collection_entry(&self, name: &str) -> Result<CollectionEntry, Error> {
        match self.collections.get(name)? {
            Some(bytes) => CollectionEntry::from_bytes(&bytes),
            None => Err(StoreError::CollectionNotFound(name.to_string()).into()),
        }
    }

    fn graph_entry(&self, name: &str) -> Result<GraphEntry, Error> {
        match self.graphs.get(name)? {
            Some(bytes) => GraphEntry::from_bytes(&bytes),
            None => Err(StoreError::GraphNotFound(name.to_string()).into()),
        }
    }

    fn put_collection(&self, name: &str, entry: &CollectionEntry) -> Result<(), Error> {
        self.collections.insert(name, entry.to_bytes()?)?;
        Ok(())
    }

    fn put_graph(&self, name: &str, entry: &GraphEntry) -> Result<(), Error> {
        self.graphs.insert(name, entry.to_bytes()?)?;
        Ok(())
    }

    fn decode_document(bytes: &[u8]) -> Result<Document, Error> {
        serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    fn encode_document(document: &Document) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(document).map_err(|e| Error::Serialization(e.to_string()))
    }

    // Collections

    fn do_create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), Error> {
        let bytes = CollectionEntry::new(kind).to_bytes()?;
        if self
            .collections
            .compare_and_swap(name, None as Option<&[u8]>, Some(bytes))?
            .is_err()
        {
            return Err(StoreError::DuplicateCollection(name.to_string()).into());
        }

        // Drop leftovers from an earlier collection of the same name.
        self.documents(name)?.clear()?;
        tracing::debug!(collection = %name, kind = %kind, "created collection");
        Ok(())
    }

    fn do_remove_collection(&self, name: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        if self.collections.remove(name)?.is_none() {
            return Err(StoreError::CollectionNotFound(name.to_string()).into());
        }
        self.db
            .drop_tree(format!("{}{}", DOCUMENTS_PREFIX, name))?;
        tracing::debug!(collection = %name, "removed collection");
        Ok(())
    }

    // Indexes

    fn ensure_index(&self, collection: &str, index: IndexEntry) -> Result<bool, Error> {
        let _guard = self.write_lock.lock();
        let mut entry = self.collection_entry(collection)?;

        match entry.index(index.name()) {
            Some(existing) if *existing == index => return Ok(false),
            Some(_) => {
                return Err(StoreError::IndexConflict {
                    collection: collection.to_string(),
                    index: index.name().to_string(),
                }
                .into())
            }
            None => {}
        }

        tracing::debug!(collection = %collection, index = %index.name(), "created index");
        entry.indexes.push(index);
        self.put_collection(collection, &entry)?;
        Ok(true)
    }

    fn do_delete_index(&self, collection: &str, name: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let mut entry = self.collection_entry(collection)?;

        let before = entry.indexes.len();
        entry.indexes.retain(|index| index.name() != name);
        if entry.indexes.len() == before {
            return Err(StoreError::IndexNotFound {
                collection: collection.to_string(),
                index: name.to_string(),
            }
            .into());
        }
        self.put_collection(collection, &entry)
    }

    // Graphs

    fn do_create_graph(
        &self,
        name: &str,
        edge_definitions: &[EdgeDefinition],
        orphan_collections: &[String],
    ) -> Result<(), Error> {
        let entry = GraphEntry {
            edge_definitions: edge_definitions.iter().map(EdgeEntry::from).collect(),
            orphan_collections: orphan_collections.to_vec(),
        };
        if self
            .graphs
            .compare_and_swap(name, None as Option<&[u8]>, Some(entry.to_bytes()?))?
            .is_err()
        {
            return Err(StoreError::DuplicateGraph(name.to_string()).into());
        }
        tracing::debug!(graph = %name, "created graph");
        Ok(())
    }

    fn do_remove_graph(&self, name: &str) -> Result<(), Error> {
        if self.graphs.remove(name)?.is_none() {
            return Err(StoreError::GraphNotFound(name.to_string()).into());
        }
        Ok(())
    }

    fn do_add_edge_definition(&self, graph: &str, definition: &EdgeDefinition) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let mut entry = self.graph_entry(graph)?;

        if entry
            .edge_definitions
            .iter()
            .any(|def| def.collection == definition.collection)
        {
            return Err(StoreError::DuplicateEdgeDefinition {
                graph: graph.to_string(),
                collection: definition.collection.clone(),
            }
            .into());
        }
        entry.edge_definitions.push(definition.into());
        self.put_graph(graph, &entry)
    }

    fn do_delete_edge_definition(&self, graph: &str, collection: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let mut entry = self.graph_entry(graph)?;

        let before = entry.edge_definitions.len();
        entry
            .edge_definitions
            .retain(|def| def.collection != collection);
        if entry.edge_definitions.len() == before {
            return Err(StoreError::EdgeDefinitionNotFound {
                graph: graph.to_string(),
                collection: collection.to_string(),
            }
            .into());
        }
        self.put_graph(graph, &entry)
    }

    // Documents

    fn do_create_document(&self, collection: &str, mut document: Document) -> Result<String, Error> {
        let entry = self.collection_entry(collection)?;
        if CollectionKind::from(entry.kind) == CollectionKind::Edge {
            validate_edge_document(collection, &document)?;
        }

        let key = match document_key(&document) {
            Some(key) => key.to_string(),
            None => self.db.generate_id()?.to_string(),
        };
        document.insert(KEY_FIELD.to_string(), Value::String(key.clone()));

        let tree = self.documents(collection)?;
        if tree
            .compare_and_swap(
                key.as_bytes(),
                None as Option<&[u8]>,
                Some(Self::encode_document(&document)?),
            )?
            .is_err()
        {
            return Err(StoreError::DuplicateDocument {
                collection: collection.to_string(),
                key,
            }
            .into());
        }
        Ok(key)
    }

    fn do_read_document(&self, collection: &str, key: &str) -> Result<Document, Error> {
        self.collection_entry(collection)?;
        match self.documents(collection)?.get(key)? {
            Some(bytes) => Self::decode_document(&bytes),
            None => Err(StoreError::DocumentNotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            }
            .into()),
        }
    }

    fn do_update_document(&self, collection: &str, key: &str, patch: Document) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let mut document = self.do_read_document(collection, key)?;

        for (field, value) in patch {
            if field != KEY_FIELD {
                document.insert(field, value);
            }
        }
        self.documents(collection)?
            .insert(key, Self::encode_document(&document)?)?;
        Ok(())
    }

    fn do_replace_document(
        &self,
        collection: &str,
        key: &str,
        mut document: Document,
    ) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        let entry = self.collection_entry(collection)?;
        if CollectionKind::from(entry.kind) == CollectionKind::Edge {
            validate_edge_document(collection, &document)?;
        }

        document.insert(KEY_FIELD.to_string(), Value::String(key.to_string()));
        self.documents(collection)?
            .insert(key, Self::encode_document(&document)?)?;
        Ok(())
    }

    fn do_delete_document(&self, collection: &str, key: &str) -> Result<(), Error> {
        self.collection_entry(collection)?;
        if self.documents(collection)?.remove(key)?.is_none() {
            return Err(StoreError::DocumentNotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("collections", &self.collections.len())
            .field("graphs", &self.graphs.len())
            .finish()
    }
}

impl CollectionStore for SledStore {
    fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), StoreError> {
        Ok(self.do_create_collection(name, kind)?)
    }

    fn collection(&self, name: &str) -> Result<CollectionInfo, StoreError> {
        let entry = self.collection_entry(name)?;
        Ok(CollectionInfo {
            name: name.to_string(),
            kind: entry.kind.into(),
        })
    }

    fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.collections.contains_key(name).map_err(Error::from)?)
    }

    fn remove_collection(&self, name: &str) -> Result<(), StoreError> {
        Ok(self.do_remove_collection(name)?)
    }
}

impl IndexStore for SledStore {
    fn ensure_persistent_index(
        &self,
        collection: &str,
        spec: &PersistentIndexSpec,
    ) -> Result<bool, StoreError> {
        Ok(self.ensure_index(collection, spec.into())?)
    }

    fn ensure_geo_index(&self, collection: &str, spec: &GeoIndexSpec) -> Result<bool, StoreError> {
        Ok(self.ensure_index(collection, spec.into())?)
    }

    fn delete_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        Ok(self.do_delete_index(collection, name)?)
    }
}

impl GraphStore for SledStore {
    fn create_graph(
        &self,
        name: &str,
        edge_definitions: &[EdgeDefinition],
        orphan_collections: &[String],
    ) -> Result<(), StoreError> {
        Ok(self.do_create_graph(name, edge_definitions, orphan_collections)?)
    }

    fn graph(&self, name: &str) -> Result<GraphInfo, StoreError> {
        Ok(self.graph_entry(name)?.into_info(name))
    }

    fn remove_graph(&self, name: &str) -> Result<(), StoreError> {
        Ok(self.do_remove_graph(name)?)
    }

    fn add_edge_definition(
        &self,
        graph: &str,
        definition: &EdgeDefinition,
    ) -> Result<(), StoreError> {
        Ok(self.do_add_edge_definition(graph, definition)?)
    }

    fn delete_edge_definition(&self, graph: &str, collection: &str) -> Result<(), StoreError> {
        Ok(self.do_delete_edge_definition(graph, collection)?)
    }
}

impl DocumentStore for SledStore {
    fn create_document(&self, collection: &str, document: Document) -> Result<String, StoreError> {
        Ok(self.do_create_document(collection, document)?)
    }

    fn read_document(&self, collection: &str, key: &str) -> Result<Document, StoreError> {
        Ok(self.do_read_document(collection, key)?)
    }

    fn update_document(
        &self,
        collection: &str,
        key: &str,
        patch: Document,
    ) -> Result<(), StoreError> {
        Ok(self.do_update_document(collection, key, patch)?)
    }

    fn replace_document(
        &self,
        collection: &str,
        key: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        Ok(self.do_replace_document(collection, key, document)?)
    }

    fn delete_document(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        Ok(self.do_delete_document(collection, key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_collection_lifecycle() {
        let store = SledStore::temporary().unwrap();

        store
            .create_collection("users", CollectionKind::Document)
            .unwrap();
        assert!(store.collection_exists("users").unwrap());
        assert_eq!(
            store.collection("users").unwrap().kind,
            CollectionKind::Document
        );
        assert!(matches!(
            store.create_collection("users", CollectionKind::Edge),
            Err(StoreError::DuplicateCollection(_))
        ));

        store.remove_collection("users").unwrap();
        assert!(!store.collection_exists("users").unwrap());
        assert!(store.remove_collection("users").unwrap_err().is_not_found());
    }

    #[test]
    fn test_recreated_collection_is_empty() {
        let store = SledStore::temporary().unwrap();
        store
            .create_collection("users", CollectionKind::Document)
            .unwrap();
        store
            .create_document("users", doc(json!({"_key": "a"})))
            .unwrap();
        store.remove_collection("users").unwrap();

        store
            .create_collection("users", CollectionKind::Document)
            .unwrap();
        assert_eq!(store.document_count("users").unwrap(), 0);
    }

    #[test]
    fn test_index_idempotent_and_conflicting() {
        let store = SledStore::temporary().unwrap();
        store
            .create_collection("users", CollectionKind::Document)
            .unwrap();
        let spec = PersistentIndexSpec {
            name: "idx_email".into(),
            fields: vec!["email".into()],
            unique: true,
            sparse: false,
        };

        assert!(store.ensure_persistent_index("users", &spec).unwrap());
        assert!(!store.ensure_persistent_index("users", &spec).unwrap());
        assert_eq!(store.index_names("users").unwrap(), vec!["idx_email".to_string()]);

        let conflicting = PersistentIndexSpec {
            unique: false,
            ..spec
        };
        assert!(matches!(
            store.ensure_persistent_index("users", &conflicting),
            Err(StoreError::IndexConflict { .. })
        ));

        store.delete_index("users", "idx_email").unwrap();
        assert!(store.delete_index("users", "idx_email").unwrap_err().is_not_found());
    }

    #[test]
    fn test_geo_index() {
        let store = SledStore::temporary().unwrap();
        store
            .create_collection("places", CollectionKind::Document)
            .unwrap();
        store
            .ensure_geo_index(
                "places",
                &GeoIndexSpec {
                    name: "idx_loc".into(),
                    fields: vec!["location".into()],
                    geo_json: true,
                },
            )
            .unwrap();
        assert_eq!(store.index_names("places").unwrap(), vec!["idx_loc".to_string()]);
    }

    #[test]
    fn test_graph_edge_definitions() {
        let store = SledStore::temporary().unwrap();
        let follows = EdgeDefinition {
            collection: "follows".into(),
            from: vec!["users".into()],
            to: vec!["users".into()],
        };

        store
            .create_graph("social", &[follows.clone()], &["tags".to_string()])
            .unwrap();
        assert!(matches!(
            store.create_graph("social", &[], &[]),
            Err(StoreError::DuplicateGraph(_))
        ));

        let likes = EdgeDefinition {
            collection: "likes".into(),
            ..follows.clone()
        };
        store.add_edge_definition("social", &likes).unwrap();
        assert!(store.add_edge_definition("social", &likes).is_err());

        let graph = store.graph("social").unwrap();
        assert_eq!(graph.edge_definitions, vec![follows.clone(), likes]);
        assert_eq!(graph.orphan_collections, vec!["tags".to_string()]);

        store.delete_edge_definition("social", "likes").unwrap();
        assert_eq!(store.graph("social").unwrap().edge_definitions, vec![follows]);

        store.remove_graph("social").unwrap();
        assert!(store.graph("social").unwrap_err().is_not_found());
    }

    #[test]
    fn test_document_crud() {
        let store = SledStore::temporary().unwrap();
        store
            .create_collection("users", CollectionKind::Document)
            .unwrap();

        let generated = store
            .create_document("users", doc(json!({"name": "Anon"})))
            .unwrap();
        assert!(!generated.is_empty());
        assert_eq!(
            store.read_document("users", &generated).unwrap()["_key"],
            json!(generated)
        );

        let key = store
            .create_document("users", doc(json!({"_key": "alice", "age": 30})))
            .unwrap();
        assert_eq!(key, "alice");
        assert!(matches!(
            store.create_document("users", doc(json!({"_key": "alice"}))),
            Err(StoreError::DuplicateDocument { .. })
        ));

        store
            .update_document("users", "alice", doc(json!({"age": 31, "_key": "mallory"})))
            .unwrap();
        let alice = store.read_document("users", "alice").unwrap();
        assert_eq!(alice["age"], json!(31));
        assert_eq!(alice["_key"], json!("alice"));

        store
            .replace_document("users", "alice", doc(json!({"name": "Alice"})))
            .unwrap();
        assert_eq!(
            store.read_document("users", "alice").unwrap(),
            doc(json!({"_key": "alice", "name": "Alice"}))
        );

        store.delete_document("users", "alice").unwrap();
        assert!(store.read_document("users", "alice").unwrap_err().is_not_found());
        assert_eq!(store.document_count("users").unwrap(), 1);
    }

    #[test]
    fn test_edge_documents_need_endpoints() {
        let store = SledStore::temporary().unwrap();
        store
            .create_collection("follows", CollectionKind::Edge)
            .unwrap();

        assert!(matches!(
            store.create_document("follows", doc(json!({"_from": "users/a"}))),
            Err(StoreError::InvalidDocument { .. })
        ));
        store
            .create_document("follows", doc(json!({"_from": "users/a", "_to": "users/b"})))
            .unwrap();
    }

    #[test]
    fn test_documents_in_missing_collection() {
        let store = SledStore::temporary().unwrap();
        assert!(matches!(
            store.create_document("ghosts", Document::new()),
            Err(StoreError::CollectionNotFound(_))
        ));
        assert!(store.read_document("ghosts", "a").unwrap_err().is_not_found());
    }
}
