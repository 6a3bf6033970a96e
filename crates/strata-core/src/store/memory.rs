//! In-memory backing store.

use super::{
    document_key, validate_edge_document, CollectionInfo, CollectionKind, CollectionStore,
    Document, DocumentStore, EdgeDefinition, GeoIndexSpec, GraphInfo, GraphStore, IndexStore,
    PersistentIndexSpec, StoreError, KEY_FIELD,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexDef {
    Persistent(PersistentIndexSpec),
    Geo(GeoIndexSpec),
}

#[derive(Debug, Clone)]
struct MemCollection {
    kind: CollectionKind,
    indexes: BTreeMap<String, IndexDef>,
    documents: BTreeMap<String, Document>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: BTreeMap<String, MemCollection>,
    graphs: BTreeMap<String, GraphInfo>,
}

/// A complete backing store held in process memory.
///
/// Every mutating call increments a counter, which lets callers assert that
/// a run touched nothing.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    next_key: AtomicU64,
    mutations: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful mutating calls so far.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Names of all collections, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        self.inner.read().collections.keys().cloned().collect()
    }

    /// Names of all graphs, sorted.
    pub fn graph_names(&self) -> Vec<String> {
        self.inner.read().graphs.keys().cloned().collect()
    }

    /// Index names defined on a collection, sorted.
    pub fn index_names(&self, collection: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.read();
        let coll = inner
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.indexes.keys().cloned().collect())
    }

    /// Number of documents in a collection.
    pub fn document_count(&self, collection: &str) -> Result<usize, StoreError> {
        let inner = self.inner.read();
        inner
            .collections
            .get(collection)
            .map(|c| c.documents.len())
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))
    }

    fn touched(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn generate_key(&self) -> String {
        (self.next_key.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn ensure_index(&self, collection: &str, name: &str, def: IndexDef) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        match coll.indexes.get(name) {
            Some(existing) if *existing == def => return Ok(false),
            Some(_) => {
                return Err(StoreError::IndexConflict {
                    collection: collection.to_string(),
                    index: name.to_string(),
                })
            }
            None => {}
        }

        coll.indexes.insert(name.to_string(), def);
        drop(inner);
        self.touched();
        Ok(true)
    }
}

impl CollectionStore for MemoryStore {
    fn create_collection(&self, name: &str, kind: CollectionKind) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.collections.contains_key(name) {
            return Err(StoreError::DuplicateCollection(name.to_string()));
        }
        inner.collections.insert(
            name.to_string(),
            MemCollection {
                kind,
                indexes: BTreeMap::new(),
                documents: BTreeMap::new(),
            },
        );
        drop(inner);
        self.touched();
        Ok(())
    }

    fn collection(&self, name: &str) -> Result<CollectionInfo, StoreError> {
        let inner = self.inner.read();
        inner
            .collections
            .get(name)
            .map(|c| CollectionInfo {
                name: name.to_string(),
                kind: c.kind,
            })
            .ok_or_else(|| StoreError::CollectionNotFound(name.to_string()))
    }

    fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.inner.read().collections.contains_key(name))
    }

    fn remove_collection(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.collections.remove(name).is_none() {
            return Err(StoreError::CollectionNotFound(name.to_string()));
        }
        drop(inner);
        self.touched();
        Ok(())
    }
}

impl IndexStore for MemoryStore {
    fn ensure_persistent_index(
        &self,
        collection: &str,
        spec: &PersistentIndexSpec,
    ) -> Result<bool, StoreError> {
        self.ensure_index(collection, &spec.name, IndexDef::Persistent(spec.clone()))
    }

    fn ensure_geo_index(&self, collection: &str, spec: &GeoIndexSpec) -> Result<bool, StoreError> {
        self.ensure_index(collection, &spec.name, IndexDef::Geo(spec.clone()))
    }

    fn delete_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if coll.indexes.remove(name).is_none() {
            return Err(StoreError::IndexNotFound {
                collection: collection.to_string(),
                index: name.to_string(),
            });
        }
        drop(inner);
        self.touched();
        Ok(())
    }
}

impl GraphStore for MemoryStore {
    fn create_graph(
        &self,
        name: &str,
        edge_definitions: &[EdgeDefinition],
        orphan_collections: &[String],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.graphs.contains_key(name) {
            return Err(StoreError::DuplicateGraph(name.to_string()));
        }
        inner.graphs.insert(
            name.to_string(),
            GraphInfo {
                name: name.to_string(),
                edge_definitions: edge_definitions.to_vec(),
                orphan_collections: orphan_collections.to_vec(),
            },
        );
        drop(inner);
        self.touched();
        Ok(())
    }

    fn graph(&self, name: &str) -> Result<GraphInfo, StoreError> {
        self.inner
            .read()
            .graphs
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::GraphNotFound(name.to_string()))
    }

    fn remove_graph(&self, name: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.graphs.remove(name).is_none() {
            return Err(StoreError::GraphNotFound(name.to_string()));
        }
        drop(inner);
        self.touched();
        Ok(())
    }

    fn add_edge_definition(
        &self,
        graph: &str,
        definition: &EdgeDefinition,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let info = inner
            .graphs
            .get_mut(graph)
            .ok_or_else(|| StoreError::GraphNotFound(graph.to_string()))?;
        if info
            .edge_definitions
            .iter()
            .any(|d| d.collection == definition.collection)
        {
            return Err(StoreError::DuplicateEdgeDefinition {
                graph: graph.to_string(),
                collection: definition.collection.clone(),
            });
        }
        info.edge_definitions.push(definition.clone());
        drop(inner);
        self.touched();
        Ok(())
    }

    fn delete_edge_definition(&self, graph: &str, collection: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let info = inner
            .graphs
            .get_mut(graph)
            .ok_or_else(|| StoreError::GraphNotFound(graph.to_string()))?;
        let before = info.edge_definitions.len();
        info.edge_definitions.retain(|d| d.collection != collection);
        if info.edge_definitions.len() == before {
            return Err(StoreError::EdgeDefinitionNotFound {
                graph: graph.to_string(),
                collection: collection.to_string(),
            });
        }
        drop(inner);
        self.touched();
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn create_document(
        &self,
        collection: &str,
        mut document: Document,
    ) -> Result<String, StoreError> {
        let key = match document_key(&document) {
            Some(key) => key.to_string(),
            None => self.generate_key(),
        };

        let mut inner = self.inner.write();
        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if coll.kind == CollectionKind::Edge {
            validate_edge_document(collection, &document)?;
        }
        if coll.documents.contains_key(&key) {
            return Err(StoreError::DuplicateDocument {
                collection: collection.to_string(),
                key,
            });
        }

        document.insert(KEY_FIELD.to_string(), Value::String(key.clone()));
        coll.documents.insert(key.clone(), document);
        drop(inner);
        self.touched();
        Ok(key)
    }

    fn read_document(&self, collection: &str, key: &str) -> Result<Document, StoreError> {
        let inner = self.inner.read();
        let coll = inner
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        coll.documents
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::DocumentNotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            })
    }

    fn update_document(
        &self,
        collection: &str,
        key: &str,
        patch: Document,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let doc = coll
            .documents
            .get_mut(key)
            .ok_or_else(|| StoreError::DocumentNotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            })?;

        for (field, value) in patch {
            if field != KEY_FIELD {
                doc.insert(field, value);
            }
        }
        drop(inner);
        self.touched();
        Ok(())
    }

    fn replace_document(
        &self,
        collection: &str,
        key: &str,
        mut document: Document,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if coll.kind == CollectionKind::Edge {
            validate_edge_document(collection, &document)?;
        }

        document.insert(KEY_FIELD.to_string(), Value::String(key.to_string()));
        coll.documents.insert(key.to_string(), document);
        drop(inner);
        self.touched();
        Ok(())
    }

    fn delete_document(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let coll = inner
            .collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if coll.documents.remove(key).is_none() {
            return Err(StoreError::DocumentNotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }
        drop(inner);
        self.touched();
        Ok(())
    }
}
