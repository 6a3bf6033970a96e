//! Persisted catalog entries: collections with their indexes, and graphs.

use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};
use strata_core::store::{GeoIndexSpec, PersistentIndexSpec};
use strata_core::{CollectionKind, EdgeDefinition, GraphInfo};

/// Stored collection kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum StoredKind {
    /// Document collection.
    Document,
    /// Edge collection.
    Edge,
}

impl From<CollectionKind> for StoredKind {
    fn from(kind: CollectionKind) -> Self {
        match kind {
            CollectionKind::Document => StoredKind::Document,
            CollectionKind::Edge => StoredKind::Edge,
        }
    }
}

impl From<StoredKind> for CollectionKind {
    fn from(kind: StoredKind) -> Self {
        match kind {
            StoredKind::Document => CollectionKind::Document,
            StoredKind::Edge => CollectionKind::Edge,
        }
    }
}

/// Stored index definition.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub enum IndexEntry {
    /// Persistent index.
    Persistent {
        /// Index name.
        name: String,
        /// Indexed fields.
        fields: Vec<String>,
        /// Reject duplicates.
        unique: bool,
        /// Skip documents missing the fields.
        sparse: bool,
    },
    /// Geo index.
    Geo {
        /// Index name.
        name: String,
        /// Location fields.
        fields: Vec<String>,
        /// GeoJSON values.
        geo_json: bool,
    },
}

impl IndexEntry {
    /// Index name.
    pub fn name(&self) -> &str {
        match self {
            IndexEntry::Persistent { name, .. } | IndexEntry::Geo { name, .. } => name,
        }
    }
}

impl From<&PersistentIndexSpec> for IndexEntry {
    fn from(spec: &PersistentIndexSpec) -> Self {
        IndexEntry::Persistent {
            name: spec.name.clone(),
            fields: spec.fields.clone(),
            unique: spec.unique,
            sparse: spec.sparse,
        }
    }
}

impl From<&GeoIndexSpec> for IndexEntry {
    fn from(spec: &GeoIndexSpec) -> Self {
        IndexEntry::Geo {
            name: spec.name.clone(),
            fields: spec.fields.clone(),
            geo_json: spec.geo_json,
        }
    }
}

/// Stored collection metadata.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct CollectionEntry {
    /// Document or edge.
    pub kind: StoredKind,
    /// Index definitions in creation order.
    pub indexes: Vec<IndexEntry>,
}

impl CollectionEntry {
    /// A collection with no indexes.
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            kind: kind.into(),
            indexes: Vec::new(),
        }
    }

    /// Look up an index by name.
    pub fn index(&self, name: &str) -> Option<&IndexEntry> {
        self.indexes.iter().find(|index| index.name() == name)
    }
}

/// Stored edge definition.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct EdgeEntry {
    /// Edge collection.
    pub collection: String,
    /// Source vertex collections.
    pub from: Vec<String>,
    /// Target vertex collections.
    pub to: Vec<String>,
}

impl From<&EdgeDefinition> for EdgeEntry {
    fn from(def: &EdgeDefinition) -> Self {
        Self {
            collection: def.collection.clone(),
            from: def.from.clone(),
            to: def.to.clone(),
        }
    }
}

impl From<EdgeEntry> for EdgeDefinition {
    fn from(entry: EdgeEntry) -> Self {
        Self {
            collection: entry.collection,
            from: entry.from,
            to: entry.to,
        }
    }
}

/// Stored graph metadata.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize)]
pub struct GraphEntry {
    /// Edge definitions in creation order.
    pub edge_definitions: Vec<EdgeEntry>,
    /// Orphan vertex collections.
    pub orphan_collections: Vec<String>,
}

impl GraphEntry {
    /// Convert to the capability-level view.
    pub fn into_info(self, name: &str) -> GraphInfo {
        GraphInfo {
            name: name.to_string(),
            edge_definitions: self.edge_definitions.into_iter().map(Into::into).collect(),
            orphan_collections: self.orphan_collections,
        }
    }
}

/// Adds rkyv `to_bytes`/`from_bytes` to catalog entry types.
macro_rules! rkyv_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $ty {
                /// Serialize the entry to bytes using rkyv.
                pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
                    rkyv::to_bytes::<rkyv::rancor::Error>(self)
                        .map(|v| v.to_vec())
                        .map_err(|e| Error::Serialization(e.to_string()))
                }

                /// Deserialize an entry from bytes using rkyv.
                ///
                /// sled hands back buffers with no alignment guarantee, so the
                /// bytes are copied into an aligned buffer first.
                pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
                    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
                    aligned.extend_from_slice(bytes);
                    rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
                        .map_err(|e| Error::Deserialization(e.to_string()))
                }
            }
        )+
    };
}

rkyv_codec!(CollectionEntry, GraphEntry);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_entry_bytes() {
        let mut entry = CollectionEntry::new(CollectionKind::Edge);
        entry.indexes.push(IndexEntry::Geo {
            name: "idx_loc".into(),
            fields: vec!["location".into()],
            geo_json: true,
        });

        let bytes = entry.to_bytes().unwrap();
        let decoded = CollectionEntry::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, entry);
        assert_eq!(CollectionKind::from(decoded.kind), CollectionKind::Edge);
        assert!(decoded.index("idx_loc").is_some());
    }

    #[test]
    fn test_decode_unaligned_slice() {
        let entry = GraphEntry {
            edge_definitions: vec![EdgeEntry {
                collection: "follows".into(),
                from: vec!["users".into()],
                to: vec!["users".into()],
            }],
            orphan_collections: vec!["tags".into()],
        };
        let mut bytes = vec![0u8];
        bytes.extend(entry.to_bytes().unwrap());

        let decoded = GraphEntry::from_bytes(&bytes[1..]).unwrap();
        let info = decoded.into_info("social");
        assert_eq!(info.edge_definitions[0].collection, "follows");
        assert_eq!(info.orphan_collections, vec!["tags".to_string()]);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(CollectionEntry::from_bytes(&[1, 2, 3]).is_err());
    }
}
