//! End-to-end migration runs against a sled store.

use serde_json::json;
use std::sync::Arc;
use strata_core::{
    CollectionKind, CollectionStore, DocumentStore, GraphStore, MemoryObserver, MigrationError,
    Migrator, MigratorConfig, RollbackScope,
};
use strata_store::{SledStore, StoreConfig};

struct TestContext {
    store: Arc<SledStore>,
    migrations: tempfile::TempDir,
    _data_dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let data_dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(StoreConfig::new(data_dir.path())).unwrap();

        Self {
            store: Arc::new(store),
            migrations: tempfile::tempdir().unwrap(),
            _data_dir: data_dir,
        }
    }

    fn write(&self, file_name: &str, contents: serde_json::Value) {
        std::fs::write(
            self.migrations.path().join(file_name),
            serde_json::to_vec_pretty(&contents).unwrap(),
        )
        .unwrap();
    }

    fn migrator(&self) -> Migrator {
        self.migrator_with(MigratorConfig::new(self.migrations.path()))
    }

    fn migrator_with(&self, config: MigratorConfig) -> Migrator {
        Migrator::new(self.store.clone(), config).with_observer(Arc::new(MemoryObserver::new()))
    }
}

fn write_social_schema(ctx: &TestContext) {
    ctx.write(
        "000001_collections.json",
        json!({
            "description": "vertex and edge collections",
            "up": [
                {"type": "createCollection", "name": "users", "options": {"type": "document"}},
                {"type": "createCollection", "name": "places", "options": {"type": "document"}},
                {"type": "createCollection", "name": "follows", "options": {"type": "edge"}},
                {"type": "createCollection", "name": "visits", "options": {"type": "edge"}}
            ]
        }),
    );
    ctx.write(
        "000002_indexes.json",
        json!({
            "description": "indexes",
            "up": [
                {"type": "createPersistentIndex", "name": "idx_email",
                 "options": {"collection": "users", "fields": ["email"], "unique": true, "sparse": true}},
                {"type": "createGeoIndex", "name": "idx_location",
                 "options": {"collection": "places", "fields": ["location"], "geoJson": true}}
            ]
        }),
    );
    ctx.write(
        "000003_graph.json",
        json!({
            "description": "social graph",
            "up": [
                {"type": "createGraph", "name": "social", "options": {
                    "edgeDefinitions": [{"collection": "follows", "from": ["users"], "to": ["users"]}],
                    "orphanCollections": ["places"]
                }},
                {"type": "addEdgeDefinition", "name": "social",
                 "options": {"collection": "visits", "from": ["users"], "to": ["places"]}}
            ]
        }),
    );
    ctx.write(
        "000004_seed.json",
        json!({
            "description": "seed data",
            "up": [
                {"type": "addDocument", "name": "users", "options": {"document": {
                    "_key": "alice", "email": "alice@example.com", "emailHash": "SHA256(email)", "joinedAt": "NOW()"
                }}},
                {"type": "addDocument", "name": "users", "options": {"document": {"_key": "bob"}}},
                {"type": "addDocument", "name": "follows", "options": {"document": {
                    "_from": "users/alice", "_to": "users/bob"
                }}},
                {"type": "updateDocument", "name": "users", "options": {"_key": "bob", "email": "bob@example.com"}}
            ]
        }),
    );
}

#[test]
fn test_full_schema_applies() {
    let ctx = TestContext::new();
    write_social_schema(&ctx);

    let report = ctx.migrator().run().unwrap();
    assert_eq!(report.applied.len(), 4);
    assert_eq!(report.operations_applied, 12);

    assert_eq!(
        ctx.store.collection("follows").unwrap().kind,
        CollectionKind::Edge
    );
    assert_eq!(ctx.store.index_names("users").unwrap(), vec!["idx_email".to_string()]);
    assert_eq!(ctx.store.index_names("places").unwrap(), vec!["idx_location".to_string()]);

    let graph = ctx.store.graph("social").unwrap();
    assert_eq!(graph.edge_definitions.len(), 2);
    assert_eq!(graph.orphan_collections, vec!["places".to_string()]);

    let alice = ctx.store.read_document("users", "alice").unwrap();
    assert_eq!(alice["emailHash"].as_str().unwrap().len(), 64);
    assert_eq!(
        ctx.store.read_document("users", "bob").unwrap()["email"],
        json!("bob@example.com")
    );
    assert_eq!(ctx.store.document_count("follows").unwrap(), 1);
    assert_eq!(ctx.store.document_count("migrations").unwrap(), 4);

    let record = ctx.store.read_document("migrations", "000004_seed").unwrap();
    assert_eq!(record["operationResults"].as_array().unwrap().len(), 4);
    assert_eq!(
        record["operationResults"][3]["rollbackData"]["originalDocument"]["_key"],
        json!("bob")
    );
}

#[test]
fn test_rerun_is_noop() {
    let ctx = TestContext::new();
    write_social_schema(&ctx);
    ctx.migrator().run().unwrap();

    let report = ctx.migrator().run().unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped.len(), 4);
    assert_eq!(ctx.store.document_count("users").unwrap(), 2);
}

#[test]
fn test_ledger_survives_reopen() {
    let data_dir = tempfile::tempdir().unwrap();
    let migrations = tempfile::tempdir().unwrap();
    std::fs::write(
        migrations.path().join("000001_users.json"),
        r#"{"up": [{"type": "createCollection", "name": "users", "options": {"type": "document"}}]}"#,
    )
    .unwrap();

    {
        let store = Arc::new(SledStore::open(StoreConfig::new(data_dir.path())).unwrap());
        Migrator::new(store.clone(), MigratorConfig::new(migrations.path()))
            .run()
            .unwrap();
        store.flush().unwrap();
    }

    let store = Arc::new(SledStore::open(StoreConfig::new(data_dir.path())).unwrap());
    let report = Migrator::new(store, MigratorConfig::new(migrations.path()))
        .run()
        .unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped, vec!["000001_users".to_string()]);
}

#[test]
fn test_batch_failure_rolls_back_everything() {
    let ctx = TestContext::new();
    write_social_schema(&ctx);
    ctx.write(
        "000005_broken.json",
        json!({"up": [
            {"type": "addDocument", "name": "follows", "options": {"document": {"_from": "users/bob"}}}
        ]}),
    );

    let err = ctx
        .migrator_with(
            MigratorConfig::new(ctx.migrations.path()).with_rollback_scope(RollbackScope::Batch),
        )
        .run()
        .unwrap_err();

    assert!(matches!(
        err.root(),
        MigrationError::OperationExecution { .. }
    ));
    assert_eq!(ctx.store.collection_names().unwrap(), vec!["migrations".to_string()]);
    assert!(ctx.store.graph_names().unwrap().is_empty());
    assert_eq!(ctx.store.document_count("migrations").unwrap(), 0);
}

#[test]
fn test_per_migration_failure_keeps_earlier_work() {
    let ctx = TestContext::new();
    write_social_schema(&ctx);
    ctx.write(
        "000005_broken.json",
        json!({"up": [
            {"type": "addDocument", "name": "users", "options": {"document": {"_key": "carol"}}},
            {"type": "deleteDocument", "name": "users", "options": {"_key": "nobody"}}
        ]}),
    );

    let err = ctx.migrator().run().unwrap_err();

    assert!(!err.is_inconsistent());
    assert_eq!(ctx.store.document_count("migrations").unwrap(), 4);
    assert!(ctx.store.read_document("users", "carol").unwrap_err().is_not_found());
    assert!(ctx.store.read_document("users", "alice").is_ok());
}
