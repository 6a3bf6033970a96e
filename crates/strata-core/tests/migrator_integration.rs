//! Integration tests for the migration engine against the in-memory store.

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use strata_core::{
    CancellationToken, CollectionStore, DocumentStore, FailureKind, MemoryObserver, MemoryStore,
    MigrationError, MigrationEvent, MigrationObserver, MigrationStatus, Migrator, MigratorConfig,
    RollbackScope, RunState,
};

struct TestContext {
    store: Arc<MemoryStore>,
    observer: MemoryObserver,
    dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            observer: MemoryObserver::new(),
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write(&self, file_name: &str, contents: serde_json::Value) {
        std::fs::write(
            self.dir.path().join(file_name),
            serde_json::to_vec_pretty(&contents).unwrap(),
        )
        .unwrap();
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn migrator(&self, config: MigratorConfig) -> Migrator {
        Migrator::new(self.store.clone(), config).with_observer(Arc::new(self.observer.clone()))
    }

    fn config(&self) -> MigratorConfig {
        MigratorConfig::new(self.path())
    }

    fn ledger_len(&self) -> usize {
        self.store.document_count("migrations").unwrap()
    }
}

fn create_collection(name: &str) -> serde_json::Value {
    json!({"type": "createCollection", "name": name, "options": {"type": "document"}})
}

fn unsupported() -> serde_json::Value {
    json!({"type": "dropDatabase", "name": "everything"})
}

fn email_index() -> serde_json::Value {
    json!({
        "type": "createPersistentIndex",
        "name": "idx_email",
        "options": {"collection": "users", "fields": ["email"], "unique": true}
    })
}

/// Records events and cancels the run once a given migration has applied.
struct CancelAfter {
    migration: &'static str,
    token: CancellationToken,
    events: MemoryObserver,
}

impl MigrationObserver for CancelAfter {
    fn on_event(&self, event: &MigrationEvent) {
        self.events.on_event(event);
        if let MigrationEvent::MigrationApplied { migration, .. } = event {
            if migration == self.migration {
                self.token.cancel();
            }
        }
    }
}

/// Two migrations where the second fails after creating a collection.
fn write_failing_batch(ctx: &TestContext) {
    ctx.write(
        "000001_authors.json",
        json!({
            "description": "authors",
            "up": [
                create_collection("authors"),
                {"type": "addDocument", "name": "authors", "options": {"document": {"_key": "ann", "name": "Ann"}}}
            ]
        }),
    );
    ctx.write(
        "000002_books.json",
        json!({
            "description": "books",
            "up": [create_collection("books"), unsupported()]
        }),
    );
}

#[test]
fn test_second_run_is_idempotent() {
    let ctx = TestContext::new();
    ctx.write("000001_users.json", json!({"up": [create_collection("users")]}));
    ctx.write(
        "000002_index.json",
        json!({"up": [{
            "type": "createPersistentIndex",
            "name": "idx_email",
            "options": {"collection": "users", "fields": ["email"], "unique": true}
        }]}),
    );

    let first = ctx.migrator(ctx.config()).run().unwrap();
    assert_eq!(first.applied.len(), 2);
    assert_eq!(first.operations_applied, 2);
    let mutations = ctx.store.mutation_count();

    let second = ctx.migrator(ctx.config()).run().unwrap();
    assert!(second.applied.is_empty());
    assert_eq!(second.operations_applied, 0);
    assert_eq!(second.skipped.len(), 2);
    assert_eq!(ctx.store.mutation_count(), mutations);
    assert_eq!(ctx.ledger_len(), 2);
}

#[test]
fn test_applies_in_numeric_order() {
    let ctx = TestContext::new();
    ctx.write(
        "000002_x.json",
        json!({"up": [{"type": "addDocument", "name": "y", "options": {"document": {"_key": "k"}}}]}),
    );
    ctx.write("000001_y.json", json!({"up": [create_collection("y")]}));

    let report = ctx.migrator(ctx.config()).run().unwrap();
    assert_eq!(report.applied, vec!["000001_y".to_string(), "000002_x".to_string()]);

    let started: Vec<_> = ctx
        .observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            MigrationEvent::MigrationStarted { migration, .. } => Some(migration),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["000001_y", "000002_x"]);
}

#[test]
fn test_tampered_file_fails_without_force() {
    let ctx = TestContext::new();
    ctx.write("000001_users.json", json!({"up": [create_collection("users")]}));
    ctx.migrator(ctx.config()).run().unwrap();

    ctx.write(
        "000001_users.json",
        json!({"up": [create_collection("users"), create_collection("extra")]}),
    );
    let err = ctx.migrator(ctx.config()).run().unwrap_err();

    assert!(matches!(err, MigrationError::Integrity { ref id, .. } if id == "000001_users"));
    assert!(!ctx.store.collection_exists("extra").unwrap());
    assert_eq!(
        ctx.observer.states().last(),
        Some(&RunState::Failed(FailureKind::Aborted))
    );
}

#[test]
fn test_tampered_file_with_force_is_not_reapplied() {
    let ctx = TestContext::new();
    ctx.write("000001_users.json", json!({"up": [create_collection("users")]}));
    ctx.migrator(ctx.config()).run().unwrap();

    ctx.write(
        "000001_users.json",
        json!({"up": [create_collection("users"), create_collection("extra")]}),
    );
    let mutations = ctx.store.mutation_count();
    let report = ctx.migrator(ctx.config().with_force(true)).run().unwrap();

    assert!(report.applied.is_empty());
    assert_eq!(report.skipped, vec!["000001_users".to_string()]);
    assert!(!ctx.store.collection_exists("extra").unwrap());
    assert_eq!(ctx.store.mutation_count(), mutations);
    assert!(ctx
        .observer
        .events()
        .iter()
        .any(|e| matches!(e, MigrationEvent::ChecksumMismatch { forced: true, .. })));
}

#[test]
fn test_batch_scope_leaves_nothing_behind() {
    let ctx = TestContext::new();
    write_failing_batch(&ctx);

    let err = ctx
        .migrator(ctx.config().with_rollback_scope(RollbackScope::Batch))
        .run()
        .unwrap_err();

    assert!(matches!(err.root(), MigrationError::UnsupportedOperation { .. }));
    assert!(!err.is_inconsistent());
    assert_eq!(ctx.ledger_len(), 0);
    assert_eq!(ctx.store.collection_names(), vec!["migrations".to_string()]);
    assert_eq!(
        ctx.observer.states().last(),
        Some(&RunState::Failed(FailureKind::Compensated))
    );
}

#[test]
fn test_per_migration_scope_keeps_earlier_migrations() {
    let ctx = TestContext::new();
    write_failing_batch(&ctx);

    let err = ctx.migrator(ctx.config()).run().unwrap_err();

    match &err {
        MigrationError::OperationFailed { id, index, .. } => {
            assert_eq!(id, "000002_books");
            assert_eq!(*index, 1);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(ctx.ledger_len(), 1);
    assert!(ctx.store.collection_exists("authors").unwrap());
    assert_eq!(ctx.store.read_document("authors", "ann").unwrap()["name"], json!("Ann"));
    assert!(!ctx.store.collection_exists("books").unwrap());

    // The failed migration runs again next time; the first one does not.
    ctx.write("000002_books.json", json!({"up": [create_collection("books")]}));
    let report = ctx.migrator(ctx.config()).run().unwrap();
    assert_eq!(report.applied, vec!["000002_books".to_string()]);
    assert_eq!(report.skipped, vec!["000001_authors".to_string()]);
}

#[test]
fn test_placeholders_expanded_on_write() {
    let ctx = TestContext::new();
    ctx.write(
        "000001_books.json",
        json!({"up": [
            create_collection("books"),
            {"type": "addDocument", "name": "books", "options": {"document": {
                "_key": "b1",
                "isbn": "123",
                "isbnHash": "SHA256(isbn)",
                "createdAt": "NOW()"
            }}},
            {"type": "updateDocument", "name": "books", "options": {"_key": "b1", "updatedAt": "NOW()"}}
        ]}),
    );

    ctx.migrator(ctx.config()).run().unwrap();
    let book = ctx.store.read_document("books", "b1").unwrap();

    assert_eq!(
        book["isbnHash"],
        json!("a665a45920422f9d417e4867efdc4fb8a04a1f3fff1fa07e998e86f7f7a27ae3")
    );
    for field in ["createdAt", "updatedAt"] {
        let text = book[field].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(text).is_ok(), "{}", text);
        assert!(text.ends_with('Z'));
    }
}

#[test]
fn test_empty_directory_creates_ledger() {
    let ctx = TestContext::new();
    std::fs::write(ctx.path().join("notes.txt"), "not a migration").unwrap();

    let report = ctx.migrator(ctx.config()).run().unwrap();

    assert!(report.applied.is_empty());
    assert_eq!(report.state, RunState::Done);
    assert!(ctx.store.collection_exists("migrations").unwrap());
    assert_eq!(ctx.ledger_len(), 0);
    assert!(ctx
        .observer
        .events()
        .iter()
        .any(|e| matches!(e, MigrationEvent::FileSkipped { file_name, .. } if file_name == "notes.txt")));
}

#[test]
fn test_structural_errors_fail_before_any_operation() {
    for bad in [
        json!({"up": []}),
        json!({"up": [create_collection("z")], "down": [create_collection("z")]}),
    ] {
        let ctx = TestContext::new();
        ctx.write("000001_users.json", json!({"up": [create_collection("users")]}));
        ctx.write("000002_bad.json", bad);

        let err = ctx.migrator(ctx.config()).run().unwrap_err();

        assert!(matches!(err, MigrationError::Validation { ref id, .. } if id == "000002_bad"));
        assert!(!ctx.store.collection_exists("users").unwrap());
        assert_eq!(ctx.ledger_len(), 0);
    }
}

#[test]
fn test_irreversible_compensation_is_inconsistent() {
    let ctx = TestContext::new();
    ctx.write(
        "000001_swap.json",
        json!({"up": [
            create_collection("legacy"),
            {"type": "deleteCollection", "name": "legacy"},
            unsupported()
        ]}),
    );

    let err = ctx.migrator(ctx.config()).run().unwrap_err();

    assert!(err.is_inconsistent());
    match err {
        MigrationError::CompensationFailed {
            original,
            compensation,
        } => {
            assert!(matches!(
                original.root(),
                MigrationError::UnsupportedOperation { .. }
            ));
            assert!(matches!(
                *compensation,
                MigrationError::IrreversibleOperation { .. }
            ));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(ctx.ledger_len(), 0);
    assert_eq!(
        ctx.observer.states().last(),
        Some(&RunState::Failed(FailureKind::Inconsistent))
    );
}

#[test]
fn test_update_and_delete_are_compensated() {
    let ctx = TestContext::new();
    ctx.store
        .create_collection("users", strata_core::CollectionKind::Document)
        .unwrap();
    ctx.store
        .create_document("users", json!({"_key": "a", "role": "user"}).as_object().cloned().unwrap())
        .unwrap();
    ctx.store
        .create_document("users", json!({"_key": "b", "role": "user"}).as_object().cloned().unwrap())
        .unwrap();
    ctx.write(
        "000001_roles.json",
        json!({"up": [
            {"type": "updateDocument", "name": "users", "options": {"_key": "a", "role": "admin"}},
            {"type": "deleteDocument", "name": "users", "options": {"_key": "b"}},
            unsupported()
        ]}),
    );

    let err = ctx.migrator(ctx.config()).run().unwrap_err();

    assert!(!err.is_inconsistent());
    assert_eq!(ctx.store.read_document("users", "a").unwrap()["role"], json!("user"));
    assert_eq!(ctx.store.read_document("users", "b").unwrap()["role"], json!("user"));
}

#[test]
fn test_cancellation_compensates() {
    let ctx = TestContext::new();
    ctx.write("000001_users.json", json!({"up": [create_collection("users")]}));
    let token = CancellationToken::new();
    token.cancel();

    let err = ctx
        .migrator(ctx.config())
        .with_cancellation(token)
        .run()
        .unwrap_err();

    assert!(matches!(err.root(), MigrationError::Cancelled { .. }));
    assert!(!ctx.store.collection_exists("users").unwrap());
    assert_eq!(ctx.ledger_len(), 0);
    assert_eq!(
        ctx.observer.states().last(),
        Some(&RunState::Failed(FailureKind::Compensated))
    );
}

#[test]
fn test_dry_run_changes_nothing() {
    let ctx = TestContext::new();
    ctx.write("000001_users.json", json!({"up": [create_collection("users")]}));

    let report = ctx.migrator(ctx.config().with_dry_run(true)).run().unwrap();

    assert!(report.dry_run);
    assert!(report.applied.is_empty());
    assert_eq!(report.pending, vec!["000001_users".to_string()]);
    assert_eq!(ctx.store.mutation_count(), 0);
    assert!(!ctx.store.collection_exists("migrations").unwrap());
}

#[test]
fn test_status_after_run() {
    let ctx = TestContext::new();
    ctx.write("000001_users.json", json!({"up": [create_collection("users")]}));
    ctx.write("000002_posts.json", json!({"up": [create_collection("posts")]}));
    ctx.migrator(ctx.config()).run().unwrap();

    ctx.write("000002_posts.json", json!({"up": [create_collection("articles")]}));
    ctx.write("000003_tags.json", json!({"up": [create_collection("tags")]}));
    let status = ctx.migrator(ctx.config()).status().unwrap();

    assert!(matches!(status[0].status, MigrationStatus::Applied { .. }));
    assert!(matches!(status[1].status, MigrationStatus::Modified { .. }));
    assert_eq!(status[2].status, MigrationStatus::Pending);
}

#[test]
fn test_redeclared_index_survives_rollback() {
    let ctx = TestContext::new();
    ctx.write(
        "000001_users.json",
        json!({"up": [create_collection("users"), email_index()]}),
    );
    ctx.migrator(ctx.config()).run().unwrap();

    ctx.write(
        "000002_cleanup.json",
        json!({"up": [
            email_index(),
            {"type": "deleteDocument", "name": "users", "options": {"_key": "nobody"}}
        ]}),
    );
    let err = ctx.migrator(ctx.config()).run().unwrap_err();

    assert!(!err.is_inconsistent());
    assert_eq!(ctx.ledger_len(), 1);
    assert_eq!(
        ctx.store.index_names("users").unwrap(),
        vec!["idx_email".to_string()]
    );
}

#[test]
fn test_commit_failure_is_inconsistent() {
    let ctx = TestContext::new();
    ctx.write(
        "000001_drop_ledger.json",
        json!({"up": [{"type": "deleteCollection", "name": "migrations"}]}),
    );

    let err = ctx.migrator(ctx.config()).run().unwrap_err();

    assert!(err.is_inconsistent());
    match &err {
        MigrationError::CommitFailed { id, source } => {
            assert_eq!(id, "000001_drop_ledger");
            assert!(source.is_not_found());
        }
        other => panic!("unexpected error {:?}", other),
    }
    let states = ctx.observer.states();
    assert!(!states.contains(&RunState::Compensating));
    assert_eq!(
        states.last(),
        Some(&RunState::Failed(FailureKind::Inconsistent))
    );
}

#[test]
fn test_batch_irreversible_compensation_is_inconsistent() {
    let ctx = TestContext::new();
    ctx.write(
        "000001_collections.json",
        json!({"up": [create_collection("keep"), create_collection("legacy")]}),
    );
    ctx.write(
        "000002_drop.json",
        json!({"up": [{"type": "deleteCollection", "name": "legacy"}]}),
    );
    ctx.write("000003_broken.json", json!({"up": [unsupported()]}));

    let err = ctx
        .migrator(ctx.config().with_rollback_scope(RollbackScope::Batch))
        .run()
        .unwrap_err();

    assert!(err.is_inconsistent());
    assert!(matches!(err, MigrationError::CompensationFailed { .. }));
    assert_eq!(ctx.ledger_len(), 0);
    // Compensation stops at the irreversible drop, so earlier work stays.
    assert!(ctx.store.collection_exists("keep").unwrap());
    assert!(ctx.observer.events().iter().any(|e| matches!(
        e,
        MigrationEvent::CompensationFailed { kind, .. } if kind == "deleteCollection"
    )));
    assert_eq!(
        ctx.observer.states().last(),
        Some(&RunState::Failed(FailureKind::Inconsistent))
    );
}

#[test]
fn test_batch_cancellation_between_migrations() {
    let ctx = TestContext::new();
    ctx.write("000001_a.json", json!({"up": [create_collection("a")]}));
    ctx.write("000002_b.json", json!({"up": [create_collection("b")]}));

    let token = CancellationToken::new();
    let observer = CancelAfter {
        migration: "000001_a",
        token: token.clone(),
        events: MemoryObserver::new(),
    };
    let events = observer.events.clone();

    let err = Migrator::new(
        ctx.store.clone(),
        ctx.config().with_rollback_scope(RollbackScope::Batch),
    )
    .with_observer(Arc::new(observer))
    .with_cancellation(token)
    .run()
    .unwrap_err();

    assert!(matches!(err.root(), MigrationError::Cancelled { .. }));
    match &err {
        MigrationError::OperationFailed { id, index, .. } => {
            assert_eq!(id, "000002_b");
            assert_eq!(*index, 0);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!ctx.store.collection_exists("a").unwrap());
    assert!(!ctx.store.collection_exists("b").unwrap());
    assert_eq!(ctx.ledger_len(), 0);

    let compensated = events
        .events()
        .iter()
        .filter(|e| matches!(e, MigrationEvent::OperationCompensated { .. }))
        .count();
    assert_eq!(compensated, 1);
    assert_eq!(
        events.states().last(),
        Some(&RunState::Failed(FailureKind::Compensated))
    );
}
