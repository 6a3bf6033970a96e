//! Pending-set planning and status reporting.

use super::error::MigrationError;
use super::event::{MigrationEvent, MigrationObserver};
use super::ledger::Ledger;
use super::source::{Migration, SourceFile};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// A migration that has not been applied yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMigration {
    /// Migration id.
    pub id: String,
    /// Parsed content.
    pub migration: Migration,
    /// Hex SHA-256 of the file.
    pub content_hash: String,
    /// Where the file was read from.
    pub path: PathBuf,
}

/// Output of planning.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Migrations to apply, in order.
    pub pending: Vec<PendingMigration>,
    /// Ids already recorded in the ledger.
    pub applied: Vec<String>,
    /// Ids whose files changed after being applied (only with force).
    pub modified: Vec<String>,
}

/// Compute the pending set.
///
/// Files already recorded are skipped and not parsed. A hash mismatch on a
/// recorded file fails with [`MigrationError::Integrity`] unless `force` is
/// set, in which case it is reported and the file is still skipped.
pub fn plan(
    files: &[SourceFile],
    ledger: &Ledger,
    force: bool,
    observer: &dyn MigrationObserver,
) -> Result<Plan, MigrationError> {
    let mut plan = Plan::default();

    for file in files {
        if let Some(record) = ledger.lookup(&file.id)? {
            if record.sha256 != file.hash {
                observer.on_event(&MigrationEvent::ChecksumMismatch {
                    migration: file.id.clone(),
                    recorded: record.sha256.clone(),
                    actual: file.hash.clone(),
                    forced: force,
                });
                if !force {
                    return Err(MigrationError::Integrity {
                        id: file.id.clone(),
                        recorded: record.sha256,
                        actual: file.hash.clone(),
                    });
                }
                plan.modified.push(file.id.clone());
            }
            observer.on_event(&MigrationEvent::AlreadyApplied {
                migration: file.id.clone(),
            });
            plan.applied.push(file.id.clone());
            continue;
        }

        let migration = file.parse()?;
        observer.on_event(&MigrationEvent::MigrationPlanned {
            migration: file.id.clone(),
            operations: migration.up.len(),
        });
        plan.pending.push(PendingMigration {
            id: file.id.clone(),
            migration,
            content_hash: file.hash.clone(),
            path: file.path.clone(),
        });
    }

    Ok(plan)
}

/// Where a migration stands relative to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Recorded, and the file is unchanged.
    Applied {
        /// When it was recorded.
        applied_at: DateTime<Utc>,
    },
    /// Recorded, but the file changed since.
    Modified {
        /// When it was recorded.
        applied_at: DateTime<Utc>,
        /// Hash in the ledger.
        recorded: String,
    },
    /// Not recorded.
    Pending,
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStatus::Applied { .. } => f.pad("applied"),
            MigrationStatus::Modified { .. } => f.pad("modified"),
            MigrationStatus::Pending => f.pad("pending"),
        }
    }
}

/// Status of one migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatusEntry {
    /// Migration id.
    pub id: String,
    /// Hex SHA-256 of the file on disk.
    pub hash: String,
    /// Ledger standing.
    pub status: MigrationStatus,
}

/// Report the ledger standing of every file.
pub fn status(files: &[SourceFile], ledger: &Ledger) -> Result<Vec<MigrationStatusEntry>, MigrationError> {
    files
        .iter()
        .map(|file| {
            let status = match ledger.lookup(&file.id)? {
                Some(record) if record.sha256 == file.hash => MigrationStatus::Applied {
                    applied_at: record.applied_at,
                },
                Some(record) => MigrationStatus::Modified {
                    applied_at: record.applied_at,
                    recorded: record.sha256,
                },
                None => MigrationStatus::Pending,
            };
            Ok(MigrationStatusEntry {
                id: file.id.clone(),
                hash: file.hash.clone(),
                status,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::event::{MemoryObserver, NullObserver};
    use crate::migration::ledger::AppliedMigrationRecord;
    use crate::migration::source::MigrationSource;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    const USERS: &str = r#"{"up": [{"type": "createCollection", "name": "users", "options": {"type": "document"}}]}"#;
    const POSTS: &str = r#"{"up": [{"type": "createCollection", "name": "posts", "options": {"type": "document"}}]}"#;

    fn setup() -> (tempfile::TempDir, Vec<SourceFile>, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("000001_users.json"), USERS).unwrap();
        std::fs::write(dir.path().join("000002_posts.json"), POSTS).unwrap();
        let files = MigrationSource::new(dir.path()).scan().unwrap().files;
        let ledger = Ledger::open(Arc::new(MemoryStore::new()), "migrations").unwrap();
        (dir, files, ledger)
    }

    #[test]
    fn test_everything_pending_on_empty_ledger() {
        let (_dir, files, ledger) = setup();
        let plan = plan(&files, &ledger, false, &NullObserver).unwrap();

        let ids: Vec<_> = plan.pending.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["000001_users", "000002_posts"]);
        assert!(plan.applied.is_empty());
    }

    #[test]
    fn test_recorded_migration_skipped() {
        let (_dir, files, ledger) = setup();
        ledger
            .append(&AppliedMigrationRecord::new("000001_users", files[0].hash.clone(), vec![]))
            .unwrap();

        let plan = plan(&files, &ledger, false, &NullObserver).unwrap();
        assert_eq!(plan.pending.len(), 1);
        assert_eq!(plan.pending[0].id, "000002_posts");
        assert_eq!(plan.applied, vec!["000001_users".to_string()]);
    }

    #[test]
    fn test_drift_without_force_fails() {
        let (_dir, files, ledger) = setup();
        ledger
            .append(&AppliedMigrationRecord::new("000001_users", "stale", vec![]))
            .unwrap();

        let err = plan(&files, &ledger, false, &NullObserver).unwrap_err();
        assert!(matches!(err, MigrationError::Integrity { ref id, .. } if id == "000001_users"));
    }

    #[test]
    fn test_drift_with_force_warns_and_skips() {
        let (_dir, files, ledger) = setup();
        ledger
            .append(&AppliedMigrationRecord::new("000001_users", "stale", vec![]))
            .unwrap();
        let observer = MemoryObserver::new();

        let plan = plan(&files, &ledger, true, &observer).unwrap();
        assert_eq!(plan.pending.len(), 1);
        assert_eq!(plan.modified, vec!["000001_users".to_string()]);
        assert!(observer
            .events()
            .iter()
            .any(|e| matches!(e, MigrationEvent::ChecksumMismatch { forced: true, .. })));
    }

    #[test]
    fn test_recorded_files_are_not_parsed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("000001_broken.json"), "{ not json").unwrap();
        let files = MigrationSource::new(dir.path()).scan().unwrap().files;
        let ledger = Ledger::open(Arc::new(MemoryStore::new()), "migrations").unwrap();
        ledger
            .append(&AppliedMigrationRecord::new("000001_broken", files[0].hash.clone(), vec![]))
            .unwrap();

        let plan = plan(&files, &ledger, false, &NullObserver).unwrap();
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn test_status_entries() {
        let (_dir, files, ledger) = setup();
        ledger
            .append(&AppliedMigrationRecord::new("000001_users", "stale", vec![]))
            .unwrap();

        let entries = status(&files, &ledger).unwrap();
        assert!(matches!(entries[0].status, MigrationStatus::Modified { .. }));
        assert_eq!(entries[1].status, MigrationStatus::Pending);
        assert_eq!(entries[1].status.to_string(), "pending");
    }
}
