//! Migration source - enumerates and parses migration files.
//!
//! A migration directory holds one JSON file per change set. The file name
//! without its `.json` suffix is the migration id, and the id's leading digit
//! run orders migrations numerically (`000002_users` runs after
//! `000001_init`, and `10_x` after `2_y`).

use super::error::MigrationError;
use super::operation::{Operation, RawOperation};
use crate::hash::sha256_hex;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Suffix of recognized migration files.
pub const MIGRATION_SUFFIX: &str = ".json";

/// A parsed and validated migration.
#[derive(Debug, Clone, PartialEq)]
pub struct Migration {
    /// Human-readable description.
    pub description: String,
    /// Operations to apply, in order. Never empty.
    pub up: Vec<Operation>,
}

#[derive(Debug, Deserialize)]
struct MigrationFile {
    #[serde(default)]
    description: String,
    #[serde(default)]
    up: Option<Vec<RawOperation>>,
    #[serde(default)]
    down: Option<Vec<Value>>,
}

impl Migration {
    /// Parse and validate the contents of a migration file.
    pub fn parse(id: &str, bytes: &[u8]) -> Result<Self, MigrationError> {
        let file: MigrationFile =
            serde_json::from_slice(bytes).map_err(|e| MigrationError::Parse {
                id: id.to_string(),
                message: e.to_string(),
            })?;

        let raw_up = file.up.unwrap_or_default();
        if raw_up.is_empty() {
            return Err(MigrationError::validation(id, "missing up operations"));
        }
        if file.down.is_some_and(|down| !down.is_empty()) {
            return Err(MigrationError::validation(id, "down migrations unsupported"));
        }

        let mut up = Vec::with_capacity(raw_up.len());
        for (index, raw) in raw_up.into_iter().enumerate() {
            let label = format!("operation {} ({} '{}')", index, raw.kind, raw.name);
            let op = Operation::from_raw(raw)
                .map_err(|reason| MigrationError::validation(id, format!("{}: {}", label, reason)))?;
            up.push(op);
        }

        Ok(Self {
            description: file.description,
            up,
        })
    }
}

/// A recognized migration file, read and fingerprinted but not yet parsed.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// File name without suffix.
    pub id: String,
    /// Numeric prefix of the id.
    pub sequence: u64,
    /// Full path.
    pub path: PathBuf,
    /// Hex SHA-256 of the raw bytes.
    pub hash: String,
    contents: Vec<u8>,
}

impl SourceFile {
    /// Parse and validate the file contents.
    pub fn parse(&self) -> Result<Migration, MigrationError> {
        Migration::parse(&self.id, &self.contents)
    }
}

/// A directory entry that was not treated as a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    /// Entry name.
    pub file_name: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of scanning a migration directory.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    /// Recognized files in application order.
    pub files: Vec<SourceFile>,
    /// Entries that were ignored.
    pub skipped: Vec<SkippedEntry>,
}

/// Reads migration files from a directory.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    /// Create a source for the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory being read.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Enumerate, read and fingerprint every recognized file, in order.
    pub fn scan(&self) -> Result<Scan, MigrationError> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| MigrationError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut scan = Scan::default();
        for entry in entries {
            let entry = entry.map_err(|source| MigrationError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            let file_name = entry.file_name().to_string_lossy().into_owned();

            // Symlinks are followed to their target.
            let is_file = match std::fs::metadata(&path) {
                Ok(metadata) => metadata.is_file(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(source) => {
                    return Err(MigrationError::Io {
                        path: path.clone(),
                        source,
                    })
                }
            };
            if !is_file {
                scan.skipped.push(SkippedEntry {
                    file_name,
                    reason: "not a regular file".to_string(),
                });
                continue;
            }

            let Some(id) = file_name.strip_suffix(MIGRATION_SUFFIX) else {
                scan.skipped.push(SkippedEntry {
                    file_name,
                    reason: "unrecognized file suffix".to_string(),
                });
                continue;
            };

            let sequence = sequence_number(id)?;
            let contents = std::fs::read(&path).map_err(|source| MigrationError::Io {
                path: path.clone(),
                source,
            })?;

            scan.files.push(SourceFile {
                id: id.to_string(),
                sequence,
                hash: sha256_hex(&contents),
                path,
                contents,
            });
        }

        scan.files
            .sort_by(|a, b| a.sequence.cmp(&b.sequence).then_with(|| a.id.cmp(&b.id)));
        for pair in scan.files.windows(2) {
            if pair[0].sequence == pair[1].sequence {
                return Err(MigrationError::validation(
                    &pair[1].id,
                    format!("duplicate migration prefix shared with {}", pair[0].id),
                ));
            }
        }
        scan.skipped.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        Ok(scan)
    }

    /// Scan and parse every recognized file.
    pub fn load(&self) -> Result<Vec<(SourceFile, Migration)>, MigrationError> {
        self.scan()?
            .files
            .into_iter()
            .map(|file| {
                let migration = file.parse()?;
                Ok((file, migration))
            })
            .collect()
    }
}

/// Numeric prefix of a migration id.
pub fn sequence_number(id: &str) -> Result<u64, MigrationError> {
    let digits: &str = {
        let end = id
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(id.len());
        &id[..end]
    };

    if digits.is_empty() {
        return Err(MigrationError::validation(id, "missing numeric prefix"));
    }
    digits
        .parse::<u64>()
        .map_err(|_| MigrationError::validation(id, "numeric prefix out of range"))
}
