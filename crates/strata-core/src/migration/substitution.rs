//! Placeholder expansion for document-valued operations.
//!
//! Two markers are recognized in top-level string values:
//!
//! - `NOW()` becomes the current UTC time, RFC 3339 with second precision.
//! - `SHA256(field)` becomes the hex SHA-256 digest of the string value of
//!   `field` in the same document, as written in the migration file.

use super::error::MigrationError;
use crate::hash::sha256_hex;
use crate::store::Document;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

/// Marker expanded to the current timestamp.
pub const NOW_MARKER: &str = "NOW()";

const SHA256_PREFIX: &str = "SHA256(";
const SHA256_SUFFIX: &str = ")";

/// Expand placeholders using the current time.
pub fn substitute(document: &Document) -> Result<Document, MigrationError> {
    substitute_at(document, Utc::now())
}

/// Expand placeholders using a fixed time.
pub fn substitute_at(document: &Document, now: DateTime<Utc>) -> Result<Document, MigrationError> {
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    let mut expanded = document.clone();

    for (field, value) in document {
        let Value::String(text) = value else {
            continue;
        };

        if text == NOW_MARKER {
            expanded.insert(field.clone(), Value::String(timestamp.clone()));
        } else if let Some(source) = hash_reference(text) {
            let digest = match document.get(source) {
                Some(Value::String(input)) => sha256_hex(input.as_bytes()),
                Some(_) => {
                    return Err(MigrationError::Substitution {
                        field: field.clone(),
                        reason: format!("field '{}' is not a string", source),
                    })
                }
                None => {
                    return Err(MigrationError::Substitution {
                        field: field.clone(),
                        reason: format!(
                            "no string field '{}' found in document for computing hash",
                            source
                        ),
                    })
                }
            };
            expanded.insert(field.clone(), Value::String(digest));
        }
    }

    Ok(expanded)
}

fn hash_reference(text: &str) -> Option<&str> {
    text.strip_prefix(SHA256_PREFIX)?
        .strip_suffix(SHA256_SUFFIX)
        .map(str::trim)
}
