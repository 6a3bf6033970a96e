//! Store error types.

use strata_core::StoreError;
use thiserror::Error;

/// Errors raised inside the sled store.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A catalog entry could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A catalog entry or document could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A capability-level failure (missing collection, duplicate key...).
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<Error> for StoreError {
    fn from(err: Error) -> Self {
        match err {
            Error::Store(inner) => inner,
            other => StoreError::Backend(other.to_string()),
        }
    }
}
