//! Error surface shared by the local durable store.

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by the local durable store.
///
/// Storage failures always propagate to the caller; no layer above the store
/// may treat a failed write as if it had happened.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying sqlite backend failed.
    #[error("sqlite failure: {0}")]
    Backend(#[from] rusqlite::Error),
    /// A persisted row could not be decoded back into its domain type.
    #[error("corrupt row in `{collection}`: {message}")]
    Corrupt {
        /// Logical collection the row belongs to.
        collection: &'static str,
        /// Description of the decoding failure.
        message: String,
    },
    /// The on-disk schema was written by a newer build of the application.
    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// Version found in the database file.
        found: i64,
        /// Highest version this build understands.
        supported: i64,
    },
}

impl StoreError {
    /// Construct a [`StoreError::Corrupt`] for a decoding failure.
    pub(crate) fn corrupt(collection: &'static str, err: impl std::fmt::Display) -> Self {
        StoreError::Corrupt {
            collection,
            message: err.to_string(),
        }
    }
}
