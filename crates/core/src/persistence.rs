//! Errors shared by the durable store seams (snapshots, transaction log,
//! limit gateway).

use thiserror::Error;

use crate::ledger::LedgerError;

/// Failure reported by a store implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Optimistic version check failed.
    #[error("Version conflict on {key}: expected {expected}, found {actual}")]
    VersionConflict {
        /// Display form of the conflicting key.
        key: String,
        /// Version the writer expected.
        expected: u64,
        /// Version the store holds.
        actual: u64,
    },

    /// Store could not be reached or refused the write.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Write would overwrite a record that may no longer change.
    #[error("Record {0} is immutable")]
    Immutable(String),
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => Self::ConcurrentModification,
            StoreError::Unavailable(msg) => Self::Persistence(msg),
            StoreError::Immutable(key) => Self::Persistence(format!("record {key} is immutable")),
        }
    }
}
