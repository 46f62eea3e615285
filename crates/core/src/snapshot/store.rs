//! Durable snapshot storage seam.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use minigl_shared::types::CurrencyCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::persistence::StoreError;

/// Identity of a balance snapshot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    /// Journal name.
    pub journal: String,
    /// Final account code.
    pub account: String,
    /// Layer id.
    pub layer: u32,
}

impl SnapshotKey {
    /// Creates a key.
    #[must_use]
    pub fn new(journal: &str, account: &str, layer: u32) -> Self {
        Self {
            journal: journal.to_string(),
            account: account.to_string(),
            layer,
        }
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.journal, self.account, self.layer)
    }
}

/// Materialized balance of one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    /// Balance.
    pub balance: Decimal,
    /// Currency of the balance.
    pub currency: CurrencyCode,
    /// Incremented on every write; 0 means never written.
    pub version: u64,
}

/// A versioned write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotWrite {
    /// Key written.
    pub key: SnapshotKey,
    /// New row.
    pub row: SnapshotRow,
    /// Version the writer read; the store rejects the batch if it differs.
    pub expected_version: u64,
}

/// Durable storage for snapshot rows.
pub trait SnapshotStore: Send + Sync {
    /// Loads a row.
    fn load(&self, key: &SnapshotKey) -> Result<Option<SnapshotRow>, StoreError>;

    /// Writes all rows or none.
    fn save_batch(&self, writes: &[SnapshotWrite]) -> Result<(), StoreError>;
}

/// Snapshot store backed by a map.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    rows: Mutex<HashMap<SnapshotKey, SnapshotRow>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if nothing was stored yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn load(&self, key: &SnapshotKey) -> Result<Option<SnapshotRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn save_batch(&self, writes: &[SnapshotWrite]) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        for write in writes {
            let actual = rows.get(&write.key).map_or(0, |row| row.version);
            if actual != write.expected_version {
                return Err(StoreError::VersionConflict {
                    key: write.key.to_string(),
                    expected: write.expected_version,
                    actual,
                });
            }
        }
        for write in writes {
            rows.insert(write.key.clone(), write.row.clone());
        }
        Ok(())
    }
}
