//! Limit configuration lookup.
//!
//! At most one limit row is active per key at any instant. Upserting a row
//! closes every overlapping row of the same key in the same critical
//! section: earlier rows are cut off at the new row's start, later rows are
//! emptied (expiry set to their own start) and kept for audit.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::info;

use super::types::{LimitKey, TransactionLimit};
use crate::persistence::StoreError;

/// Source of configured transaction limits.
pub trait LimitGateway: Send + Sync {
    /// The limit active for `key` at `at`, if any.
    fn active_limit(
        &self,
        key: &LimitKey,
        at: DateTime<Utc>,
    ) -> Result<Option<TransactionLimit>, StoreError>;

    /// Stores `limit`, closing overlapping rows of the same key. Returns the
    /// rows that were closed.
    fn upsert(&self, limit: TransactionLimit) -> Result<Vec<TransactionLimit>, StoreError>;
}

/// Limit gateway backed by a vector.
#[derive(Debug, Default)]
pub struct InMemoryLimitGateway {
    rows: RwLock<Vec<TransactionLimit>>,
}

impl InMemoryLimitGateway {
    /// Creates an empty gateway.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows, including closed ones.
    #[must_use]
    pub fn rows(&self) -> Vec<TransactionLimit> {
        self.rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl LimitGateway for InMemoryLimitGateway {
    fn active_limit(
        &self,
        key: &LimitKey,
        at: DateTime<Utc>,
    ) -> Result<Option<TransactionLimit>, StoreError> {
        Ok(self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|row| row.key() == *key && row.is_active_at(at))
            .max_by_key(|row| row.start)
            .cloned())
    }

    fn upsert(&self, limit: TransactionLimit) -> Result<Vec<TransactionLimit>, StoreError> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let key = limit.key();
        let mut closed = Vec::new();
        for row in rows.iter_mut() {
            if row.id == limit.id || row.key() != key || !row.overlaps(&limit) {
                continue;
            }
            row.expiry = Some(if row.start < limit.start {
                limit.start
            } else {
                row.start
            });
            closed.push(row.clone());
        }
        rows.retain(|row| row.id != limit.id);
        info!(
            limit_id = %limit.id,
            profile_id = %limit.profile_id,
            transaction_type = %limit.transaction_type,
            closed = closed.len(),
            "Transaction limit stored"
        );
        rows.push(limit);
        Ok(closed)
    }
}
