//! Transaction log.
//!
//! Posted records are immutable. A failed record may be replaced by a later
//! attempt with the same reference.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use minigl_shared::types::TransactionRef;
use rust_decimal::Decimal;

use super::types::TransactionRecord;
use crate::persistence::StoreError;

/// Durable storage for transaction records.
pub trait TransactionStore: Send + Sync {
    /// Record stored under `reference`.
    fn find(&self, reference: TransactionRef) -> Result<Option<TransactionRecord>, StoreError>;

    /// Posted reversal of `original`, if any.
    fn find_reversal_of(
        &self,
        original: TransactionRef,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    /// Posted completion of `pending`, if any.
    fn find_completion_of(
        &self,
        pending: TransactionRef,
    ) -> Result<Option<TransactionRecord>, StoreError>;

    /// Inserts `record`, or replaces a failed record with the same reference.
    fn save(&self, record: &TransactionRecord) -> Result<(), StoreError>;

    /// Signed impacts of posted movements on one key, in posting order.
    fn movements(
        &self,
        journal: &str,
        account: &str,
        layer: u32,
    ) -> Result<Vec<Decimal>, StoreError>;
}

#[derive(Debug, Default)]
struct Log {
    order: Vec<TransactionRef>,
    records: HashMap<TransactionRef, TransactionRecord>,
}

impl Log {
    fn posted(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.order
            .iter()
            .filter_map(|reference| self.records.get(reference))
            .filter(|record| record.is_posted())
    }
}

/// Transaction log kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryTransactionStore {
    log: RwLock<Log>,
}

impl InMemoryTransactionStore {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, failed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    /// Returns true if nothing was recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionStore for InMemoryTransactionStore {
    fn find(&self, reference: TransactionRef) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self
            .log
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(&reference)
            .cloned())
    }

    fn find_reversal_of(
        &self,
        original: TransactionRef,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        Ok(log
            .posted()
            .find(|record| record.reverses == Some(original))
            .cloned())
    }

    fn find_completion_of(
        &self,
        pending: TransactionRef,
    ) -> Result<Option<TransactionRecord>, StoreError> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        Ok(log
            .posted()
            .find(|record| record.completes == Some(pending))
            .cloned())
    }

    fn save(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let mut log = self.log.write().unwrap_or_else(PoisonError::into_inner);
        match log.records.get(&record.reference) {
            Some(existing) if existing.is_posted() => {
                return Err(StoreError::Immutable(record.reference.to_string()));
            }
            Some(_) => {
                log.order.retain(|reference| *reference != record.reference);
            }
            None => {}
        }
        log.order.push(record.reference);
        log.records.insert(record.reference, record.clone());
        Ok(())
    }

    fn movements(
        &self,
        journal: &str,
        account: &str,
        layer: u32,
    ) -> Result<Vec<Decimal>, StoreError> {
        let log = self.log.read().unwrap_or_else(PoisonError::into_inner);
        Ok(log
            .posted()
            .filter(|record| record.journal == journal)
            .flat_map(|record| &record.postings)
            .filter(|posting| posting.account == account && posting.layer == layer)
            .map(|posting| posting.impact)
            .collect())
    }
}
