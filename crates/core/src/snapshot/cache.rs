//! Balance snapshot cache.
//!
//! Each snapshot key owns a slot guarded by its own mutex; there is no global
//! lock. Multi-key updates lock their keys in sorted order so two postings
//! touching overlapping keys cannot deadlock. A Moka read cache serves
//! unlocked balance reads and is refreshed or invalidated while the slot
//! lock is held, so it never resurrects a value older than the slot's.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use minigl_shared::LedgerConfig;
use minigl_shared::types::{CurrencyCode, Money};
use moka::sync::Cache;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::store::{SnapshotKey, SnapshotRow, SnapshotStore, SnapshotWrite};
use crate::ledger::LedgerError;
use crate::persistence::StoreError;

#[derive(Debug, Default)]
struct Slot {
    row: Option<SnapshotRow>,
    loaded: bool,
}

/// A signed change to one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    /// Key changed.
    pub key: SnapshotKey,
    /// Signed amount added to the balance.
    pub amount: Decimal,
    /// Currency of the balance.
    pub currency: CurrencyCode,
}

/// Result of applying a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedDelta {
    /// Key changed.
    pub key: SnapshotKey,
    /// Balance before.
    pub previous: Decimal,
    /// Balance after.
    pub current: Decimal,
    /// Row version after the write.
    pub version: u64,
    /// Currency of the balance.
    pub currency: CurrencyCode,
}

/// Latest balance per (journal, account, layer).
pub struct BalanceSnapshotCache {
    slots: DashMap<SnapshotKey, Arc<Mutex<Slot>>>,
    read_cache: Cache<SnapshotKey, SnapshotRow>,
    store: Arc<dyn SnapshotStore>,
    max_retries: u32,
}

impl std::fmt::Debug for BalanceSnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceSnapshotCache")
            .field("slots", &self.slots.len())
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl BalanceSnapshotCache {
    /// Creates a cache over `store`, sized and retried per `config`.
    #[must_use]
    pub fn new(store: Arc<dyn SnapshotStore>, config: &LedgerConfig) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(config.snapshot_cache_capacity)
            .time_to_live(Duration::from_secs(config.snapshot_cache_ttl_secs))
            .build();
        Self {
            slots: DashMap::new(),
            read_cache,
            store,
            max_retries: config.max_apply_retries,
        }
    }

    /// Current balance; zero in `currency` when the key was never written.
    pub fn get_balance(&self, key: &SnapshotKey, currency: CurrencyCode) -> Result<Money, LedgerError> {
        Ok(self
            .row(key)?
            .map_or_else(|| Money::zero(currency), |row| Money::new(row.balance, row.currency)))
    }

    /// Current row, if the key was ever written.
    pub fn row(&self, key: &SnapshotKey) -> Result<Option<SnapshotRow>, LedgerError> {
        if let Some(row) = self.read_cache.get(key) {
            return Ok(Some(row));
        }
        let slot = self.slot(key);
        let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        self.ensure_loaded(key, &mut guard)?;
        if let Some(row) = &guard.row {
            self.read_cache.insert(key.clone(), row.clone());
        }
        Ok(guard.row.clone())
    }

    /// Applies one delta atomically.
    pub fn apply_delta(
        &self,
        key: &SnapshotKey,
        amount: Decimal,
        currency: CurrencyCode,
    ) -> Result<AppliedDelta, LedgerError> {
        let keys = BTreeSet::from([key.clone()]);
        self.with_locked_retrying(&keys, |locked| {
            locked
                .apply(&[Delta {
                    key: key.clone(),
                    amount,
                    currency,
                }])?
                .pop()
                .ok_or_else(|| LedgerError::Internal("delta produced no result".to_string()))
        })
    }

    /// Locks `keys` in order, loads their rows and runs `f` while holding
    /// every lock.
    pub fn with_locked<R>(
        &self,
        keys: &BTreeSet<SnapshotKey>,
        f: impl FnOnce(&mut LockedSnapshots<'_>) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        let slots: Vec<(SnapshotKey, Arc<Mutex<Slot>>)> =
            keys.iter().map(|key| (key.clone(), self.slot(key))).collect();

        let mut guards = BTreeMap::new();
        for (key, slot) in &slots {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            self.ensure_loaded(key, &mut guard)?;
            guards.insert(key.clone(), guard);
        }

        let mut locked = LockedSnapshots {
            cache: self,
            guards,
        };
        let result = f(&mut locked);
        drop(locked);
        result
    }

    /// Like [`with_locked`](Self::with_locked), but runs `f` again while it
    /// fails with `ConcurrentModification`, up to the configured retry
    /// budget. Each run sees the rows reloaded after the conflict, so checks
    /// made inside `f` are repeated against current balances.
    pub fn with_locked_retrying<R>(
        &self,
        keys: &BTreeSet<SnapshotKey>,
        mut f: impl FnMut(&mut LockedSnapshots<'_>) -> Result<R, LedgerError>,
    ) -> Result<R, LedgerError> {
        self.with_locked(keys, |locked| {
            let mut attempt = 0;
            loop {
                match f(locked) {
                    Err(LedgerError::ConcurrentModification) if attempt < self.max_retries => {
                        attempt += 1;
                        debug!(attempt, "Retrying against reloaded snapshots");
                    }
                    result => return result,
                }
            }
        })
    }

    fn slot(&self, key: &SnapshotKey) -> Arc<Mutex<Slot>> {
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }

    fn ensure_loaded(&self, key: &SnapshotKey, slot: &mut Slot) -> Result<(), LedgerError> {
        if !slot.loaded {
            slot.row = self.store.load(key)?;
            slot.loaded = true;
        }
        Ok(())
    }
}

/// Snapshot slots held under lock for the duration of a posting.
pub struct LockedSnapshots<'a> {
    cache: &'a BalanceSnapshotCache,
    guards: BTreeMap<SnapshotKey, MutexGuard<'a, Slot>>,
}

impl LockedSnapshots<'_> {
    /// Balance of a locked key; `None` if the key is not locked.
    #[must_use]
    pub fn balance(&self, key: &SnapshotKey) -> Option<Decimal> {
        self.guards
            .get(key)
            .map(|slot| slot.row.as_ref().map_or(Decimal::ZERO, |row| row.balance))
    }

    /// Current version of a locked key (0 if never written).
    #[must_use]
    pub fn version(&self, key: &SnapshotKey) -> Option<u64> {
        self.guards
            .get(key)
            .map(|slot| slot.row.as_ref().map_or(0, |row| row.version))
    }

    /// Applies `deltas` as one unit.
    ///
    /// Rows are updated in memory, then persisted in a single versioned
    /// batch. A store failure restores the previous rows. A version conflict
    /// also reloads the affected rows from the store and fails with
    /// `ConcurrentModification`; the caller decides whether to run again.
    /// See [`BalanceSnapshotCache::with_locked_retrying`].
    pub fn apply(&mut self, deltas: &[Delta]) -> Result<Vec<AppliedDelta>, LedgerError> {
        let mut aggregated: BTreeMap<SnapshotKey, (Decimal, CurrencyCode)> = BTreeMap::new();
        for delta in deltas {
            if !self.guards.contains_key(&delta.key) {
                return Err(LedgerError::Internal(format!(
                    "snapshot {} updated without holding its lock",
                    delta.key
                )));
            }
            aggregated
                .entry(delta.key.clone())
                .or_insert((Decimal::ZERO, delta.currency))
                .0 += delta.amount;
        }

        match self.try_apply(&aggregated) {
            Ok(applied) => Ok(applied),
            Err(StoreError::VersionConflict { key, expected, actual }) => {
                warn!(%key, expected, actual, "Snapshot version conflict, reloading");
                self.reload(aggregated.keys())?;
                Err(LedgerError::ConcurrentModification)
            }
            Err(err) => {
                warn!(error = %err, "Snapshot write failed, rolled back");
                Err(err.into())
            }
        }
    }

    fn try_apply(
        &mut self,
        aggregated: &BTreeMap<SnapshotKey, (Decimal, CurrencyCode)>,
    ) -> Result<Vec<AppliedDelta>, StoreError> {
        let mut previous_rows = Vec::with_capacity(aggregated.len());
        let mut writes = Vec::with_capacity(aggregated.len());
        let mut applied = Vec::with_capacity(aggregated.len());

        for (key, (amount, currency)) in aggregated {
            let Some(slot) = self.guards.get_mut(key) else {
                continue;
            };
            let old = slot.row.clone();
            let (previous, version) = old
                .as_ref()
                .map_or((Decimal::ZERO, 0), |row| (row.balance, row.version));
            let row = SnapshotRow {
                balance: previous + *amount,
                currency: old.as_ref().map_or(*currency, |row| row.currency),
                version: version + 1,
            };
            slot.row = Some(row.clone());
            applied.push(AppliedDelta {
                key: key.clone(),
                previous,
                current: row.balance,
                version: row.version,
                currency: row.currency,
            });
            writes.push(SnapshotWrite {
                key: key.clone(),
                row,
                expected_version: version,
            });
            previous_rows.push((key.clone(), old));
        }

        match self.cache.store.save_batch(&writes) {
            Ok(()) => {
                for write in writes {
                    debug!(key = %write.key, balance = %write.row.balance, version = write.row.version, "Snapshot updated");
                    self.cache.read_cache.insert(write.key, write.row);
                }
                Ok(applied)
            }
            Err(err) => {
                for (key, old) in previous_rows {
                    if let Some(slot) = self.guards.get_mut(&key) {
                        slot.row = old;
                    }
                    self.cache.read_cache.invalidate(&key);
                }
                Err(err)
            }
        }
    }

    fn reload<'k>(&mut self, keys: impl Iterator<Item = &'k SnapshotKey>) -> Result<(), LedgerError> {
        for key in keys {
            let row = self.cache.store.load(key)?;
            if let Some(slot) = self.guards.get_mut(key) {
                slot.row = row;
                slot.loaded = true;
            }
            self.cache.read_cache.invalidate(key);
        }
        Ok(())
    }
}
