//! Journal store.
//!
//! Journals are opened explicitly, one per chart per calendar year. Rule ids
//! are resolved against the registry when a journal is opened, so an unknown
//! rule fails the administrative call rather than a later posting.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{Datelike, NaiveDate};
use tracing::info;

use super::rules::RuleRegistry;
use super::types::{Journal, JournalDefinition, JournalStatus};
use crate::ledger::LedgerError;

type JournalKey = (String, i32);

/// Holds the journals of every chart.
#[derive(Debug)]
pub struct JournalStore {
    journals: RwLock<HashMap<JournalKey, Arc<Journal>>>,
    registry: RuleRegistry,
}

impl Default for JournalStore {
    fn default() -> Self {
        Self::new(RuleRegistry::with_builtins())
    }
}

impl JournalStore {
    /// Creates an empty store resolving rules through `registry`.
    #[must_use]
    pub fn new(registry: RuleRegistry) -> Self {
        Self {
            journals: RwLock::new(HashMap::new()),
            registry,
        }
    }

    /// Opens a journal.
    ///
    /// Fails with `DuplicateJournal` if the chart already has a journal for
    /// that year (or one with the same name), and with `UnknownRule` if any
    /// rule id is not registered.
    pub fn open(&self, definition: JournalDefinition) -> Result<Arc<Journal>, LedgerError> {
        let (global, scoped): (Vec<_>, Vec<_>) = definition
            .rules
            .iter()
            .cloned()
            .partition(|rule| rule.account.is_none());
        let rules = global
            .into_iter()
            .chain(scoped)
            .map(|rule| self.registry.bind(rule))
            .collect::<Result<Vec<_>, _>>()?;

        let key = (definition.chart.clone(), definition.year());
        let mut journals = self.journals.write().unwrap_or_else(PoisonError::into_inner);
        if journals.contains_key(&key)
            || journals.values().any(|journal| journal.name == definition.name)
        {
            return Err(LedgerError::DuplicateJournal(definition.name));
        }

        let journal = Arc::new(Journal {
            chart: definition.chart,
            name: definition.name,
            start: definition.start,
            end: definition.end,
            status: definition.status,
            lock_date: definition.lock_date,
            layers: definition.layers,
            rules,
        });
        info!(
            journal = %journal.name,
            layers = journal.layers.len(),
            rules = journal.rules.len(),
            "Journal opened"
        );
        journals.insert(key, Arc::clone(&journal));
        Ok(journal)
    }

    /// Journal of `chart` covering `date`.
    ///
    /// Closed journals are returned; callers decide whether they may post.
    pub fn resolve(&self, chart: &str, date: NaiveDate) -> Result<Arc<Journal>, LedgerError> {
        self.journals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(chart.to_string(), date.year()))
            .filter(|journal| journal.covers(date))
            .cloned()
            .ok_or_else(|| LedgerError::JournalNotFound {
                chart: chart.to_string(),
                date,
            })
    }

    /// Journal by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<Arc<Journal>> {
        self.journals
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|journal| journal.name == name)
            .cloned()
    }

    /// Closes the journal of `chart` covering `date`.
    pub fn close(&self, chart: &str, date: NaiveDate) -> Result<Arc<Journal>, LedgerError> {
        self.update(chart, date, |journal| journal.status = JournalStatus::Closed)
    }

    /// Sets or clears the lock date of the journal covering `date`.
    pub fn set_lock_date(
        &self,
        chart: &str,
        date: NaiveDate,
        lock_date: Option<NaiveDate>,
    ) -> Result<Arc<Journal>, LedgerError> {
        self.update(chart, date, |journal| journal.lock_date = lock_date)
    }

    fn update(
        &self,
        chart: &str,
        date: NaiveDate,
        f: impl FnOnce(&mut Journal),
    ) -> Result<Arc<Journal>, LedgerError> {
        let mut journals = self.journals.write().unwrap_or_else(PoisonError::into_inner);
        let entry = journals
            .get_mut(&(chart.to_string(), date.year()))
            .ok_or_else(|| LedgerError::JournalNotFound {
                chart: chart.to_string(),
                date,
            })?;
        let mut journal = (**entry).clone();
        f(&mut journal);
        info!(
            journal = %journal.name,
            status = ?journal.status,
            lock_date = ?journal.lock_date,
            "Journal updated"
        );
        *entry = Arc::new(journal);
        Ok(Arc::clone(entry))
    }
}
