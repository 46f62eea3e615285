//! Shared store of charts.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use minigl_shared::LedgerConfig;
use minigl_shared::types::CurrencyCode;
use tracing::info;

use super::tree::ChartOfAccounts;
use super::types::{Account, CreateAccountRequest, CreatedAccount, NewAccount};
use crate::ledger::LedgerError;

/// Holds every tenant chart.
///
/// Readers get an `Arc` snapshot of a chart and never hold the store lock
/// while posting. Writers clone-on-write, so a posting in progress keeps
/// seeing the chart it started with.
#[derive(Debug)]
pub struct ChartStore {
    charts: RwLock<HashMap<String, Arc<ChartOfAccounts>>>,
    config: LedgerConfig,
}

impl ChartStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            charts: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Creates an empty chart.
    pub fn create_chart(
        &self,
        code: &str,
        description: &str,
        currency: CurrencyCode,
    ) -> Result<Arc<ChartOfAccounts>, LedgerError> {
        let mut charts = self.charts.write().unwrap_or_else(PoisonError::into_inner);
        if charts.contains_key(code) {
            return Err(LedgerError::DuplicateChart(code.to_string()));
        }
        let chart = Arc::new(ChartOfAccounts::new(code, description, currency));
        charts.insert(code.to_string(), Arc::clone(&chart));
        info!(chart = code, currency = %currency, "Chart created");
        Ok(chart)
    }

    /// Current snapshot of a chart.
    pub fn chart(&self, code: &str) -> Result<Arc<ChartOfAccounts>, LedgerError> {
        self.charts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(code)
            .cloned()
            .ok_or_else(|| LedgerError::ChartNotFound(code.to_string()))
    }

    /// Looks up an account.
    pub fn resolve_account(&self, chart: &str, code: &str) -> Result<Account, LedgerError> {
        self.chart(chart)?.resolve_account(code).cloned()
    }

    /// Adds an account with an explicit code.
    pub fn add_account(
        &self,
        chart: &str,
        parent: Option<&str>,
        new: NewAccount,
    ) -> Result<Account, LedgerError> {
        let strict = self.config.strict_account_codes;
        self.modify(chart, |coa| coa.add_account(parent, new, strict).cloned())
    }

    /// Creates an account with a generated code (idempotent).
    pub fn create_account(
        &self,
        chart: &str,
        req: CreateAccountRequest,
    ) -> Result<CreatedAccount, LedgerError> {
        let created = self.modify(chart, |coa| coa.create_account(req, &self.config))?;
        if created.created {
            info!(
                chart,
                code = %created.account.code,
                bridges = created.bridges.len(),
                "Account created"
            );
        }
        Ok(created)
    }

    /// Final accounts at or below `code`.
    pub fn final_descendants(&self, chart: &str, code: &str) -> Result<Vec<Account>, LedgerError> {
        Ok(self
            .chart(chart)?
            .final_descendants(code)?
            .into_iter()
            .cloned()
            .collect())
    }

    fn modify<T>(
        &self,
        chart: &str,
        f: impl FnOnce(&mut ChartOfAccounts) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut charts = self.charts.write().unwrap_or_else(PoisonError::into_inner);
        let entry = charts
            .get_mut(chart)
            .ok_or_else(|| LedgerError::ChartNotFound(chart.to_string()))?;
        let mut draft = (**entry).clone();
        let out = f(&mut draft)?;
        *entry = Arc::new(draft);
        Ok(out)
    }
}
