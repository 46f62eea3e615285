//! Journal, layer and rule definitions.

use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::rules::JournalRule;
use crate::chart::ChartOfAccounts;
use crate::currency::CurrencyInfo;

/// Kinds of balance layer a currency can have.
///
/// A layer id is the kind's offset plus the currency's ISO numeric id, so
/// USD available is 840 and USD pending is 1840.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Settled funds.
    Available,
    /// Funds of pending transactions.
    Pending,
    /// Credit extended to the account.
    CreditAllowance,
    /// Funds on hold.
    OnHold,
    /// Daily limit tracking.
    DailyLimit,
    /// Cumulative limit tracking.
    CumulativeLimit,
}

impl LayerKind {
    /// Every layer kind.
    pub const ALL: [Self; 6] = [
        Self::Available,
        Self::Pending,
        Self::CreditAllowance,
        Self::OnHold,
        Self::DailyLimit,
        Self::CumulativeLimit,
    ];

    /// Offset added to the currency numeric id.
    #[must_use]
    pub const fn offset(self) -> u32 {
        match self {
            Self::Available => 0,
            Self::Pending => 1000,
            Self::CreditAllowance => 2000,
            Self::OnHold => 3000,
            Self::DailyLimit => 4000,
            Self::CumulativeLimit => 5000,
        }
    }

    /// Layer id for `currency`.
    #[must_use]
    pub const fn layer_id(self, currency: &CurrencyInfo) -> u32 {
        self.offset() + currency.numeric_id
    }

    /// Stable name used in entry metadata and layer labels.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Pending => "pending",
            Self::CreditAllowance => "credit_allowance",
            Self::OnHold => "on_hold",
            Self::DailyLimit => "daily_limit",
            Self::CumulativeLimit => "cumulative_limit",
        }
    }

    /// Kind of `layer` when it belongs to `currency`.
    #[must_use]
    pub fn of_layer(layer: u32, currency: &CurrencyInfo) -> Option<Self> {
        let offset = layer.checked_sub(currency.numeric_id)?;
        Self::ALL.into_iter().find(|kind| kind.offset() == offset)
    }

    /// Parses a layer name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// A balance layer declared by a journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Layer id.
    pub id: u32,
    /// Label, e.g. `USD available`.
    pub name: String,
}

/// Journal lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalStatus {
    /// Accepting postings.
    Open,
    /// Rejecting postings.
    Closed,
}

/// Configuration of one rule attached to a journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Registry id of the implementation, e.g. `double-entry`.
    pub rule_id: String,
    /// Display name reported in violations.
    pub name: String,
    /// Restricts the rule to this account and its descendants.
    pub account: Option<String>,
    /// Layers the rule looks at; empty means the layers being posted to.
    pub layers: Vec<u32>,
    /// Rule parameter (e.g. a minimum balance).
    pub param: Option<String>,
    /// Skip the rule when posting reversals.
    pub reversal_exempt: bool,
}

impl RuleDefinition {
    /// A journal-wide rule without parameter.
    #[must_use]
    pub fn new(rule_id: &str, name: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            name: name.to_string(),
            account: None,
            layers: Vec::new(),
            param: None,
            reversal_exempt: false,
        }
    }

    /// Scopes the rule to an account subtree.
    #[must_use]
    pub fn for_account(mut self, account: &str) -> Self {
        self.account = Some(account.to_string());
        self
    }

    /// Restricts the rule to `layers`.
    #[must_use]
    pub fn on_layers(mut self, layers: &[u32]) -> Self {
        self.layers = layers.to_vec();
        self
    }

    /// Sets the parameter.
    #[must_use]
    pub fn with_param(mut self, param: impl ToString) -> Self {
        self.param = Some(param.to_string());
        self
    }

    /// Marks the rule as skipped for reversals.
    #[must_use]
    pub fn exempt_reversals(mut self) -> Self {
        self.reversal_exempt = true;
        self
    }
}

/// A rule definition bound to its implementation.
#[derive(Clone)]
pub struct BoundRule {
    /// Definition.
    pub definition: RuleDefinition,
    /// Implementation resolved from the registry.
    pub rule: Arc<dyn JournalRule>,
}

impl fmt::Debug for BoundRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRule")
            .field("definition", &self.definition)
            .finish_non_exhaustive()
    }
}

/// Journal as supplied by an administrator, before rules are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalDefinition {
    /// Chart code.
    pub chart: String,
    /// Journal name, `{chartDescription}-{year}`.
    pub name: String,
    /// First date of the journal period.
    pub start: NaiveDate,
    /// Last date of the journal period.
    pub end: NaiveDate,
    /// Status at creation.
    pub status: JournalStatus,
    /// Postings dated on or before this date are rejected.
    pub lock_date: Option<NaiveDate>,
    /// Declared layers.
    pub layers: Vec<Layer>,
    /// Rules, in declaration order.
    pub rules: Vec<RuleDefinition>,
}

impl JournalDefinition {
    /// An open journal covering calendar `year` of `chart`, with no layers
    /// or rules yet.
    #[must_use]
    pub fn for_year(chart: &ChartOfAccounts, year: i32) -> Self {
        let start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN);
        let end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX);
        Self {
            chart: chart.code.clone(),
            name: Journal::name_for(&chart.description, year),
            start,
            end,
            status: JournalStatus::Open,
            lock_date: None,
            layers: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Declares every layer kind of `currency`.
    #[must_use]
    pub fn with_currency_layers(mut self, currency: &CurrencyInfo) -> Self {
        for kind in LayerKind::ALL {
            self.layers.push(Layer {
                id: kind.layer_id(currency),
                name: format!("{} {}", currency.code, kind.name()),
            });
        }
        self
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }

    /// The year the journal covers.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.start.year()
    }
}

/// A journal with its rules resolved.
#[derive(Debug, Clone)]
pub struct Journal {
    /// Chart code.
    pub chart: String,
    /// Journal name.
    pub name: String,
    /// First date of the journal period.
    pub start: NaiveDate,
    /// Last date of the journal period.
    pub end: NaiveDate,
    /// Status.
    pub status: JournalStatus,
    /// Lock date.
    pub lock_date: Option<NaiveDate>,
    /// Declared layers.
    pub layers: Vec<Layer>,
    /// Journal-wide rules first, then account-scoped ones, each group in
    /// declaration order.
    pub rules: Vec<BoundRule>,
}

impl Journal {
    /// Journal name for a chart description and year.
    #[must_use]
    pub fn name_for(chart_description: &str, year: i32) -> String {
        format!("{chart_description}-{year}")
    }

    /// Returns true if the journal accepts postings.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == JournalStatus::Open
    }

    /// Returns true if `layer` is declared.
    #[must_use]
    pub fn declares(&self, layer: u32) -> bool {
        self.layers.iter().any(|declared| declared.id == layer)
    }

    /// Returns true if `date` falls in the journal period.
    #[must_use]
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// The year the journal covers.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.start.year()
    }
}
