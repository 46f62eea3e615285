//! Account definitions.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use minigl_shared::types::CurrencyCode;
use serde::{Deserialize, Serialize};

use crate::ledger::balance::NormalBalance;

/// Tag marking an account as a bridge account, exempt from the
/// parent-currency check.
pub const BRIDGE_TAG: &str = "bridge";

/// Account classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Asset account.
    Asset,
    /// Liability account.
    Liability,
    /// Equity account.
    Equity,
    /// Revenue account.
    Revenue,
    /// Expense account.
    Expense,
}

impl AccountType {
    /// Normal balance side for this type.
    #[must_use]
    pub const fn normal_balance(self) -> NormalBalance {
        match self {
            Self::Asset | Self::Expense => NormalBalance::DebitNormal,
            Self::Liability | Self::Equity | Self::Revenue => NormalBalance::CreditNormal,
        }
    }
}

/// Whether an account aggregates children or holds balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AccountKind {
    /// Aggregating account; never posted to directly.
    Composite {
        /// Child account codes, in insertion order.
        children: Vec<String>,
    },
    /// Leaf account; snapshots exist only for these.
    Final,
}

/// A node of the chart of accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Code, unique within the chart.
    pub code: String,
    /// Human readable description.
    pub description: String,
    /// Account type.
    pub account_type: AccountType,
    /// Currency, when the account pins one.
    pub currency: Option<CurrencyCode>,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last date postings are accepted.
    pub expiration: Option<NaiveDate>,
    /// Parent code; `None` for top-level accounts under the chart root.
    pub parent: Option<String>,
    /// Free-form tags (e.g. [`BRIDGE_TAG`]).
    pub tags: BTreeSet<String>,
    /// Free-form metadata.
    pub metadata: BTreeMap<String, String>,
    /// Composite or final.
    pub kind: AccountKind,
}

impl Account {
    /// Returns true for final (leaf) accounts.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self.kind, AccountKind::Final)
    }

    /// Returns true for bridge accounts.
    #[must_use]
    pub fn is_bridge(&self) -> bool {
        self.tags.contains(BRIDGE_TAG)
    }

    /// Child codes; empty for final accounts.
    #[must_use]
    pub fn children(&self) -> &[String] {
        match &self.kind {
            AccountKind::Composite { children } => children,
            AccountKind::Final => &[],
        }
    }

    /// Returns true if postings dated `date` are past the expiration.
    #[must_use]
    pub fn is_expired_on(&self, date: NaiveDate) -> bool {
        self.expiration.is_some_and(|expiration| date > expiration)
    }
}

/// Input for adding an account with an explicit code.
#[derive(Debug, Clone)]
pub struct NewAccount {
    /// Code.
    pub code: String,
    /// Description.
    pub description: String,
    /// Type.
    pub account_type: AccountType,
    /// Currency; inherited from the parent chain when `None`.
    pub currency: Option<CurrencyCode>,
    /// Expiration date.
    pub expiration: Option<NaiveDate>,
    /// Tags.
    pub tags: BTreeSet<String>,
    /// Metadata.
    pub metadata: BTreeMap<String, String>,
    /// Create a composite instead of a final account.
    pub composite: bool,
}

impl NewAccount {
    /// A final account with no currency override.
    #[must_use]
    pub fn final_account(code: &str, description: &str, account_type: AccountType) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            account_type,
            currency: None,
            expiration: None,
            tags: BTreeSet::new(),
            metadata: BTreeMap::new(),
            composite: false,
        }
    }

    /// A composite account with no currency override.
    #[must_use]
    pub fn composite(code: &str, description: &str, account_type: AccountType) -> Self {
        Self {
            composite: true,
            ..Self::final_account(code, description, account_type)
        }
    }

    /// Sets the currency.
    #[must_use]
    pub fn with_currency(mut self, currency: CurrencyCode) -> Self {
        self.currency = Some(currency);
        self
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.insert(tag.to_string());
        self
    }

    /// Sets the expiration date.
    #[must_use]
    pub fn with_expiration(mut self, expiration: NaiveDate) -> Self {
        self.expiration = Some(expiration);
        self
    }
}

/// Inbound request to create an account with a generated code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccountRequest {
    /// Currency of the new account.
    pub currency: CurrencyCode,
    /// Description; together with the currency, the idempotency key.
    pub name: String,
    /// Parent composite code.
    pub parent: String,
    /// Zero padding of the generated suffix; config default when absent.
    #[serde(default)]
    pub padding: Option<usize>,
    /// Create a final account (and its bridge companions).
    #[serde(rename = "final")]
    pub final_account: bool,
    /// Account type.
    #[serde(rename = "type")]
    pub account_type: AccountType,
    /// Metadata copied onto the account.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Outcome of an account creation request.
#[derive(Debug, Clone)]
pub struct CreatedAccount {
    /// The requested account (new or pre-existing).
    pub account: Account,
    /// Bridge companions created alongside it.
    pub bridges: Vec<Account>,
    /// False when the request matched an existing account.
    pub created: bool,
}
