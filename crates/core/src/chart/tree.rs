//! Chart of accounts tree.
//!
//! Accounts are held in an arena keyed by code. Parent links are codes, so
//! walking up or down the tree never borrows across nodes. A new account is
//! always inserted as a leaf under an existing composite, which keeps the
//! structure acyclic.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use minigl_shared::LedgerConfig;
use minigl_shared::types::CurrencyCode;
use serde::{Deserialize, Serialize};

use super::types::{
    Account, AccountKind, AccountType, BRIDGE_TAG, CreateAccountRequest, CreatedAccount, NewAccount,
};
use crate::ledger::LedgerError;

/// A tenant's chart of accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartOfAccounts {
    /// Unique chart code.
    pub code: String,
    /// Description; journal names derive from it.
    pub description: String,
    /// Chart currency, inherited by top-level accounts.
    pub currency: CurrencyCode,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    accounts: HashMap<String, Account>,
    roots: Vec<String>,
}

impl ChartOfAccounts {
    /// Creates an empty chart.
    #[must_use]
    pub fn new(code: &str, description: &str, currency: CurrencyCode) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            currency,
            created: Utc::now(),
            accounts: HashMap::new(),
            roots: Vec::new(),
        }
    }

    /// Looks up an account by code.
    #[must_use]
    pub fn account(&self, code: &str) -> Option<&Account> {
        self.accounts.get(code)
    }

    /// Looks up an account or fails with `AccountNotFound`.
    pub fn resolve_account(&self, code: &str) -> Result<&Account, LedgerError> {
        self.account(code).ok_or_else(|| LedgerError::AccountNotFound {
            chart: self.code.clone(),
            code: code.to_string(),
        })
    }

    /// Top-level account codes.
    #[must_use]
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Number of accounts in the chart.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Returns true if the chart holds no accounts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Adds an account under `parent` (or the chart root when `None`).
    ///
    /// Rejects duplicate codes, non-composite parents, type changes below the
    /// root, codes that do not extend the parent's code when `strict_codes`
    /// is set, and currencies that differ from the parent's unless the account
    /// is tagged as a bridge.
    pub fn add_account(
        &mut self,
        parent: Option<&str>,
        new: NewAccount,
        strict_codes: bool,
    ) -> Result<&Account, LedgerError> {
        if new.code.is_empty() {
            return Err(LedgerError::InvalidAccountCode {
                code: new.code,
                parent: parent.unwrap_or_default().to_string(),
            });
        }
        if self.accounts.contains_key(&new.code) {
            return Err(LedgerError::DuplicateAccountCode(new.code));
        }

        let expected_currency = match parent {
            Some(parent_code) => {
                let parent_account = self
                    .account(parent_code)
                    .ok_or_else(|| LedgerError::InvalidParent(parent_code.to_string()))?;
                if parent_account.is_final() {
                    return Err(LedgerError::InvalidParent(parent_code.to_string()));
                }
                if strict_codes && !new.code.starts_with(parent_code) {
                    return Err(LedgerError::InvalidAccountCode {
                        code: new.code,
                        parent: parent_code.to_string(),
                    });
                }
                if parent_account.account_type != new.account_type {
                    return Err(LedgerError::AccountTypeMismatch {
                        code: new.code,
                        parent: parent_code.to_string(),
                    });
                }
                parent_account.currency
            }
            None => Some(self.currency),
        };

        let is_bridge = new.tags.contains(BRIDGE_TAG);
        if let (Some(expected), Some(actual)) = (expected_currency, new.currency) {
            if expected != actual && !is_bridge {
                return Err(LedgerError::CurrencyMismatch {
                    account: new.code,
                    expected,
                    actual,
                });
            }
        }

        let code = new.code.clone();
        let account = Account {
            code: new.code,
            description: new.description,
            account_type: new.account_type,
            currency: new.currency,
            created: Utc::now(),
            expiration: new.expiration,
            parent: parent.map(str::to_string),
            tags: new.tags,
            metadata: new.metadata,
            kind: if new.composite {
                AccountKind::Composite {
                    children: Vec::new(),
                }
            } else {
                AccountKind::Final
            },
        };

        match parent {
            Some(parent_code) => {
                if let Some(Account {
                    kind: AccountKind::Composite { children },
                    ..
                }) = self.accounts.get_mut(parent_code)
                {
                    children.push(code.clone());
                }
            }
            None => self.roots.push(code.clone()),
        }
        self.accounts.insert(code.clone(), account);
        self.resolve_account(&code)
    }

    /// Currency an account books in: its own, the nearest ancestor's, or the
    /// chart currency.
    pub fn effective_currency(&self, code: &str) -> Result<CurrencyCode, LedgerError> {
        let path = self.path_to_root(code)?;
        Ok(path
            .iter()
            .find_map(|account| account.currency)
            .unwrap_or(self.currency))
    }

    /// The account followed by its ancestors, nearest first.
    pub fn path_to_root(&self, code: &str) -> Result<Vec<&Account>, LedgerError> {
        let mut current = self.resolve_account(code)?;
        let mut path = vec![current];
        while let Some(parent) = current.parent.as_deref() {
            current = self.resolve_account(parent)?;
            path.push(current);
        }
        Ok(path)
    }

    /// Returns true if `code` is `ancestor` or lies below it.
    #[must_use]
    pub fn is_within(&self, code: &str, ancestor: &str) -> bool {
        self.path_to_root(code)
            .is_ok_and(|path| path.iter().any(|account| account.code == ancestor))
    }

    /// Final accounts at or below `code`, depth first.
    pub fn final_descendants(&self, code: &str) -> Result<Vec<&Account>, LedgerError> {
        let mut finals = Vec::new();
        let mut stack = vec![self.resolve_account(code)?];
        while let Some(account) = stack.pop() {
            match &account.kind {
                AccountKind::Final => finals.push(account),
                AccountKind::Composite { children } => {
                    for child in children.iter().rev() {
                        stack.push(self.resolve_account(child)?);
                    }
                }
            }
        }
        Ok(finals)
    }

    /// Next generated code under `parent`: the parent code followed by the
    /// highest numeric child suffix plus one, zero padded to `padding`.
    pub fn next_child_code(&self, parent: &str, padding: usize) -> Result<String, LedgerError> {
        let parent_account = self.resolve_account(parent)?;
        let next = parent_account
            .children()
            .iter()
            .filter_map(|child| child.strip_prefix(parent))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .map_or(1, |max| max + 1);
        Ok(format!("{parent}{next:0padding$}"))
    }

    /// Creates an account with a generated code.
    ///
    /// Idempotent on (description, currency): a matching account is returned
    /// with `created == false`. Final accounts also get
    /// `bridge-liabilities-{name}` and `bridge-assets-{name}` companions under
    /// the configured bridge composites, when those exist.
    pub fn create_account(
        &mut self,
        req: CreateAccountRequest,
        config: &LedgerConfig,
    ) -> Result<CreatedAccount, LedgerError> {
        if let Some(existing) = self
            .accounts
            .values()
            .find(|account| account.description == req.name && account.currency == Some(req.currency))
        {
            return Ok(CreatedAccount {
                account: existing.clone(),
                bridges: Vec::new(),
                created: false,
            });
        }

        let padding = req.padding.unwrap_or(config.default_padding);
        let code = self.next_child_code(&req.parent, padding)?;
        let mut new = if req.final_account {
            NewAccount::final_account(&code, &req.name, req.account_type)
        } else {
            NewAccount::composite(&code, &req.name, req.account_type)
        }
        .with_currency(req.currency);
        new.metadata = req.metadata;
        let account = self
            .add_account(Some(&req.parent), new, config.strict_account_codes)?
            .clone();

        let mut bridges = Vec::new();
        if req.final_account {
            for (container, prefix) in [
                (&config.bridge_liabilities_code, "bridge-liabilities"),
                (&config.bridge_assets_code, "bridge-assets"),
            ] {
                if let Some(bridge) =
                    self.add_bridge(container, &format!("{prefix}-{}", req.name), req.currency, padding)?
                {
                    bridges.push(bridge);
                }
            }
        }

        Ok(CreatedAccount {
            account,
            bridges,
            created: true,
        })
    }

    fn add_bridge(
        &mut self,
        container: &str,
        description: &str,
        currency: CurrencyCode,
        padding: usize,
    ) -> Result<Option<Account>, LedgerError> {
        let account_type: AccountType = match self.account(container) {
            Some(parent) if !parent.is_final() => parent.account_type,
            _ => return Ok(None),
        };
        let code = self.next_child_code(container, padding)?;
        let new = NewAccount::final_account(&code, description, account_type)
            .with_currency(currency)
            .with_tag(BRIDGE_TAG);
        Ok(Some(self.add_account(Some(container), new, true)?.clone()))
    }

    /// All accounts, in no particular order.
    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> CurrencyCode {
        "USD".parse().unwrap()
    }

    fn ngn() -> CurrencyCode {
        "NGN".parse().unwrap()
    }

    fn sample_chart() -> ChartOfAccounts {
        let mut chart = ChartOfAccounts::new("WALLETS", "wallets", usd());
        chart
            .add_account(None, NewAccount::composite("1", "assets", AccountType::Asset), true)
            .unwrap();
        chart
            .add_account(Some("1"), NewAccount::composite("11", "cash", AccountType::Asset), true)
            .unwrap();
        chart
            .add_account(Some("11"), NewAccount::final_account("1101", "bank", AccountType::Asset), true)
            .unwrap();
        chart
            .add_account(Some("11"), NewAccount::final_account("1102", "till", AccountType::Asset), true)
            .unwrap();
        chart
            .add_account(None, NewAccount::composite("2", "liabilities", AccountType::Liability), true)
            .unwrap();
        chart
    }

    #[test]
    fn test_add_and_resolve() {
        let chart = sample_chart();
        let bank = chart.resolve_account("1101").unwrap();
        assert!(bank.is_final());
        assert_eq!(bank.parent.as_deref(), Some("11"));
        assert_eq!(chart.roots(), ["1".to_string(), "2".to_string()]);
        assert_eq!(chart.account("11").unwrap().children().len(), 2);
    }

    #[test]
    fn test_resolve_missing_account() {
        let chart = sample_chart();
        let err = chart.resolve_account("9999").unwrap_err();
        assert!(matches!(err, LedgerError::AccountNotFound { code, .. } if code == "9999"));
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let mut chart = sample_chart();
        let err = chart
            .add_account(Some("11"), NewAccount::final_account("1101", "again", AccountType::Asset), true)
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateAccountCode(code) if code == "1101"));
    }

    #[test]
    fn test_parent_must_be_composite() {
        let mut chart = sample_chart();
        let err = chart
            .add_account(Some("1101"), NewAccount::final_account("110101", "x", AccountType::Asset), true)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidParent(_)));

        let err = chart
            .add_account(Some("77"), NewAccount::final_account("7701", "x", AccountType::Asset), true)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidParent(_)));
    }

    #[test]
    fn test_strict_codes_require_prefix() {
        let mut chart = sample_chart();
        let err = chart
            .add_account(Some("11"), NewAccount::final_account("1201", "x", AccountType::Asset), true)
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAccountCode { .. }));

        chart
            .add_account(Some("11"), NewAccount::final_account("1201", "x", AccountType::Asset), false)
            .unwrap();
    }

    #[test]
    fn test_type_must_match_parent() {
        let mut chart = sample_chart();
        let err = chart
            .add_account(Some("11"), NewAccount::final_account("1103", "x", AccountType::Liability), true)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountTypeMismatch { .. }));
    }

    #[test]
    fn test_currency_must_match_unless_bridge() {
        let mut chart = sample_chart();
        let err = chart
            .add_account(
                Some("11"),
                NewAccount::final_account("1103", "naira", AccountType::Asset).with_currency(ngn()),
                true,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::CurrencyMismatch { .. }));

        chart
            .add_account(
                Some("11"),
                NewAccount::final_account("1103", "naira", AccountType::Asset)
                    .with_currency(ngn())
                    .with_tag(BRIDGE_TAG),
                true,
            )
            .unwrap();
        assert_eq!(chart.effective_currency("1103").unwrap(), ngn());
    }

    #[test]
    fn test_effective_currency_inherits_chart() {
        let chart = sample_chart();
        assert_eq!(chart.effective_currency("1101").unwrap(), usd());
    }

    #[test]
    fn test_final_descendants_and_within() {
        let chart = sample_chart();
        let finals: Vec<_> = chart
            .final_descendants("1")
            .unwrap()
            .into_iter()
            .map(|account| account.code.clone())
            .collect();
        assert_eq!(finals, vec!["1101".to_string(), "1102".to_string()]);
        assert!(chart.is_within("1102", "1"));
        assert!(chart.is_within("1102", "1102"));
        assert!(!chart.is_within("1102", "2"));
    }

    #[test]
    fn test_create_account_generates_padded_code() {
        let mut chart = sample_chart();
        let config = LedgerConfig::default();
        let req = CreateAccountRequest {
            currency: usd(),
            name: "wallet-alice".into(),
            parent: "2".into(),
            padding: Some(4),
            final_account: true,
            account_type: AccountType::Liability,
            metadata: Default::default(),
        };

        let first = chart.create_account(req.clone(), &config).unwrap();
        assert!(first.created);
        assert_eq!(first.account.code, "20001");

        let again = chart.create_account(req.clone(), &config).unwrap();
        assert!(!again.created);
        assert_eq!(again.account.code, "20001");

        let second = chart
            .create_account(
                CreateAccountRequest {
                    name: "wallet-bob".into(),
                    ..req
                },
                &config,
            )
            .unwrap();
        assert_eq!(second.account.code, "20002");
    }

    #[test]
    fn test_create_account_adds_bridges() {
        let mut chart = sample_chart();
        let config = LedgerConfig::default();
        chart
            .add_account(
                Some("2"),
                NewAccount::composite(&config.bridge_liabilities_code, "bridges", AccountType::Liability),
                false,
            )
            .unwrap();

        let created = chart
            .create_account(
                CreateAccountRequest {
                    currency: usd(),
                    name: "merchant-7".into(),
                    parent: "2".into(),
                    padding: None,
                    final_account: true,
                    account_type: AccountType::Liability,
                    metadata: Default::default(),
                },
                &config,
            )
            .unwrap();

        assert_eq!(created.bridges.len(), 1);
        let bridge = &created.bridges[0];
        assert_eq!(bridge.description, "bridge-liabilities-merchant-7");
        assert_eq!(bridge.code, "bridge-liabilities01");
        assert!(bridge.is_bridge());
    }
}
