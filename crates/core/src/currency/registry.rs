//! Currency lookup.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use minigl_shared::types::{CurrencyCode, Money};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::service::CurrencyService;
use crate::ledger::LedgerError;

/// Reference data for a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyInfo {
    /// ISO 4217 alphabetic code.
    pub code: CurrencyCode,
    /// ISO 4217 numeric code; base of the currency's layer ids.
    pub numeric_id: u32,
    /// Number of fraction digits amounts may carry.
    pub precision: u32,
    /// Display symbol.
    pub symbol: String,
    /// Human readable name.
    pub name: String,
}

impl CurrencyInfo {
    /// Creates currency reference data.
    #[must_use]
    pub fn new(code: CurrencyCode, numeric_id: u32, precision: u32, symbol: &str, name: &str) -> Self {
        Self {
            code,
            numeric_id,
            precision,
            symbol: symbol.to_string(),
            name: name.to_string(),
        }
    }

    /// Rounds `amount` to this currency's precision with Banker's Rounding.
    #[must_use]
    pub fn round(&self, amount: Decimal) -> Decimal {
        CurrencyService::to_scale(amount, self.precision)
    }

    /// Returns true if `amount` can be booked without rounding.
    #[must_use]
    pub fn accepts(&self, amount: Decimal) -> bool {
        CurrencyService::fits_precision(amount, self.precision)
    }

    /// Wraps `amount`, scaled to the currency precision.
    #[must_use]
    pub fn money(&self, amount: Decimal) -> Money {
        Money::new(self.round(amount), self.code)
    }
}

/// Source of currency reference data.
pub trait CurrencyRegistry: Send + Sync {
    /// Looks up a currency by code.
    fn lookup(&self, code: CurrencyCode) -> Option<CurrencyInfo>;
}

/// Resolves `code` or fails with `UnknownCurrency`.
pub fn resolve_currency(
    registry: &dyn CurrencyRegistry,
    code: CurrencyCode,
) -> Result<CurrencyInfo, LedgerError> {
    registry
        .lookup(code)
        .ok_or(LedgerError::UnknownCurrency(code))
}

/// Registry backed by a map, seeded with common ISO currencies.
#[derive(Debug, Default)]
pub struct InMemoryCurrencyRegistry {
    currencies: RwLock<HashMap<CurrencyCode, CurrencyInfo>>,
}

impl InMemoryCurrencyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding USD, EUR, GBP, JPY, NGN and IDR.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        let defaults = [
            ("USD", 840, 2, "$", "US Dollar"),
            ("EUR", 978, 2, "€", "Euro"),
            ("GBP", 826, 2, "£", "Pound Sterling"),
            ("JPY", 392, 0, "¥", "Yen"),
            ("NGN", 566, 2, "₦", "Naira"),
            ("IDR", 360, 2, "Rp", "Rupiah"),
        ];
        for (code, numeric, precision, symbol, name) in defaults {
            if let Ok(code) = code.parse() {
                registry.register(CurrencyInfo::new(code, numeric, precision, symbol, name));
            }
        }
        registry
    }

    /// Adds or replaces a currency.
    pub fn register(&self, info: CurrencyInfo) {
        self.currencies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.code, info);
    }
}

impl CurrencyRegistry for InMemoryCurrencyRegistry {
    fn lookup(&self, code: CurrencyCode) -> Option<CurrencyInfo> {
        self.currencies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&code)
            .cloned()
    }
}
