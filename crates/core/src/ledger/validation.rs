//! Validation run before any balance is touched.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use super::balance::Side;
use super::error::LedgerError;
use super::types::{EntryRequest, Posting};
use crate::currency::CurrencyInfo;

/// A transaction needs at least one entry.
///
/// # Errors
///
/// Returns `InsufficientEntries`.
pub fn require_entries(entries: &[EntryRequest]) -> Result<(), LedgerError> {
    if entries.is_empty() {
        return Err(LedgerError::InsufficientEntries);
    }
    Ok(())
}

/// Amounts must be strictly positive and fit the currency precision.
///
/// # Errors
///
/// Returns `InvalidAmount` with the reason.
pub fn validate_amount(amount: Decimal, currency: &CurrencyInfo) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: "amount must be positive".to_string(),
        });
    }
    if !currency.accepts(amount) {
        return Err(LedgerError::InvalidAmount {
            amount,
            reason: format!(
                "{} allows at most {} decimal places",
                currency.code, currency.precision
            ),
        });
    }
    Ok(())
}

/// Debit and credit totals per layer.
#[must_use]
pub fn layer_totals(postings: &[Posting]) -> BTreeMap<u32, (Decimal, Decimal)> {
    let mut totals: BTreeMap<u32, (Decimal, Decimal)> = BTreeMap::new();
    for posting in postings {
        let (debit, credit) = totals.entry(posting.layer).or_default();
        match posting.side {
            Side::Debit => *debit += posting.amount,
            Side::Credit => *credit += posting.amount,
        }
    }
    totals
}

/// Returns true if debits equal credits on every layer.
#[must_use]
pub fn is_balanced(postings: &[Posting]) -> bool {
    layer_totals(postings)
        .values()
        .all(|(debit, credit)| debit == credit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::InMemoryCurrencyRegistry;
    use crate::currency::CurrencyRegistry;
    use crate::ledger::types::EntryKind;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn currency(code: &str) -> CurrencyInfo {
        InMemoryCurrencyRegistry::with_defaults()
            .lookup(code.parse().unwrap())
            .unwrap()
    }

    #[rstest]
    #[case("USD", dec!(10.00), true)]
    #[case("USD", dec!(0.01), true)]
    #[case("USD", dec!(0.001), false)]
    #[case("USD", dec!(0), false)]
    #[case("USD", dec!(-5.00), false)]
    #[case("JPY", dec!(100), true)]
    #[case("JPY", dec!(100.5), false)]
    fn test_validate_amount(#[case] code: &str, #[case] amount: Decimal, #[case] ok: bool) {
        assert_eq!(validate_amount(amount, &currency(code)).is_ok(), ok);
    }

    #[test]
    fn test_trailing_zeros_fit_precision() {
        assert!(validate_amount(dec!(10.5000), &currency("USD")).is_ok());
    }

    #[test]
    fn test_empty_entries_rejected() {
        assert!(matches!(require_entries(&[]), Err(LedgerError::InsufficientEntries)));
        let entry = EntryRequest::new("ok", dec!(1.00), "201", "202");
        assert!(require_entries(&[entry]).is_ok());
    }

    #[test]
    fn test_invalid_amount_reason() {
        let err = validate_amount(dec!(1.005), &currency("USD")).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InvalidAmount { amount, ref reason }
                if amount == dec!(1.005) && reason.contains("2 decimal places")
        ));
    }

    #[test]
    fn test_layer_totals() {
        let posting = |layer, side, amount| Posting {
            entry_index: 0,
            account: "201".into(),
            layer,
            side,
            amount,
            impact: amount,
            kind: EntryKind::Amount,
            currency: "USD".parse().unwrap(),
        };
        let postings = vec![
            posting(840, Side::Debit, dec!(10)),
            posting(840, Side::Credit, dec!(10)),
            posting(1840, Side::Debit, dec!(3)),
        ];
        let totals = layer_totals(&postings);
        assert_eq!(totals[&840], (dec!(10), dec!(10)));
        assert_eq!(totals[&1840], (dec!(3), dec!(0)));
        assert!(!is_balanced(&postings));
        assert!(is_balanced(&postings[..2]));
    }
}
