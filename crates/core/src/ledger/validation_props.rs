//! Property-based tests for amount validation and layer balancing.

use proptest::prelude::*;
use rust_decimal::Decimal;

use super::balance::Side;
use super::types::{EntryKind, Posting};
use super::validation::{is_balanced, validate_amount};
use crate::currency::{CurrencyInfo, CurrencyRegistry, InMemoryCurrencyRegistry};

fn usd() -> CurrencyInfo {
    InMemoryCurrencyRegistry::with_defaults()
        .lookup("USD".parse().unwrap())
        .unwrap()
}

/// Amounts from 0.01 to 1,000,000.00.
fn positive_amount() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

fn pair(layer: u32, amount: Decimal) -> [Posting; 2] {
    let posting = |account: &str, side| Posting {
        entry_index: 0,
        account: account.to_string(),
        layer,
        side,
        amount,
        impact: amount,
        kind: EntryKind::Amount,
        currency: "USD".parse().unwrap(),
    };
    [posting("201", Side::Debit), posting("202", Side::Credit)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_positive_cents_accepted(amount in positive_amount()) {
        prop_assert!(validate_amount(amount, &usd()).is_ok());
    }

    #[test]
    fn prop_non_positive_rejected(cents in 0i64..100_000_000i64) {
        prop_assert!(validate_amount(Decimal::new(-cents, 2), &usd()).is_err());
    }

    #[test]
    fn prop_sub_cent_rejected(mills in 1i64..100_000_000i64) {
        prop_assume!(mills % 10 != 0);
        prop_assert!(validate_amount(Decimal::new(mills, 3), &usd()).is_err());
    }

    #[test]
    fn prop_entry_pairs_always_balance(
        amounts in prop::collection::vec((positive_amount(), prop_oneof![Just(840u32), Just(1840u32)]), 1..10)
    ) {
        let postings: Vec<Posting> = amounts
            .into_iter()
            .flat_map(|(amount, layer)| pair(layer, amount))
            .collect();
        prop_assert!(is_balanced(&postings));
    }

    #[test]
    fn prop_dropping_one_leg_unbalances(amount in positive_amount()) {
        let [debit, _] = pair(840, amount);
        prop_assert!(!is_balanced(&[debit]));
    }
}
