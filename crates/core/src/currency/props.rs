//! Property-based tests for currency precision.

use proptest::prelude::*;
use rust_decimal::Decimal;

use super::service::CurrencyService;

/// Strategy to generate signed amounts with up to six fraction digits.
fn any_amount() -> impl Strategy<Value = Decimal> {
    (-1_000_000_000i64..1_000_000_000i64, 0u32..=6).prop_map(|(n, scale)| Decimal::new(n, scale))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Rounding to a currency's precision always produces an amount the
    /// currency accepts.
    #[test]
    fn prop_rounded_amount_fits_precision(amount in any_amount(), places in 0u32..=4) {
        let rounded = CurrencyService::round(amount, places);
        prop_assert!(CurrencyService::fits_precision(rounded, places));
    }

    /// Rounding never moves a value by more than half a unit of the last place.
    #[test]
    fn prop_rounding_error_is_bounded(amount in any_amount(), places in 0u32..=4) {
        let rounded = CurrencyService::round(amount, places);
        let half_unit = Decimal::new(5, places + 1);
        prop_assert!((rounded - amount).abs() <= half_unit);
    }

    /// Amounts that already fit are left untouched.
    #[test]
    fn prop_fitting_amount_is_fixed_point(cents in -100_000_000i64..100_000_000i64) {
        let amount = Decimal::new(cents, 2);
        prop_assert_eq!(CurrencyService::round(amount, 2), amount);
    }
}
