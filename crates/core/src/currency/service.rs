//! Rounding and precision checks for ledger amounts.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;

/// Stateless helpers for currency precision.
///
/// Rounding uses Banker's Rounding (MidpointNearestEven) so repeated
/// rounding does not drift in one direction.
pub struct CurrencyService;

impl CurrencyService {
    /// Round a decimal value using Banker's Rounding.
    ///
    /// - Rounds 2.5 → 2 (to nearest even)
    /// - Rounds 3.5 → 4 (to nearest even)
    /// - Rounds 2.25 → 2.2 (to nearest even at 1 decimal)
    #[must_use]
    pub fn round(value: Decimal, decimal_places: u32) -> Decimal {
        value.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointNearestEven)
    }

    /// Returns true when `value` carries no more significant fraction digits
    /// than `decimal_places`.
    ///
    /// Trailing zeros are ignored, so `10.500` fits a two-digit currency.
    #[must_use]
    pub fn fits_precision(value: Decimal, decimal_places: u32) -> bool {
        value.normalize().scale() <= decimal_places
    }

    /// Rescales `value` to exactly `decimal_places` fraction digits.
    ///
    /// Callers must check [`Self::fits_precision`] first when silent rounding
    /// is not acceptable.
    #[must_use]
    pub fn to_scale(value: Decimal, decimal_places: u32) -> Decimal {
        let mut rounded = Self::round(value, decimal_places);
        rounded.rescale(decimal_places);
        rounded
    }
}
