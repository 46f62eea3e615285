//! Currency registry and amount precision handling.
//!
//! The ledger never converts between currencies. It only needs to know, for
//! each currency code, the precision amounts must respect and the ISO numeric
//! id that anchors the currency's layer ids.

pub mod registry;
pub mod service;

#[cfg(test)]
mod props;

pub use registry::{CurrencyInfo, CurrencyRegistry, InMemoryCurrencyRegistry, resolve_currency};
pub use service::CurrencyService;
