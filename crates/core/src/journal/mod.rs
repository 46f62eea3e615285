//! Journals, balance layers and posting rules.

pub mod rules;
pub mod store;
pub mod types;

pub use rules::{
    BalanceScope, BalanceView, CanPost, DoubleEntry, JournalRule, RuleContext, RuleRegistry,
};
pub use store::JournalStore;
pub use types::{
    BoundRule, Journal, JournalDefinition, JournalStatus, Layer, LayerKind, RuleDefinition,
};
