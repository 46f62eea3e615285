//! Chart of accounts management.
//!
//! - Account definitions (composite and final accounts)
//! - The per-tenant account tree with its structural checks
//! - A store of charts shared by the posting engine

pub mod store;
pub mod tree;
pub mod types;

pub use store::ChartStore;
pub use tree::ChartOfAccounts;
pub use types::{
    Account, AccountKind, AccountType, BRIDGE_TAG, CreateAccountRequest, CreatedAccount, NewAccount,
};
