//! Double-entry posting.
//!
//! This module implements the transaction side of the ledger:
//! - Request, posting and record types
//! - Amount validation and layer balancing
//! - The posting engine (post, reverse, complete, balance queries)
//! - The transaction log and event seams
//! - Error types for ledger operations

pub mod balance;
pub mod engine;
pub mod error;
pub mod events;
pub mod movement;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
mod engine_props;
#[cfg(test)]
mod validation_props;

pub use balance::{NormalBalance, RunningBalance, Side};
pub use engine::{LedgerPorts, PostingEngine};
pub use error::LedgerError;
pub use events::{EventPublisher, InMemoryEventBus, LedgerEvent, PublishError};
pub use store::{InMemoryTransactionStore, TransactionStore};
pub use types::{
    CreateTransactionRequest, CreateTransactionResponse, EntryKind, EntryRequest, LimitContext,
    Metadata, Posting, PostingResult, TransactionRecord, TransactionStatus,
};
