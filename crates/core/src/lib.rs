//! Core ledger logic for minigl.
//!
//! This crate contains the whole posting engine with ZERO web or database
//! dependencies. Durable storage, limit configuration and event transport are
//! traits with in-memory implementations.
//!
//! # Modules
//!
//! - `chart` - Charts of accounts and the account tree
//! - `currency` - Currency precision and numeric ids
//! - `journal` - Journals, balance layers and posting rules
//! - `snapshot` - Locked, cached balance snapshots
//! - `limits` - Transaction limit checks and usage reservations
//! - `ledger` - The posting engine, transaction log and events
//! - `persistence` - Errors reported by store implementations

pub mod chart;
pub mod currency;
pub mod journal;
pub mod ledger;
pub mod limits;
pub mod persistence;
pub mod snapshot;

pub use ledger::{LedgerError, LedgerPorts, PostingEngine};
