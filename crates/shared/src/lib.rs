//! Shared types, errors, and configuration for the minigl ledger.
//!
//! This crate provides common types used across all other crates:
//! - Money and currency code types with decimal precision
//! - Typed IDs for type-safe entity references
//! - Application-wide error types
//! - Configuration management

pub mod config;
pub mod error;
pub mod types;

pub use config::{AppConfig, LedgerConfig, LoggingConfig};
pub use error::{AppError, AppResult};
