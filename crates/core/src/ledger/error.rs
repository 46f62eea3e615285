//! Ledger error types for validation, posting and state errors.
//!
//! Every failure the chart store, journal store, snapshot cache, limit engine
//! and posting engine can report to a caller is a variant here. Variants carry
//! a stable `error_code()` so transports can map them without string matching.

use chrono::NaiveDate;
use minigl_shared::AppError;
use minigl_shared::types::{CurrencyCode, TransactionRef};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::limits::LimitKind;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Transaction must have at least one entry.
    #[error("Transaction must have at least one entry")]
    InsufficientEntries,

    /// Entry amount is zero, negative or finer than the currency allows.
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount {
        /// Offending amount.
        amount: Decimal,
        /// Why it was rejected.
        reason: String,
    },

    /// Currency of an account or entry does not match what is required.
    #[error("Currency mismatch on {account}: expected {expected}, got {actual}")]
    CurrencyMismatch {
        /// Account code involved.
        account: String,
        /// Currency required.
        expected: CurrencyCode,
        /// Currency found.
        actual: CurrencyCode,
    },

    /// Currency is not known to the registry.
    #[error("Unknown currency: {0}")]
    UnknownCurrency(CurrencyCode),

    /// Postings must target final accounts.
    #[error("Account {0} is a composite account and cannot be posted to")]
    NotFinalAccount(String),

    /// Layer is not declared by the journal.
    #[error("Layer {layer} is not declared by journal {journal}")]
    LayerNotDeclared {
        /// Journal name.
        journal: String,
        /// Layer id requested.
        layer: u32,
    },

    /// Entry metadata names a layer kind that does not exist.
    #[error("Unknown layer: {0}")]
    UnknownLayer(String),

    // ========== Chart Errors ==========
    /// Chart of accounts not found.
    #[error("Chart not found: {0}")]
    ChartNotFound(String),

    /// A chart with this code already exists.
    #[error("Chart already exists: {0}")]
    DuplicateChart(String),

    /// Account not found in the chart.
    #[error("Account {code} not found in chart {chart}")]
    AccountNotFound {
        /// Chart code.
        chart: String,
        /// Account code.
        code: String,
    },

    /// Account code is already used in the chart.
    #[error("Account code already exists: {0}")]
    DuplicateAccountCode(String),

    /// Parent is missing or is not a composite account.
    #[error("Invalid parent account: {0}")]
    InvalidParent(String),

    /// Account type differs from its parent's type.
    #[error("Account {code} must have the same type as parent {parent}")]
    AccountTypeMismatch {
        /// Account code.
        code: String,
        /// Parent code.
        parent: String,
    },

    /// Account code does not extend its parent's code.
    #[error("Account code {code} must start with parent code {parent}")]
    InvalidAccountCode {
        /// Account code.
        code: String,
        /// Parent code.
        parent: String,
    },

    // ========== Journal Errors ==========
    /// No journal covers the chart and date.
    #[error("No journal for chart {chart} on {date}")]
    JournalNotFound {
        /// Chart code.
        chart: String,
        /// Posting date.
        date: NaiveDate,
    },

    /// Journal is closed for posting.
    #[error("Journal {0} is closed")]
    JournalClosed(String),

    /// A journal with this name already exists.
    #[error("Journal already exists: {0}")]
    DuplicateJournal(String),

    /// Rule id is not registered.
    #[error("Unknown rule: {0}")]
    UnknownRule(String),

    // ========== Posting Errors ==========
    /// A journal rule rejected the transaction.
    #[error("Rule {rule} rejected transaction: {reason}")]
    RuleViolation {
        /// Rule display name.
        rule: String,
        /// Rule-specific reason.
        reason: String,
    },

    /// A transaction limit rejected the transaction.
    #[error("Limit {kind} exceeded: limit {limit}, attempted {attempted}")]
    LimitExceeded {
        /// Which ceiling was hit.
        kind: LimitKind,
        /// Configured ceiling.
        limit: Decimal,
        /// Amount (or aggregate) that would have resulted.
        attempted: Decimal,
    },

    // ========== Transaction State Errors ==========
    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionRef),

    /// Transaction has already been reversed.
    #[error("Transaction {0} has already been reversed")]
    AlreadyReversed(TransactionRef),

    /// A posting with the same reference is in flight.
    #[error("Transaction {0} is already being processed")]
    DuplicateReference(TransactionRef),

    /// Completion requested for a transaction that is not pending.
    #[error("Transaction {0} is not pending")]
    TransactionNotPending(TransactionRef),

    // ========== Concurrency Errors ==========
    /// Snapshot version conflict persisted after all retries.
    #[error("Concurrent modification detected, please retry")]
    ConcurrentModification,

    // ========== Infrastructure Errors ==========
    /// Durable store failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientEntries => "INSUFFICIENT_ENTRIES",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::UnknownCurrency(_) => "UNKNOWN_CURRENCY",
            Self::NotFinalAccount(_) => "NOT_FINAL_ACCOUNT",
            Self::LayerNotDeclared { .. } => "LAYER_NOT_DECLARED",
            Self::UnknownLayer(_) => "UNKNOWN_LAYER",
            Self::ChartNotFound(_) => "CHART_NOT_FOUND",
            Self::DuplicateChart(_) => "DUPLICATE_CHART",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::DuplicateAccountCode(_) => "DUPLICATE_ACCOUNT_CODE",
            Self::InvalidParent(_) => "INVALID_PARENT",
            Self::AccountTypeMismatch { .. } => "ACCOUNT_TYPE_MISMATCH",
            Self::InvalidAccountCode { .. } => "INVALID_ACCOUNT_CODE",
            Self::JournalNotFound { .. } => "JOURNAL_NOT_FOUND",
            Self::JournalClosed(_) => "JOURNAL_CLOSED",
            Self::DuplicateJournal(_) => "DUPLICATE_JOURNAL",
            Self::UnknownRule(_) => "UNKNOWN_RULE",
            Self::RuleViolation { .. } => "RULE_VIOLATION",
            Self::LimitExceeded { .. } => "LIMIT_EXCEEDED",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::AlreadyReversed(_) => "ALREADY_REVERSED",
            Self::DuplicateReference(_) => "DUPLICATE_REFERENCE",
            Self::TransactionNotPending(_) => "TRANSACTION_NOT_PENDING",
            Self::ConcurrentModification => "CONCURRENT_MODIFICATION",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - validation errors
            Self::InsufficientEntries
            | Self::InvalidAmount { .. }
            | Self::CurrencyMismatch { .. }
            | Self::UnknownCurrency(_)
            | Self::NotFinalAccount(_)
            | Self::LayerNotDeclared { .. }
            | Self::UnknownLayer(_)
            | Self::InvalidParent(_)
            | Self::AccountTypeMismatch { .. }
            | Self::InvalidAccountCode { .. }
            | Self::UnknownRule(_) => 400,

            // 404 Not Found
            Self::ChartNotFound(_)
            | Self::AccountNotFound { .. }
            | Self::JournalNotFound { .. }
            | Self::TransactionNotFound(_) => 404,

            // 409 Conflict
            Self::DuplicateChart(_)
            | Self::DuplicateAccountCode(_)
            | Self::DuplicateJournal(_)
            | Self::AlreadyReversed(_)
            | Self::DuplicateReference(_)
            | Self::ConcurrentModification => 409,

            // 422 Unprocessable - business rules
            Self::JournalClosed(_)
            | Self::RuleViolation { .. }
            | Self::LimitExceeded { .. }
            | Self::TransactionNotPending(_) => 422,

            // 500 Internal Server Error
            Self::Persistence(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentModification | Self::DuplicateReference(_)
        )
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = format!("{}: {err}", err.error_code());
        match err.http_status_code() {
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            422 => Self::BusinessRule(message),
            400 => Self::Validation(message),
            _ if matches!(err, LedgerError::Persistence(_)) => Self::Persistence(message),
            _ => Self::Internal(message),
        }
    }
}
