//! Domain types for transaction posting.
//!
//! This module contains the inbound request shape, the postings derived from
//! it, and the immutable transaction record kept in the transaction log.

use chrono::{DateTime, NaiveDate, Utc};
use minigl_shared::types::{CurrencyCode, Money, ProfileId, TransactionRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::balance::{RunningBalance, Side};
use crate::journal::LayerKind;
use crate::limits::Direction;

/// JSON metadata attached to transactions and entries.
pub type Metadata = serde_json::Map<String, Value>;

/// Entry metadata key holding the [`EntryKind`].
pub const META_ENTRY_TYPE: &str = "type";
/// Entry metadata key exempting the entry from limit checks.
pub const META_SKIP_LIMITS: &str = "skip_limits";
/// Entry metadata key naming the target [`LayerKind`].
pub const META_LAYER: &str = "layer";
/// Transaction metadata key holding the merchant id for events.
pub const META_MERCHANT_ID: &str = "merchant_id";
/// Response metadata key listing the accounts touched.
pub const META_ACCOUNT_IDS: &str = "account_ids";
/// Response metadata key holding the [`TransactionStatus`].
pub const META_STATUS: &str = "status";
/// Metadata key linking a reversal to the transaction it reverses.
pub const META_REVERSES: &str = "reverses";
/// Metadata key linking a completion to its pending transaction.
pub const META_COMPLETES: &str = "completes";

/// Kind of an entry, read from entry metadata `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Principal amount; the only kind checked against limits.
    Amount,
    /// Fee charged on the transaction.
    Fee,
    /// Value added tax.
    Vat,
    /// Commission.
    Commission,
    /// Rebate.
    Rebate,
}

impl EntryKind {
    /// Parses a kind name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "amount" => Some(Self::Amount),
            "fee" => Some(Self::Fee),
            "vat" => Some(Self::Vat),
            "commission" => Some(Self::Commission),
            "rebate" => Some(Self::Rebate),
            _ => None,
        }
    }
}

/// One balanced debit/credit pair of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    /// Free-text detail.
    pub detail: String,
    /// Positive amount, in the accounts' currency.
    pub amount: Decimal,
    /// Account debited.
    pub debit_account: String,
    /// Account credited.
    pub credit_account: String,
    /// Entry metadata (`type`, `skip_limits`, `layer`).
    #[serde(default)]
    pub metadata: Metadata,
}

impl EntryRequest {
    /// Creates an `amount` entry.
    #[must_use]
    pub fn new(detail: &str, amount: Decimal, debit_account: &str, credit_account: &str) -> Self {
        Self {
            detail: detail.to_string(),
            amount,
            debit_account: debit_account.to_string(),
            credit_account: credit_account.to_string(),
            metadata: Metadata::new(),
        }
    }

    /// Sets a metadata value.
    #[must_use]
    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Kind of the entry; unknown or missing values mean `amount`.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.metadata
            .get(META_ENTRY_TYPE)
            .and_then(Value::as_str)
            .and_then(EntryKind::parse)
            .unwrap_or(EntryKind::Amount)
    }

    /// Returns true if the entry opts out of limit checks.
    #[must_use]
    pub fn skip_limits(&self) -> bool {
        match self.metadata.get(META_SKIP_LIMITS) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Layer kind named in metadata, if any.
    ///
    /// `Err` carries the unrecognised name.
    pub fn layer_kind(&self) -> Result<Option<LayerKind>, String> {
        match self.metadata.get(META_LAYER).and_then(Value::as_str) {
            Some(name) => LayerKind::from_name(name)
                .map(Some)
                .ok_or_else(|| name.to_string()),
            None => Ok(None),
        }
    }
}

/// Limit evaluation context of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitContext {
    /// Limit profile of the customer.
    pub profile_id: ProfileId,
    /// Whether the customer is paying out (debit) or receiving (credit).
    pub direction: Direction,
}

/// Inbound request to post a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    /// Caller-supplied idempotency reference.
    pub reference: TransactionRef,
    /// Chart the accounts belong to.
    pub chart: String,
    /// Business transaction type (externally defined).
    #[serde(rename = "type")]
    pub transaction_type: String,
    /// Business transaction group (externally defined).
    pub group: String,
    /// Post to the pending layer.
    #[serde(default)]
    pub pending: bool,
    /// Limit context; absent means no limit checks.
    #[serde(default)]
    pub limit: Option<LimitContext>,
    /// Transaction metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Entries, each an independently balanced pair.
    pub entries: Vec<EntryRequest>,
    /// Back-dated posting date; today (UTC) when absent.
    #[serde(default)]
    pub post_date: Option<NaiveDate>,
}

impl CreateTransactionRequest {
    /// A request with no entries yet.
    #[must_use]
    pub fn new(reference: TransactionRef, chart: &str, transaction_type: &str, group: &str) -> Self {
        Self {
            reference,
            chart: chart.to_string(),
            transaction_type: transaction_type.to_string(),
            group: group.to_string(),
            pending: false,
            limit: None,
            metadata: Metadata::new(),
            entries: Vec::new(),
            post_date: None,
        }
    }

    /// Adds an entry.
    #[must_use]
    pub fn with_entry(mut self, entry: EntryRequest) -> Self {
        self.entries.push(entry);
        self
    }

    /// Marks the transaction pending.
    #[must_use]
    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }

    /// Sets the limit context.
    #[must_use]
    pub fn with_limit(mut self, profile_id: ProfileId, direction: Direction) -> Self {
        self.limit = Some(LimitContext {
            profile_id,
            direction,
        });
        self
    }

    /// Sets the posting date.
    #[must_use]
    pub fn on(mut self, post_date: NaiveDate) -> Self {
        self.post_date = Some(post_date);
        self
    }
}

/// Response returned to the caller after posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransactionResponse {
    /// Reference of the posted transaction.
    pub reference: TransactionRef,
    /// Request metadata enriched with `account_ids` and `status`.
    pub metadata: Metadata,
}

/// A single-account movement derived from an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Index of the entry in the record's entry list.
    pub entry_index: usize,
    /// Final account code.
    pub account: String,
    /// Layer id.
    pub layer: u32,
    /// Side moved.
    pub side: Side,
    /// Positive amount moved.
    pub amount: Decimal,
    /// Signed effect on the account balance.
    pub impact: Decimal,
    /// Kind of the originating entry.
    pub kind: EntryKind,
    /// Currency of the account.
    pub currency: CurrencyCode,
}

impl Posting {
    /// The movement that cancels this one.
    #[must_use]
    pub fn negated(&self) -> Self {
        Self {
            side: self.side.opposite(),
            impact: -self.impact,
            ..self.clone()
        }
    }
}

/// Outcome recorded for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    /// Balances were updated.
    Posted,
    /// The attempt failed; no balance changed.
    Failed,
}

impl TransactionStatus {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Posted => "POSTED",
            Self::Failed => "FAILED",
        }
    }
}

/// Immutable record of a posting attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Reference.
    pub reference: TransactionRef,
    /// Chart code.
    pub chart: String,
    /// Journal name; empty when the attempt failed before resolution.
    pub journal: String,
    /// Business type.
    pub transaction_type: String,
    /// Business group.
    pub group: String,
    /// Posted to the pending layer.
    pub pending: bool,
    /// Outcome.
    pub status: TransactionStatus,
    /// Effective posting date.
    pub post_date: NaiveDate,
    /// Wall-clock time of the attempt.
    pub timestamp: DateTime<Utc>,
    /// Entries as posted.
    pub entries: Vec<EntryRequest>,
    /// Derived postings.
    pub postings: Vec<Posting>,
    /// Running balances of every touched key.
    pub running_balances: Vec<RunningBalance>,
    /// Limit context, kept so reversals can release reservations.
    pub limit: Option<LimitContext>,
    /// Metadata as returned to the caller.
    pub metadata: Metadata,
    /// Original transaction, when this is a reversal.
    pub reverses: Option<TransactionRef>,
    /// Pending transaction, when this is a completion.
    pub completes: Option<TransactionRef>,
    /// Failure reason, when `status` is `Failed`.
    pub failure: Option<String>,
}

impl TransactionRecord {
    /// Returns true if the record updated balances.
    #[must_use]
    pub fn is_posted(&self) -> bool {
        self.status == TransactionStatus::Posted
    }

    /// Response view of the record.
    #[must_use]
    pub fn response(&self) -> CreateTransactionResponse {
        CreateTransactionResponse {
            reference: self.reference,
            metadata: self.metadata.clone(),
        }
    }

    /// First `amount` entry, which names the sender and recipient.
    #[must_use]
    pub fn principal_entry(&self) -> Option<&EntryRequest> {
        self.entries
            .iter()
            .find(|entry| entry.kind() == EntryKind::Amount)
            .or_else(|| self.entries.first())
    }
}

/// Result of posting, reversing or completing a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PostingResult {
    /// The transaction record.
    pub record: TransactionRecord,
    /// Balance of the sender (principal debit account) after posting.
    pub sender_balance: Option<Money>,
    /// Balance of the recipient (principal credit account) after posting.
    pub recipient_balance: Option<Money>,
    /// True when an earlier result was returned for a repeated reference.
    pub replayed: bool,
}

impl PostingResult {
    /// Response view.
    #[must_use]
    pub fn response(&self) -> CreateTransactionResponse {
        self.record.response()
    }
}
