//! Transaction limit definitions.

use std::fmt;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use minigl_shared::types::{CurrencyCode, LimitId, ProfileId, TransactionRef};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a movement from the customer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Money leaving the customer.
    Debit,
    /// Money reaching the customer.
    Credit,
}

/// Which ceiling a limit decision refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    /// Per-transaction minimum.
    MinTransaction,
    /// Per-transaction maximum.
    MaxTransaction,
    /// Aggregate since local midnight.
    MaxDaily,
    /// Aggregate since the limit started.
    Cumulative,
    /// Balance after the transaction.
    MaxAccountBalance,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MinTransaction => "min_transaction",
            Self::MaxTransaction => "max_transaction",
            Self::MaxDaily => "max_daily",
            Self::Cumulative => "cumulative",
            Self::MaxAccountBalance => "max_account_balance",
        })
    }
}

/// Scope of a limit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LimitKey {
    /// Limit profile.
    pub profile_id: ProfileId,
    /// Business transaction type.
    pub transaction_type: String,
    /// Currency.
    pub currency: CurrencyCode,
}

/// A time-bounded set of ceilings for one [`LimitKey`].
///
/// Every ceiling is optional; an absent ceiling never rejects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLimit {
    /// Row id.
    pub id: LimitId,
    /// Limit profile.
    pub profile_id: ProfileId,
    /// Business transaction type.
    pub transaction_type: String,
    /// Currency.
    pub currency: CurrencyCode,
    /// First instant the limit applies.
    pub start: DateTime<Utc>,
    /// Instant the limit stops applying; open-ended when `None`.
    pub expiry: Option<DateTime<Utc>>,
    /// Time zone of daily window boundaries.
    pub time_zone: Tz,
    /// Debits allowed per local day.
    pub max_daily_debit: Option<Decimal>,
    /// Credits allowed per local day.
    pub max_daily_credit: Option<Decimal>,
    /// Debits allowed since `start`.
    pub cumulative_debit: Option<Decimal>,
    /// Credits allowed since `start`.
    pub cumulative_credit: Option<Decimal>,
    /// Smallest debit allowed.
    pub min_transaction_debit: Option<Decimal>,
    /// Largest debit allowed.
    pub max_transaction_debit: Option<Decimal>,
    /// Smallest credit allowed.
    pub min_transaction_credit: Option<Decimal>,
    /// Largest credit allowed.
    pub max_transaction_credit: Option<Decimal>,
    /// Largest balance the limited account may reach.
    pub max_account_balance: Option<Decimal>,
}

impl TransactionLimit {
    /// A limit with no ceilings, starting at `start`, in UTC.
    #[must_use]
    pub fn new(
        profile_id: ProfileId,
        transaction_type: &str,
        currency: CurrencyCode,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LimitId::new(),
            profile_id,
            transaction_type: transaction_type.to_string(),
            currency,
            start,
            expiry: None,
            time_zone: Tz::UTC,
            max_daily_debit: None,
            max_daily_credit: None,
            cumulative_debit: None,
            cumulative_credit: None,
            min_transaction_debit: None,
            max_transaction_debit: None,
            min_transaction_credit: None,
            max_transaction_credit: None,
            max_account_balance: None,
        }
    }

    /// Scope of the limit.
    #[must_use]
    pub fn key(&self) -> LimitKey {
        LimitKey {
            profile_id: self.profile_id,
            transaction_type: self.transaction_type.clone(),
            currency: self.currency,
        }
    }

    /// Returns true if the limit applies at `at` (start inclusive, expiry
    /// exclusive).
    #[must_use]
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && self.expiry.is_none_or(|expiry| at < expiry)
    }

    /// Returns true if the validity windows of both limits intersect.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        let ends_after_other_starts = self.expiry.is_none_or(|expiry| expiry > other.start);
        let other_ends_after_start = other.expiry.is_none_or(|expiry| expiry > self.start);
        ends_after_other_starts && other_ends_after_start
    }

    /// Ceilings applying to `direction`.
    #[must_use]
    pub fn ceilings(&self, direction: Direction) -> Ceilings {
        match direction {
            Direction::Debit => Ceilings {
                min_transaction: self.min_transaction_debit,
                max_transaction: self.max_transaction_debit,
                max_daily: self.max_daily_debit,
                cumulative: self.cumulative_debit,
            },
            Direction::Credit => Ceilings {
                min_transaction: self.min_transaction_credit,
                max_transaction: self.max_transaction_credit,
                max_daily: self.max_daily_credit,
                cumulative: self.cumulative_credit,
            },
        }
    }
}

/// Ceilings of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ceilings {
    /// Per-transaction minimum.
    pub min_transaction: Option<Decimal>,
    /// Per-transaction maximum.
    pub max_transaction: Option<Decimal>,
    /// Daily aggregate.
    pub max_daily: Option<Decimal>,
    /// Aggregate since start.
    pub cumulative: Option<Decimal>,
}

/// A proposed movement to check against limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitRequest {
    /// Transaction reserving the usage.
    pub reference: TransactionRef,
    /// Limit profile.
    pub profile_id: ProfileId,
    /// Business transaction type.
    pub transaction_type: String,
    /// Currency.
    pub currency: CurrencyCode,
    /// Positive amount.
    pub amount: Decimal,
    /// Direction.
    pub direction: Direction,
    /// Balance of the limited account if the movement is applied.
    pub projected_balance: Option<Decimal>,
    /// Instant of the request, captured once.
    pub now: DateTime<Utc>,
}

impl LimitRequest {
    /// Scope of the request.
    #[must_use]
    pub fn key(&self) -> LimitKey {
        LimitKey {
            profile_id: self.profile_id,
            transaction_type: self.transaction_type.clone(),
            currency: self.currency,
        }
    }
}

/// Usage reserved against a limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Limit reserved against.
    pub limit_id: LimitId,
    /// Transaction holding the reservation.
    pub reference: TransactionRef,
    /// Direction.
    pub direction: Direction,
    /// Amount.
    pub amount: Decimal,
    /// When the usage happened.
    pub at: DateTime<Utc>,
}

/// Outcome of a limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    /// Movement allowed; `reservation` is `None` when no limit applies.
    Allowed {
        /// Usage recorded against the limit.
        reservation: Option<Reservation>,
    },
    /// Movement rejected.
    Rejected {
        /// Ceiling hit.
        kind: LimitKind,
        /// Configured ceiling.
        limit: Decimal,
        /// Value that would have resulted.
        attempted: Decimal,
    },
}

impl LimitDecision {
    /// Returns true for `Allowed`.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}
