//! Balance sign convention and running balances.
//!
//! A movement increases an account when it lands on the account's normal
//! side and decreases it otherwise:
//! - Asset/Expense: balance += debit - credit (debit-normal)
//! - Liability/Equity/Revenue: balance += credit - debit (credit-normal)

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of a double-entry movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Debit side.
    Debit,
    /// Credit side.
    Credit,
}

impl Side {
    /// Returns the other side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }
}

/// Normal balance of an account type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormalBalance {
    /// Debit-normal accounts (Asset, Expense)
    DebitNormal,
    /// Credit-normal accounts (Liability, Equity, Revenue)
    CreditNormal,
}

impl NormalBalance {
    /// The side that increases an account with this normal balance.
    #[must_use]
    pub const fn increasing_side(self) -> Side {
        match self {
            Self::DebitNormal => Side::Debit,
            Self::CreditNormal => Side::Credit,
        }
    }

    /// Signed effect of moving `amount` on `side`.
    #[must_use]
    pub fn impact(self, side: Side, amount: Decimal) -> Decimal {
        if side == self.increasing_side() {
            amount
        } else {
            -amount
        }
    }

    /// Calculates the balance change for debit and credit totals.
    #[must_use]
    pub fn calculate_balance_change(self, debit: Decimal, credit: Decimal) -> Decimal {
        match self {
            Self::DebitNormal => debit - credit,
            Self::CreditNormal => credit - debit,
        }
    }
}

/// Balance of one snapshot key before and after a posting.
///
/// `current_balance = previous_balance + impact` and `version` is the
/// snapshot row version written by the posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningBalance {
    /// Account code.
    pub account: String,
    /// Layer id.
    pub layer: u32,
    /// Snapshot version after this posting (monotonically increasing).
    pub version: u64,
    /// Balance before this posting.
    pub previous_balance: Decimal,
    /// Balance after this posting.
    pub current_balance: Decimal,
}

impl RunningBalance {
    /// Net change recorded by this running balance.
    #[must_use]
    pub fn change(&self) -> Decimal {
        self.current_balance - self.previous_balance
    }
}
