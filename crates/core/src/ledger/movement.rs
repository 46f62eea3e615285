//! Turning entries into account movements.

use minigl_shared::types::{CurrencyCode, TransactionRef};
use rust_decimal::Decimal;
use tracing::debug;

use super::balance::Side;
use super::types::{EntryRequest, Posting};
use crate::chart::Account;

/// The debit and credit postings of one entry.
#[must_use]
pub fn entry_postings(
    entry_index: usize,
    entry: &EntryRequest,
    debit: &Account,
    credit: &Account,
    layer: u32,
    currency: CurrencyCode,
) -> [Posting; 2] {
    [
        posting(entry_index, entry, debit, Side::Debit, layer, currency),
        posting(entry_index, entry, credit, Side::Credit, layer, currency),
    ]
}

fn posting(
    entry_index: usize,
    entry: &EntryRequest,
    account: &Account,
    side: Side,
    layer: u32,
    currency: CurrencyCode,
) -> Posting {
    Posting {
        entry_index,
        account: account.code.clone(),
        layer,
        side,
        amount: entry.amount,
        impact: account
            .account_type
            .normal_balance()
            .impact(side, entry.amount),
        kind: entry.kind(),
        currency,
    }
}

/// Sum of the impacts on `account` and `layer`.
#[must_use]
pub fn net_impact(postings: &[Posting], account: &str, layer: u32) -> Decimal {
    postings
        .iter()
        .filter(|posting| posting.account == account && posting.layer == layer)
        .map(|posting| posting.impact)
        .sum()
}

/// Entries of a reversal: every debit becomes a credit and vice versa.
#[must_use]
pub fn swapped_entries(entries: &[EntryRequest]) -> Vec<EntryRequest> {
    entries
        .iter()
        .map(|entry| EntryRequest {
            debit_account: entry.credit_account.clone(),
            credit_account: entry.debit_account.clone(),
            ..entry.clone()
        })
        .collect()
}

/// Dumps the postings of a transaction at debug level.
pub fn log_movements(reference: TransactionRef, journal: &str, postings: &[Posting]) {
    for posting in postings {
        debug!(
            %reference,
            journal,
            account = %posting.account,
            layer = posting.layer,
            side = ?posting.side,
            amount = %posting.amount,
            impact = %posting.impact,
            "Movement"
        );
    }
}
