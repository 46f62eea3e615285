//! End-to-end posting tests against the in-memory engine.

#![allow(clippy::items_after_statements)]

mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use common::*;
use minigl_core::LedgerError;
use minigl_core::journal::{LayerKind, RuleDefinition, RuleRegistry};
use minigl_core::ledger::{EntryRequest, InMemoryEventBus, LedgerEvent, TransactionStatus};
use minigl_core::ledger::types::{META_ENTRY_TYPE, META_LAYER, META_REVERSES};
use minigl_shared::types::{Money, TransactionRef};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn seed_a(engine: &minigl_core::PostingEngine, amount: Decimal) {
    engine.post_at(transfer(amount, A, CAPITAL), now()).unwrap();
}

#[test]
fn test_transfer_moves_balances() {
    let bus = Arc::new(InMemoryEventBus::new());
    let engine = engine_with_events(bus.clone());
    seed_a(&engine, dec!(100.00));
    let events = bus.subscribe();

    let req = transfer(dec!(30.00), B, A);
    let reference = req.reference;
    let result = engine.post_at(req, now()).unwrap();

    match events.try_recv().unwrap() {
        LedgerEvent::TransactionCompleted {
            reference: published,
            sender_account,
            recipient_account,
            amount,
            ..
        } => {
            assert_eq!(published, reference);
            assert_eq!(sender_account, B);
            assert_eq!(recipient_account, A);
            assert_eq!(amount, Money::new(dec!(30.00), usd()));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(events.try_recv().is_err());

    assert_eq!(result.record.status, TransactionStatus::Posted);
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(70.00));
    assert_eq!(balance(&engine, B, AVAILABLE), dec!(30.00));
    assert_eq!(result.recipient_balance, Some(Money::new(dec!(70.00), usd())));
    assert_eq!(
        engine.available_balance(CHART, "1", today()).unwrap(),
        Money::new(dec!(100.00), usd())
    );
}

#[test]
fn test_same_reference_is_idempotent() {
    let engine = engine();
    seed_a(&engine, dec!(100.00));
    let req = transfer(dec!(30.00), B, A);

    let first = engine.post_at(req.clone(), now()).unwrap();
    let second = engine.post_at(req, now()).unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.record, second.record);
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(70.00));
}

#[test]
fn test_failed_reference_can_be_retried() {
    let engine = engine();
    let mut req = transfer(dec!(30.00), B, A);
    req.post_date = Some(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
    assert!(matches!(
        engine.post_at(req.clone(), now()),
        Err(LedgerError::JournalNotFound { .. })
    ));
    assert_eq!(engine.transaction(req.reference).unwrap().status, TransactionStatus::Failed);

    req.post_date = Some(today());
    let retried = engine.post_at(req, now()).unwrap();
    assert!(!retried.replayed);
    assert!(retried.record.is_posted());
}

#[test]
fn test_reversal_restores_balances() {
    let engine = engine();
    seed_a(&engine, dec!(100.00));
    let posted = engine.post_at(transfer(dec!(30.00), B, A), now()).unwrap();

    let reversal = engine.reverse_at(posted.record.reference, now()).unwrap();

    assert_eq!(balance(&engine, A, AVAILABLE), dec!(100.00));
    assert_eq!(balance(&engine, B, AVAILABLE), dec!(0.00));
    assert_eq!(reversal.record.reverses, Some(posted.record.reference));
    assert_eq!(reversal.record.entries[0].debit_account, A);
    assert_eq!(
        reversal.record.metadata[META_REVERSES],
        posted.record.reference.to_string()
    );
    assert!(matches!(
        engine.reverse_at(posted.record.reference, now()),
        Err(LedgerError::AlreadyReversed(_))
    ));
}

#[test]
fn test_reverse_unknown_transaction() {
    let engine = engine();
    let reference = TransactionRef::new();
    assert!(matches!(
        engine.reverse_at(reference, now()),
        Err(LedgerError::TransactionNotFound(r)) if r == reference
    ));
}

#[test]
fn test_pending_then_complete() {
    let engine = engine();
    seed_a(&engine, dec!(100.00));
    let pending = engine
        .post_at(transfer(dec!(25.00), WALLET, A).pending(), now())
        .unwrap();
    assert_eq!(balance(&engine, A, PENDING), dec!(-25.00));
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(100.00));

    let completion = engine.complete_at(pending.record.reference, now()).unwrap();
    assert_eq!(completion.record.completes, Some(pending.record.reference));
    assert!(!completion.record.pending);
    assert_eq!(balance(&engine, A, PENDING), dec!(0.00));
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(75.00));
    assert_eq!(balance(&engine, WALLET, AVAILABLE), dec!(-25.00));

    let again = engine.complete_at(pending.record.reference, now()).unwrap();
    assert!(again.replayed);
    assert_eq!(again.record.reference, completion.record.reference);
}

#[test]
fn test_reversing_completed_pending_undoes_both() {
    let engine = engine();
    seed_a(&engine, dec!(100.00));
    let pending = engine
        .post_at(transfer(dec!(25.00), WALLET, A).pending(), now())
        .unwrap();
    engine.complete_at(pending.record.reference, now()).unwrap();

    engine.reverse_at(pending.record.reference, now()).unwrap();

    assert_eq!(balance(&engine, A, PENDING), dec!(0.00));
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(100.00));
    assert_eq!(balance(&engine, WALLET, AVAILABLE), dec!(0.00));
}

#[test]
fn test_reversing_completion_reverses_its_pending_original() {
    let engine = engine();
    let pending = engine
        .post_at(transfer(dec!(10.00), A, CAPITAL).pending(), now())
        .unwrap();
    let completion = engine.complete_at(pending.record.reference, now()).unwrap();
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(10.00));

    let reversal = engine.reverse_at(completion.record.reference, now()).unwrap();
    assert_eq!(reversal.record.reverses, Some(pending.record.reference));
    assert_eq!(balance(&engine, A, PENDING), dec!(0.00));
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(0.00));

    assert!(matches!(
        engine.reverse_at(pending.record.reference, now()),
        Err(LedgerError::AlreadyReversed(reference)) if reference == pending.record.reference
    ));
    assert!(matches!(
        engine.reverse_at(completion.record.reference, now()),
        Err(LedgerError::AlreadyReversed(_))
    ));
    assert_eq!(balance(&engine, A, PENDING), dec!(0.00));
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(0.00));
    assert_eq!(balance(&engine, CAPITAL, AVAILABLE), dec!(0.00));
}

#[test]
fn test_complete_non_pending_rejected() {
    let engine = engine();
    let posted = engine.post_at(transfer(dec!(5.00), A, CAPITAL), now()).unwrap();
    assert!(matches!(
        engine.complete_at(posted.record.reference, now()),
        Err(LedgerError::TransactionNotPending(_))
    ));
}

#[test]
fn test_fee_entry_on_named_layer() {
    let engine = engine();
    seed_a(&engine, dec!(100.00));
    let req = transfer(dec!(10.00), WALLET, A).with_entry(
        EntryRequest::new("fee", dec!(0.50), WALLET, FEES)
            .with_meta(META_ENTRY_TYPE, "fee")
            .with_meta(META_LAYER, LayerKind::OnHold.name()),
    );
    let result = engine.post_at(req, now()).unwrap();

    assert_eq!(result.record.postings.len(), 4);
    assert_eq!(balance(&engine, FEES, 3840), dec!(0.50));
    assert_eq!(balance(&engine, WALLET, 3840), dec!(-0.50));
    assert_eq!(balance(&engine, WALLET, AVAILABLE), dec!(-10.00));
}

#[test]
fn test_min_balance_rule_rejects_overdraft() {
    let engine = engine_with_rules(vec![
        RuleDefinition::new(RuleRegistry::FINAL_MIN_BALANCE, "no overdraft")
            .for_account("1")
            .on_layers(&[AVAILABLE])
            .with_param("0")
            .exempt_reversals(),
    ]);
    seed_a(&engine, dec!(20.00));

    let err = engine.post_at(transfer(dec!(30.00), B, A), now()).unwrap_err();
    assert!(matches!(err, LedgerError::RuleViolation { ref rule, .. } if rule == "no overdraft"));
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(20.00));
    assert_eq!(balance(&engine, B, AVAILABLE), dec!(0.00));

    engine.post_at(transfer(dec!(20.00), B, A), now()).unwrap();
    assert_eq!(balance(&engine, A, AVAILABLE), dec!(0.00));
}

#[test]
fn test_closed_journal_rejects_postings() {
    let engine = engine();
    engine.journals().close(CHART, today()).unwrap();
    assert!(matches!(
        engine.post_at(transfer(dec!(1.00), A, CAPITAL), now()),
        Err(LedgerError::JournalClosed(name)) if name == JOURNAL
    ));
}

#[test]
fn test_lock_date_rejects_back_dated_postings() {
    let engine = engine();
    engine
        .journals()
        .set_lock_date(CHART, today(), NaiveDate::from_ymd_opt(2024, 3, 31))
        .unwrap();
    let back_dated = transfer(dec!(1.00), A, CAPITAL).on(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    assert!(matches!(
        engine.post_at(back_dated, now()),
        Err(LedgerError::RuleViolation { .. })
    ));
    assert!(engine.post_at(transfer(dec!(1.00), A, CAPITAL), now()).is_ok());
}

#[test]
fn test_missing_journal_and_account() {
    let engine = engine();
    let next_year = transfer(dec!(1.00), A, CAPITAL).on(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    assert!(matches!(
        engine.post_at(next_year, now()),
        Err(LedgerError::JournalNotFound { .. })
    ));
    assert!(matches!(
        engine.post_at(transfer(dec!(1.00), "99", CAPITAL), now()),
        Err(LedgerError::AccountNotFound { code, .. }) if code == "99"
    ));
}

#[test]
fn test_invalid_amounts_rejected() {
    let engine = engine();
    for amount in [dec!(0), dec!(-1.00), dec!(1.001)] {
        assert!(matches!(
            engine.post_at(transfer(amount, A, CAPITAL), now()),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }
    let empty = minigl_core::ledger::CreateTransactionRequest::new(
        TransactionRef::new(),
        CHART,
        "transfer",
        "p2p",
    );
    assert!(matches!(
        engine.post_at(empty, now()),
        Err(LedgerError::InsufficientEntries)
    ));
}

#[test]
fn test_snapshots_match_transaction_log() {
    let engine = engine();
    seed_a(&engine, dec!(100.00));
    engine.post_at(transfer(dec!(30.00), B, A), now()).unwrap();
    let posted = engine.post_at(transfer(dec!(12.34), WALLET, B), now()).unwrap();
    engine.reverse_at(posted.record.reference, now()).unwrap();

    for account in [A, B, WALLET, CAPITAL] {
        assert_eq!(
            engine.replay_balance(JOURNAL, account, AVAILABLE).unwrap(),
            balance(&engine, account, AVAILABLE),
            "account {account}"
        );
    }
}
