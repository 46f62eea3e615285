//! Property-based tests for the posting engine.

use proptest::prelude::*;
use rust_decimal::Decimal;

use super::engine::fixtures::{JOURNAL, USD_AVAILABLE, balance, engine, now, transfer};
use super::validation::is_balanced;

const FINALS: [&str; 6] = ["11", "12", "21", "22", "31", "41"];
const DEBIT_NORMAL: [&str; 2] = ["11", "12"];

fn amount() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// (debit account, credit account, amount) with distinct accounts.
fn transfers() -> impl Strategy<Value = Vec<(usize, usize, Decimal)>> {
    prop::collection::vec(
        (0..FINALS.len(), 0..FINALS.len(), amount())
            .prop_filter("distinct accounts", |(debit, credit, _)| debit != credit),
        1..12,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    /// Snapshots always equal the sum of posted movements, and debit-normal
    /// balances always equal credit-normal ones.
    #[test]
    fn prop_snapshots_match_replay(moves in transfers()) {
        let engine = engine();
        for (debit, credit, amount) in moves {
            let result = engine.post_at(transfer(amount, FINALS[debit], FINALS[credit]), now()).unwrap();
            prop_assert!(is_balanced(&result.record.postings));
        }

        let mut debit_normal = Decimal::ZERO;
        let mut credit_normal = Decimal::ZERO;
        for account in FINALS {
            let snapshot = balance(&engine, account, USD_AVAILABLE);
            let replayed = engine.replay_balance(JOURNAL, account, USD_AVAILABLE).unwrap();
            prop_assert_eq!(snapshot, replayed);
            if DEBIT_NORMAL.contains(&account) {
                debit_normal += snapshot;
            } else {
                credit_normal += snapshot;
            }
        }
        prop_assert_eq!(debit_normal, credit_normal);
    }

    /// Reversing a transaction restores every balance it touched.
    #[test]
    fn prop_reversal_restores_balances(
        moves in transfers(),
        last in (0..FINALS.len(), 0..FINALS.len(), amount())
            .prop_filter("distinct accounts", |(debit, credit, _)| debit != credit),
    ) {
        let engine = engine();
        for (debit, credit, amount) in moves {
            engine.post_at(transfer(amount, FINALS[debit], FINALS[credit]), now()).unwrap();
        }
        let before: Vec<Decimal> = FINALS
            .iter()
            .map(|account| balance(&engine, account, USD_AVAILABLE))
            .collect();

        let (debit, credit, amount) = last;
        let posted = engine.post_at(transfer(amount, FINALS[debit], FINALS[credit]), now()).unwrap();
        engine.reverse_at(posted.record.reference, now()).unwrap();

        let after: Vec<Decimal> = FINALS
            .iter()
            .map(|account| balance(&engine, account, USD_AVAILABLE))
            .collect();
        prop_assert_eq!(before, after);
    }
}
