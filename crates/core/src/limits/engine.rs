//! Transaction limit evaluation.
//!
//! Usage is tracked per limit key (profile, transaction type, currency), so a
//! row that replaces another keeps counting the usage already recorded.
//! Checking a request and recording its usage happen under that key's lock,
//! so two concurrent requests can never both fit under a ceiling that only
//! one of them fits.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use minigl_shared::types::TransactionRef;
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::gateway::LimitGateway;
use super::types::{
    Direction, LimitDecision, LimitKey, LimitKind, LimitRequest, Reservation, TransactionLimit,
};
use crate::ledger::LedgerError;

/// Evaluates and reserves movements against configured limits.
pub struct LimitEngine {
    gateway: Arc<dyn LimitGateway>,
    usage: DashMap<LimitKey, Arc<Mutex<Vec<Reservation>>>>,
    by_reference: DashMap<TransactionRef, Vec<LimitKey>>,
}

impl std::fmt::Debug for LimitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimitEngine")
            .field("tracked_keys", &self.usage.len())
            .finish_non_exhaustive()
    }
}

/// Start of the local calendar day containing `now` in `tz`, as UTC.
#[must_use]
pub fn local_day_start(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let midnight = now.with_timezone(&tz).date_naive().and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map_or_else(|| Utc.from_utc_datetime(&midnight), |start| start.with_timezone(&Utc))
}

impl LimitEngine {
    /// Creates an engine reading limits from `gateway`.
    #[must_use]
    pub fn new(gateway: Arc<dyn LimitGateway>) -> Self {
        Self {
            gateway,
            usage: DashMap::new(),
            by_reference: DashMap::new(),
        }
    }

    /// Stores a limit row through the gateway. Returns the rows it closed.
    pub fn upsert(&self, limit: TransactionLimit) -> Result<Vec<TransactionLimit>, LedgerError> {
        Ok(self.gateway.upsert(limit)?)
    }

    /// Checks `req` and, when allowed, records its usage.
    ///
    /// No active limit means the movement is allowed without a reservation.
    /// Ceilings are inclusive: reaching a ceiling exactly is allowed.
    pub fn check_and_reserve(&self, req: &LimitRequest) -> Result<LimitDecision, LedgerError> {
        let key = req.key();
        let Some(limit) = self.gateway.active_limit(&key, req.now)? else {
            return Ok(LimitDecision::Allowed { reservation: None });
        };
        let ceilings = limit.ceilings(req.direction);

        if let Some(min) = ceilings.min_transaction {
            if req.amount < min {
                return Ok(reject(LimitKind::MinTransaction, min, req.amount));
            }
        }
        if let Some(max) = ceilings.max_transaction {
            if req.amount > max {
                return Ok(reject(LimitKind::MaxTransaction, max, req.amount));
            }
        }
        if let (Some(max), Some(projected)) = (limit.max_account_balance, req.projected_balance) {
            if projected > max {
                return Ok(reject(LimitKind::MaxAccountBalance, max, projected));
            }
        }

        let usage = Arc::clone(self.usage.entry(key.clone()).or_default().value());
        let mut usage = usage.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(max_daily) = ceilings.max_daily {
            let day_start = local_day_start(req.now, limit.time_zone);
            let used = sum_since(&usage, req.direction, day_start, req.now);
            let attempted = used + req.amount;
            if attempted > max_daily {
                return Ok(reject(LimitKind::MaxDaily, max_daily, attempted));
            }
        }
        if let Some(cumulative) = ceilings.cumulative {
            let used = sum_since(&usage, req.direction, limit.start, req.now);
            let attempted = used + req.amount;
            if attempted > cumulative {
                return Ok(reject(LimitKind::Cumulative, cumulative, attempted));
            }
        }

        let reservation = Reservation {
            limit_id: limit.id,
            reference: req.reference,
            direction: req.direction,
            amount: req.amount,
            at: req.now,
        };
        usage.push(reservation.clone());
        drop(usage);
        self.by_reference
            .entry(req.reference)
            .or_default()
            .push(key);
        debug!(
            reference = %req.reference,
            limit_id = %limit.id,
            amount = %req.amount,
            direction = ?req.direction,
            "Limit usage reserved"
        );
        Ok(LimitDecision::Allowed {
            reservation: Some(reservation),
        })
    }

    /// Drops every usage reserved by `reference`. Returns the amount released.
    pub fn release(&self, reference: TransactionRef) -> Decimal {
        let Some((_, keys)) = self.by_reference.remove(&reference) else {
            return Decimal::ZERO;
        };
        let mut released = Decimal::ZERO;
        for key in keys {
            let Some(usage) = self.usage.get(&key).map(|entry| Arc::clone(entry.value())) else {
                continue;
            };
            let mut usage = usage.lock().unwrap_or_else(PoisonError::into_inner);
            released += usage
                .iter()
                .filter(|reservation| reservation.reference == reference)
                .map(|reservation| reservation.amount)
                .sum::<Decimal>();
            usage.retain(|reservation| reservation.reference != reference);
        }
        if !released.is_zero() {
            info!(%reference, %released, "Limit usage released");
        }
        released
    }

    /// Usage recorded under `key` in `direction` since `since`.
    #[must_use]
    pub fn used_since(
        &self,
        key: &LimitKey,
        direction: Direction,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Decimal {
        self.usage.get(key).map_or(Decimal::ZERO, |entry| {
            let usage = entry.value().lock().unwrap_or_else(PoisonError::into_inner);
            sum_since(&usage, direction, since, now)
        })
    }
}

fn reject(kind: LimitKind, limit: Decimal, attempted: Decimal) -> LimitDecision {
    LimitDecision::Rejected {
        kind,
        limit,
        attempted,
    }
}

fn sum_since(
    usage: &[Reservation],
    direction: Direction,
    since: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Decimal {
    usage
        .iter()
        .filter(|reservation| {
            reservation.direction == direction && reservation.at >= since && reservation.at <= now
        })
        .map(|reservation| reservation.amount)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::gateway::InMemoryLimitGateway;
    use minigl_shared::types::ProfileId;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn setup(configure: impl FnOnce(&mut TransactionLimit)) -> (LimitEngine, ProfileId, TransactionLimit) {
        let gateway = Arc::new(InMemoryLimitGateway::new());
        let profile = ProfileId::new();
        let mut limit = TransactionLimit::new(profile, "transfer", "USD".parse().unwrap(), at(1, 0));
        configure(&mut limit);
        gateway.upsert(limit.clone()).unwrap();
        (LimitEngine::new(gateway), profile, limit)
    }

    fn request(profile: ProfileId, amount: Decimal, direction: Direction, now: DateTime<Utc>) -> LimitRequest {
        LimitRequest {
            reference: TransactionRef::new(),
            profile_id: profile,
            transaction_type: "transfer".into(),
            currency: "USD".parse().unwrap(),
            amount,
            direction,
            projected_balance: None,
            now,
        }
    }

    #[rstest]
    #[case(dec!(50.00), true)]
    #[case(dec!(49.99), true)]
    #[case(dec!(50.01), false)]
    fn test_max_transaction_debit(#[case] amount: Decimal, #[case] allowed: bool) {
        let (engine, profile, _) = setup(|limit| limit.max_transaction_debit = Some(dec!(50.00)));
        let decision = engine
            .check_and_reserve(&request(profile, amount, Direction::Debit, at(2, 9)))
            .unwrap();
        assert_eq!(decision.is_allowed(), allowed);
        if !allowed {
            assert_eq!(
                decision,
                LimitDecision::Rejected {
                    kind: LimitKind::MaxTransaction,
                    limit: dec!(50.00),
                    attempted: amount,
                }
            );
        }
    }

    #[test]
    fn test_min_transaction_credit() {
        let (engine, profile, _) = setup(|limit| limit.min_transaction_credit = Some(dec!(1.00)));
        let decision = engine
            .check_and_reserve(&request(profile, dec!(0.99), Direction::Credit, at(2, 9)))
            .unwrap();
        assert!(matches!(decision, LimitDecision::Rejected { kind: LimitKind::MinTransaction, .. }));
        // Debits are not affected by credit ceilings.
        assert!(engine
            .check_and_reserve(&request(profile, dec!(0.99), Direction::Debit, at(2, 9)))
            .unwrap()
            .is_allowed());
    }

    #[test]
    fn test_daily_ceiling_reached_exactly() {
        let (engine, profile, _) = setup(|limit| limit.max_daily_debit = Some(dec!(100.00)));
        for hour in [8, 9] {
            assert!(engine
                .check_and_reserve(&request(profile, dec!(50.00), Direction::Debit, at(2, hour)))
                .unwrap()
                .is_allowed());
        }
        let decision = engine
            .check_and_reserve(&request(profile, dec!(0.01), Direction::Debit, at(2, 10)))
            .unwrap();
        assert_eq!(
            decision,
            LimitDecision::Rejected {
                kind: LimitKind::MaxDaily,
                limit: dec!(100.00),
                attempted: dec!(100.01),
            }
        );

        // Next local day starts fresh.
        assert!(engine
            .check_and_reserve(&request(profile, dec!(100.00), Direction::Debit, at(3, 0)))
            .unwrap()
            .is_allowed());
    }

    #[test]
    fn test_daily_window_uses_limit_time_zone() {
        let (engine, profile, _) = setup(|limit| {
            limit.max_daily_debit = Some(dec!(100.00));
            limit.time_zone = chrono_tz::Africa::Lagos;
        });
        // 22:00 UTC on the 2nd is 23:00 in Lagos; 23:30 UTC is 00:30 on the 3rd.
        assert!(engine
            .check_and_reserve(&request(profile, dec!(100.00), Direction::Debit, at(2, 22)))
            .unwrap()
            .is_allowed());
        let next_local_day = Utc.with_ymd_and_hms(2024, 3, 2, 23, 30, 0).unwrap();
        assert!(engine
            .check_and_reserve(&request(profile, dec!(100.00), Direction::Debit, next_local_day))
            .unwrap()
            .is_allowed());
    }

    #[test]
    fn test_cumulative_spans_days() {
        let (engine, profile, _) = setup(|limit| limit.cumulative_credit = Some(dec!(150.00)));
        for day in [2, 3, 4] {
            assert!(engine
                .check_and_reserve(&request(profile, dec!(50.00), Direction::Credit, at(day, 9)))
                .unwrap()
                .is_allowed());
        }
        let decision = engine
            .check_and_reserve(&request(profile, dec!(0.01), Direction::Credit, at(5, 9)))
            .unwrap();
        assert!(matches!(decision, LimitDecision::Rejected { kind: LimitKind::Cumulative, .. }));
    }

    #[test]
    fn test_max_account_balance_on_credit() {
        let (engine, profile, _) = setup(|limit| limit.max_account_balance = Some(dec!(1000.00)));
        let mut req = request(profile, dec!(10.00), Direction::Credit, at(2, 9));
        req.projected_balance = Some(dec!(1000.00));
        assert!(engine.check_and_reserve(&req).unwrap().is_allowed());

        req.reference = TransactionRef::new();
        req.projected_balance = Some(dec!(1000.01));
        let decision = engine.check_and_reserve(&req).unwrap();
        assert!(matches!(decision, LimitDecision::Rejected { kind: LimitKind::MaxAccountBalance, .. }));
    }

    #[test]
    fn test_max_account_balance_on_debit() {
        let (engine, profile, _) = setup(|limit| limit.max_account_balance = Some(dec!(50.00)));
        let mut req = request(profile, dec!(80.00), Direction::Debit, at(2, 9));
        req.projected_balance = Some(dec!(80.00));
        let decision = engine.check_and_reserve(&req).unwrap();
        assert_eq!(
            decision,
            LimitDecision::Rejected {
                kind: LimitKind::MaxAccountBalance,
                limit: dec!(50.00),
                attempted: dec!(80.00),
            }
        );
    }

    #[test]
    fn test_replacing_row_keeps_daily_usage() {
        let (engine, profile, limit) = setup(|limit| limit.max_daily_debit = Some(dec!(100.00)));
        assert!(engine
            .check_and_reserve(&request(profile, dec!(90.00), Direction::Debit, at(2, 9)))
            .unwrap()
            .is_allowed());

        let mut replacement = TransactionLimit::new(profile, "transfer", "USD".parse().unwrap(), at(2, 8));
        replacement.max_daily_debit = Some(dec!(100.00));
        engine.upsert(replacement.clone()).unwrap();
        assert_ne!(replacement.id, limit.id);

        let decision = engine
            .check_and_reserve(&request(profile, dec!(90.00), Direction::Debit, at(2, 10)))
            .unwrap();
        assert_eq!(
            decision,
            LimitDecision::Rejected {
                kind: LimitKind::MaxDaily,
                limit: dec!(100.00),
                attempted: dec!(180.00),
            }
        );
    }

    #[test]
    fn test_release_frees_usage() {
        let (engine, profile, limit) = setup(|limit| limit.max_daily_debit = Some(dec!(100.00)));
        let first = request(profile, dec!(100.00), Direction::Debit, at(2, 9));
        assert!(engine.check_and_reserve(&first).unwrap().is_allowed());
        assert!(!engine
            .check_and_reserve(&request(profile, dec!(1.00), Direction::Debit, at(2, 10)))
            .unwrap()
            .is_allowed());

        assert_eq!(engine.release(first.reference), dec!(100.00));
        assert_eq!(engine.used_since(&limit.key(), Direction::Debit, at(2, 0), at(2, 23)), Decimal::ZERO);
        assert!(engine
            .check_and_reserve(&request(profile, dec!(1.00), Direction::Debit, at(2, 11)))
            .unwrap()
            .is_allowed());
        assert_eq!(engine.release(first.reference), Decimal::ZERO);
    }

    #[test]
    fn test_no_limit_allows_without_reservation() {
        let engine = LimitEngine::new(Arc::new(InMemoryLimitGateway::new()));
        let decision = engine
            .check_and_reserve(&request(ProfileId::new(), dec!(1_000_000), Direction::Debit, at(2, 9)))
            .unwrap();
        assert_eq!(decision, LimitDecision::Allowed { reservation: None });
    }

    #[test]
    fn test_concurrent_reservations_respect_ceiling() {
        let (engine, profile, limit) = setup(|limit| limit.max_daily_debit = Some(dec!(100.00)));
        let allowed = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    let decision = engine
                        .check_and_reserve(&request(profile, dec!(10.00), Direction::Debit, at(2, 9)))
                        .unwrap();
                    if decision.is_allowed() {
                        allowed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(allowed.into_inner(), 10);
        assert_eq!(engine.used_since(&limit.key(), Direction::Debit, at(2, 0), at(2, 23)), dec!(100.00));
    }
}
