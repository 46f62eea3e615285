//! Shared setup for engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use minigl_core::chart::{AccountType, NewAccount};
use minigl_core::currency::CurrencyRegistry;
use minigl_core::journal::{JournalDefinition, RuleDefinition, RuleRegistry};
use minigl_core::ledger::{CreateTransactionRequest, EntryRequest, InMemoryEventBus};
use minigl_core::snapshot::SnapshotKey;
use minigl_core::{LedgerPorts, PostingEngine};
use minigl_shared::LedgerConfig;
use minigl_shared::types::{CurrencyCode, TransactionRef};
use rust_decimal::Decimal;

pub const CHART: &str = "WALLETS";
pub const JOURNAL: &str = "USD-2024";
pub const AVAILABLE: u32 = 840;
pub const PENDING: u32 = 1840;

/// Asset `A`.
pub const A: &str = "11";
/// Asset `B`.
pub const B: &str = "12";
/// Customer wallet (liability).
pub const WALLET: &str = "21";
/// Second customer wallet.
pub const WALLET_2: &str = "22";
/// Owner capital.
pub const CAPITAL: &str = "31";
/// Fee income.
pub const FEES: &str = "41";

pub fn usd() -> CurrencyCode {
    "USD".parse().unwrap()
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub fn today() -> NaiveDate {
    now().date_naive()
}

/// Engine over `ports` with the `WALLETS` chart and an open `USD-2024`
/// journal carrying `extra_rules` after the can-post and double-entry rules.
pub fn engine_with_ports(ports: LedgerPorts, extra_rules: Vec<RuleDefinition>) -> PostingEngine {
    let engine = PostingEngine::new(LedgerConfig::default(), ports);
    let charts = engine.charts();
    charts.create_chart(CHART, "USD", usd()).unwrap();
    for (code, name, account_type) in [
        ("1", "assets", AccountType::Asset),
        ("2", "wallets", AccountType::Liability),
        ("3", "equity", AccountType::Equity),
        ("4", "income", AccountType::Revenue),
    ] {
        charts
            .add_account(CHART, None, NewAccount::composite(code, name, account_type))
            .unwrap();
    }
    for (parent, code, name, account_type) in [
        ("1", A, "A", AccountType::Asset),
        ("1", B, "B", AccountType::Asset),
        ("2", WALLET, "wallet", AccountType::Liability),
        ("2", WALLET_2, "wallet 2", AccountType::Liability),
        ("3", CAPITAL, "capital", AccountType::Equity),
        ("4", FEES, "fees", AccountType::Revenue),
    ] {
        charts
            .add_account(CHART, Some(parent), NewAccount::final_account(code, name, account_type))
            .unwrap();
    }

    let chart = charts.chart(CHART).unwrap();
    let currency = engine.currencies().lookup(usd()).unwrap();
    let mut definition = JournalDefinition::for_year(&chart, 2024)
        .with_currency_layers(&currency)
        .with_rule(RuleDefinition::new(RuleRegistry::CAN_POST, "can post"))
        .with_rule(RuleDefinition::new(RuleRegistry::DOUBLE_ENTRY, "double entry"));
    for rule in extra_rules {
        definition = definition.with_rule(rule);
    }
    engine.journals().open(definition).unwrap();
    engine
}

pub fn engine_with_rules(extra_rules: Vec<RuleDefinition>) -> PostingEngine {
    engine_with_ports(LedgerPorts::in_memory(), extra_rules)
}

/// Engine publishing to `bus`.
pub fn engine_with_events(bus: Arc<InMemoryEventBus>) -> PostingEngine {
    engine_with_ports(
        LedgerPorts {
            events: bus,
            ..LedgerPorts::in_memory()
        },
        Vec::new(),
    )
}

pub fn engine() -> PostingEngine {
    engine_with_rules(Vec::new())
}

pub fn transfer(amount: Decimal, debit: &str, credit: &str) -> CreateTransactionRequest {
    CreateTransactionRequest::new(TransactionRef::new(), CHART, "transfer", "p2p")
        .with_entry(EntryRequest::new("transfer", amount, debit, credit))
        .on(today())
}

pub fn balance(engine: &PostingEngine, account: &str, layer: u32) -> Decimal {
    engine
        .snapshots()
        .get_balance(&SnapshotKey::new(JOURNAL, account, layer), usd())
        .unwrap()
        .amount
}
