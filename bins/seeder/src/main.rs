//! Demo seeder for minigl development.
//!
//! Builds a wallet chart, opens the journal for the current year, posts a
//! handful of transfers (one pending, one reversed) and logs the resulting
//! balances.
//!
//! Usage: cargo run --bin seeder

use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{Datelike, Utc};
use minigl_core::PostingEngine;
use minigl_core::chart::{AccountType, CreateAccountRequest, NewAccount};
use minigl_core::currency::resolve_currency;
use minigl_core::journal::{JournalDefinition, LayerKind, RuleDefinition, RuleRegistry};
use minigl_core::ledger::{CreateTransactionRequest, EntryRequest};
use minigl_core::ledger::types::META_ENTRY_TYPE;
use minigl_core::limits::Direction;
use minigl_shared::AppConfig;
use minigl_shared::types::{CurrencyCode, ProfileId, TransactionRef};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CHART: &str = "WALLETS";

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config);

    let engine = PostingEngine::in_memory(config.ledger.clone());
    let accounts = seed_chart(&engine)?;
    seed_journal(&engine)?;
    seed_transactions(&engine, &accounts)?;

    let today = Utc::now().date_naive();
    for (name, code) in [
        ("treasury", accounts.treasury.as_str()),
        ("alice", accounts.alice.as_str()),
        ("bob", accounts.bob.as_str()),
        ("fees", accounts.fees.as_str()),
    ] {
        let balance = engine.available_balance(CHART, code, today)?;
        info!(account = name, code, balance = %balance, "Balance");
    }
    info!("Seeding complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Codes of the seeded final accounts.
struct Accounts {
    treasury: String,
    alice: String,
    bob: String,
    fees: String,
}

fn account_request(parent: &str, name: &str, account_type: AccountType, currency: CurrencyCode) -> CreateAccountRequest {
    CreateAccountRequest {
        currency,
        name: name.to_string(),
        parent: parent.to_string(),
        padding: None,
        final_account: true,
        account_type,
        metadata: BTreeMap::new(),
    }
}

fn seed_chart(engine: &PostingEngine) -> anyhow::Result<Accounts> {
    let charts = engine.charts();
    let config = engine.config();
    let usd: CurrencyCode = "USD".parse().context("USD currency code")?;
    charts.create_chart(CHART, "USD", usd)?;
    for (code, name, account_type) in [
        ("1", "Assets", AccountType::Asset),
        ("2", "Customer wallets", AccountType::Liability),
        ("4", "Income", AccountType::Revenue),
        (config.bridge_assets_code.as_str(), "Bridge assets", AccountType::Asset),
        (config.bridge_liabilities_code.as_str(), "Bridge liabilities", AccountType::Liability),
    ] {
        charts.add_account(CHART, None, NewAccount::composite(code, name, account_type))?;
    }

    let treasury = charts.create_account(CHART, account_request("1", "Treasury", AccountType::Asset, usd))?;
    let alice = charts.create_account(CHART, account_request("2", "Alice", AccountType::Liability, usd))?;
    let bob = charts.create_account(CHART, account_request("2", "Bob", AccountType::Liability, usd))?;
    let fees = charts.create_account(CHART, account_request("4", "Transfer fees", AccountType::Revenue, usd))?;
    info!(
        chart = CHART,
        accounts = charts.chart(CHART)?.len(),
        bridges = alice.bridges.len() + bob.bridges.len(),
        "Chart seeded"
    );

    Ok(Accounts {
        treasury: treasury.account.code,
        alice: alice.account.code,
        bob: bob.account.code,
        fees: fees.account.code,
    })
}

fn seed_journal(engine: &PostingEngine) -> anyhow::Result<()> {
    let chart = engine.charts().chart(CHART)?;
    let usd = resolve_currency(engine.currencies(), chart.currency)?;
    let available = LayerKind::Available.layer_id(&usd);
    let definition = JournalDefinition::for_year(&chart, Utc::now().year())
        .with_currency_layers(&usd)
        .with_rule(RuleDefinition::new(RuleRegistry::CAN_POST, "can post"))
        .with_rule(RuleDefinition::new(RuleRegistry::DOUBLE_ENTRY, "double entry"))
        .with_rule(
            RuleDefinition::new(RuleRegistry::FINAL_MIN_BALANCE, "wallets not overdrawn")
                .for_account("2")
                .on_layers(&[available])
                .with_param(Decimal::ZERO)
                .exempt_reversals(),
        );
    engine.journals().open(definition)?;
    Ok(())
}

fn seed_transactions(engine: &PostingEngine, accounts: &Accounts) -> anyhow::Result<()> {
    let profile = ProfileId::new();
    let usd = engine.charts().chart(CHART)?.currency;
    let mut limit = engine.limit_template(profile, "p2p", usd, Utc::now());
    limit.max_transaction_debit = Some(Decimal::new(500_00, 2));
    limit.max_daily_debit = Some(Decimal::new(1_000_00, 2));
    engine.upsert_limit(limit)?;

    let top_up = |wallet: &str, amount: Decimal| {
        CreateTransactionRequest::new(TransactionRef::new(), CHART, "top-up", "funding")
            .with_entry(EntryRequest::new("top up", amount, &accounts.treasury, wallet))
    };
    engine.post(top_up(&accounts.alice, Decimal::new(250_00, 2)))?;
    engine.post(top_up(&accounts.bob, Decimal::new(40_00, 2)))?;

    let transfer = CreateTransactionRequest::new(TransactionRef::new(), CHART, "p2p", "transfers")
        .with_limit(profile, Direction::Debit)
        .with_entry(EntryRequest::new(
            "dinner",
            Decimal::new(30_00, 2),
            &accounts.alice,
            &accounts.bob,
        ))
        .with_entry(
            EntryRequest::new("fee", Decimal::new(50, 2), &accounts.alice, &accounts.fees)
                .with_meta(META_ENTRY_TYPE, "fee"),
        );
    engine.post(transfer)?;

    let refund = engine.post(
        CreateTransactionRequest::new(TransactionRef::new(), CHART, "p2p", "transfers")
            .with_limit(profile, Direction::Debit)
            .with_entry(EntryRequest::new(
                "tickets",
                Decimal::new(12_00, 2),
                &accounts.bob,
                &accounts.alice,
            )),
    )?;
    engine.reverse(refund.record.reference)?;

    let pending = engine.post(
        CreateTransactionRequest::new(TransactionRef::new(), CHART, "p2p", "transfers")
            .pending()
            .with_entry(EntryRequest::new(
                "rent share",
                Decimal::new(100_00, 2),
                &accounts.alice,
                &accounts.bob,
            )),
    )?;
    engine.complete(pending.record.reference)?;
    Ok(())
}
