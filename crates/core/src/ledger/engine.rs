//! The posting engine.
//!
//! A posting is validated before anything is locked. It then locks every
//! snapshot key it writes or its rules read, runs the journal rules and the
//! limit checks, applies the balance deltas and saves the record, all under
//! those locks. Events are published after the locks are released.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use minigl_shared::LedgerConfig;
use minigl_shared::types::{CurrencyCode, EventId, Money, ProfileId, TransactionRef};
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::balance::{RunningBalance, Side};
use super::error::LedgerError;
use super::events::{EventPublisher, InMemoryEventBus, LedgerEvent};
use super::movement::{entry_postings, log_movements, net_impact, swapped_entries};
use super::store::{InMemoryTransactionStore, TransactionStore};
use super::types::{
    CreateTransactionRequest, EntryKind, EntryRequest, LimitContext, META_ACCOUNT_IDS,
    META_COMPLETES, META_MERCHANT_ID, META_REVERSES, META_STATUS, Metadata, Posting,
    PostingResult, TransactionRecord, TransactionStatus,
};
use super::validation::{is_balanced, require_entries, validate_amount};
use crate::chart::{Account, ChartOfAccounts, ChartStore};
use crate::currency::{CurrencyRegistry, InMemoryCurrencyRegistry, resolve_currency};
use crate::journal::rules::{required_balances, run_rules};
use crate::journal::{BalanceView, JournalStore, LayerKind, RuleContext, RuleRegistry};
use crate::limits::{
    Direction, InMemoryLimitGateway, LimitDecision, LimitEngine, LimitGateway, LimitRequest,
    TransactionLimit,
};
use crate::snapshot::{
    BalanceSnapshotCache, Delta, InMemorySnapshotStore, LockedSnapshots, SnapshotKey,
    SnapshotStore,
};

/// Outbound collaborators of the engine.
#[derive(Clone)]
pub struct LedgerPorts {
    /// Currency precision and numeric ids.
    pub currencies: Arc<dyn CurrencyRegistry>,
    /// Durable balance snapshots.
    pub snapshots: Arc<dyn SnapshotStore>,
    /// Transaction log.
    pub transactions: Arc<dyn TransactionStore>,
    /// Limit configuration.
    pub limits: Arc<dyn LimitGateway>,
    /// Event sink.
    pub events: Arc<dyn EventPublisher>,
}

impl LedgerPorts {
    /// Every port backed by its in-memory implementation.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            currencies: Arc::new(InMemoryCurrencyRegistry::with_defaults()),
            snapshots: Arc::new(InMemorySnapshotStore::new()),
            transactions: Arc::new(InMemoryTransactionStore::new()),
            limits: Arc::new(InMemoryLimitGateway::new()),
            events: Arc::new(InMemoryEventBus::new()),
        }
    }
}

/// Posts, reverses and completes transactions.
pub struct PostingEngine {
    config: LedgerConfig,
    currencies: Arc<dyn CurrencyRegistry>,
    charts: ChartStore,
    journals: JournalStore,
    snapshots: BalanceSnapshotCache,
    limits: LimitEngine,
    transactions: Arc<dyn TransactionStore>,
    events: Arc<dyn EventPublisher>,
    in_flight: DashMap<TransactionRef, ()>,
    settling: DashMap<TransactionRef, ()>,
}

impl std::fmt::Debug for PostingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostingEngine")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

/// Removes a reference from its claim table when dropped.
struct Claim<'a> {
    table: &'a DashMap<TransactionRef, ()>,
    reference: TransactionRef,
}

impl<'a> Claim<'a> {
    fn acquire(
        table: &'a DashMap<TransactionRef, ()>,
        reference: TransactionRef,
    ) -> Result<Self, LedgerError> {
        match table.entry(reference) {
            Entry::Occupied(_) => Err(LedgerError::DuplicateReference(reference)),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(Self { table, reference })
            }
        }
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.table.remove(&self.reference);
    }
}

/// A transaction on its way through the pipeline.
struct Draft {
    reference: TransactionRef,
    chart: String,
    transaction_type: String,
    group: String,
    pending: bool,
    limit: Option<LimitContext>,
    metadata: Metadata,
    entries: Vec<EntryRequest>,
    post_date: NaiveDate,
    /// Postings computed up front (reversals, completions); limits are not
    /// checked for these.
    fixed: Option<Vec<Posting>>,
    reverses: Option<TransactionRef>,
    completes: Option<TransactionRef>,
}

impl Draft {
    fn from_request(req: CreateTransactionRequest, now: DateTime<Utc>) -> Self {
        Self {
            reference: req.reference,
            chart: req.chart,
            transaction_type: req.transaction_type,
            group: req.group,
            pending: req.pending,
            limit: req.limit,
            metadata: req.metadata,
            entries: req.entries,
            post_date: req.post_date.unwrap_or_else(|| now.date_naive()),
            fixed: None,
            reverses: None,
            completes: None,
        }
    }

    fn derived_from(
        record: &TransactionRecord,
        entries: Vec<EntryRequest>,
        postings: Vec<Posting>,
        link: (&str, TransactionRef),
    ) -> Self {
        let mut metadata = record.metadata.clone();
        metadata.insert(link.0.to_string(), Value::String(link.1.to_string()));
        Self {
            reference: TransactionRef::new(),
            chart: record.chart.clone(),
            transaction_type: record.transaction_type.clone(),
            group: record.group.clone(),
            pending: record.pending,
            limit: record.limit,
            metadata,
            entries,
            post_date: record.post_date,
            fixed: Some(postings),
            reverses: None,
            completes: None,
        }
    }

    fn record(
        &self,
        journal: &str,
        status: TransactionStatus,
        postings: Vec<Posting>,
        running_balances: Vec<RunningBalance>,
        timestamp: DateTime<Utc>,
        failure: Option<String>,
    ) -> TransactionRecord {
        let mut accounts: Vec<Value> = Vec::new();
        for entry in &self.entries {
            for code in [&entry.debit_account, &entry.credit_account] {
                let code = Value::String(code.clone());
                if !accounts.contains(&code) {
                    accounts.push(code);
                }
            }
        }
        let mut metadata = self.metadata.clone();
        metadata.insert(META_ACCOUNT_IDS.to_string(), Value::Array(accounts));
        metadata.insert(
            META_STATUS.to_string(),
            Value::String(status.as_str().to_string()),
        );

        TransactionRecord {
            reference: self.reference,
            chart: self.chart.clone(),
            journal: journal.to_string(),
            transaction_type: self.transaction_type.clone(),
            group: self.group.clone(),
            pending: self.pending,
            status,
            post_date: self.post_date,
            timestamp,
            entries: self.entries.clone(),
            postings,
            running_balances,
            limit: self.limit,
            metadata,
            reverses: self.reverses,
            completes: self.completes,
            failure,
        }
    }
}

/// Pre-posting balances of locked keys, as seen by rules.
struct LockedView<'l, 'a> {
    journal: &'l str,
    locked: &'l LockedSnapshots<'a>,
}

impl BalanceView for LockedView<'_, '_> {
    fn balance(&self, account: &str, layer: u32) -> Decimal {
        self.locked
            .balance(&SnapshotKey::new(self.journal, account, layer))
            .unwrap_or(Decimal::ZERO)
    }
}

impl PostingEngine {
    /// Creates an engine with the built-in rules.
    #[must_use]
    pub fn new(config: LedgerConfig, ports: LedgerPorts) -> Self {
        Self::with_rules(config, ports, RuleRegistry::with_builtins())
    }

    /// Creates an engine resolving journal rules through `registry`.
    #[must_use]
    pub fn with_rules(config: LedgerConfig, ports: LedgerPorts, registry: RuleRegistry) -> Self {
        Self {
            charts: ChartStore::new(config.clone()),
            journals: JournalStore::new(registry),
            snapshots: BalanceSnapshotCache::new(ports.snapshots, &config),
            limits: LimitEngine::new(ports.limits),
            currencies: ports.currencies,
            transactions: ports.transactions,
            events: ports.events,
            in_flight: DashMap::new(),
            settling: DashMap::new(),
            config,
        }
    }

    /// An engine over in-memory ports.
    #[must_use]
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self::new(config, LedgerPorts::in_memory())
    }

    // ========== Components ==========

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Charts of accounts.
    #[must_use]
    pub fn charts(&self) -> &ChartStore {
        &self.charts
    }

    /// Journals.
    #[must_use]
    pub fn journals(&self) -> &JournalStore {
        &self.journals
    }

    /// Balance snapshots.
    #[must_use]
    pub fn snapshots(&self) -> &BalanceSnapshotCache {
        &self.snapshots
    }

    /// Currency registry.
    #[must_use]
    pub fn currencies(&self) -> &dyn CurrencyRegistry {
        self.currencies.as_ref()
    }

    /// Limit engine.
    #[must_use]
    pub fn limits(&self) -> &LimitEngine {
        &self.limits
    }

    // ========== Limits ==========

    /// A limit without ceilings in the configured default time zone.
    ///
    /// An unparseable time zone falls back to UTC.
    #[must_use]
    pub fn limit_template(
        &self,
        profile_id: ProfileId,
        transaction_type: &str,
        currency: CurrencyCode,
        start: DateTime<Utc>,
    ) -> TransactionLimit {
        let mut limit = TransactionLimit::new(profile_id, transaction_type, currency, start);
        limit.time_zone = self.config.default_time_zone.parse::<Tz>().unwrap_or_else(|_| {
            warn!(
                time_zone = %self.config.default_time_zone,
                "Unknown default time zone, using UTC"
            );
            Tz::UTC
        });
        limit
    }

    /// Stores a limit row. Returns the rows it closed.
    pub fn upsert_limit(
        &self,
        limit: TransactionLimit,
    ) -> Result<Vec<TransactionLimit>, LedgerError> {
        self.limits.upsert(limit)
    }

    // ========== Posting ==========

    /// Posts a transaction at the current time.
    pub fn post(&self, req: CreateTransactionRequest) -> Result<PostingResult, LedgerError> {
        self.post_at(req, Utc::now())
    }

    /// Posts a transaction as of `now`.
    ///
    /// Idempotent on the reference: a posted transaction is returned
    /// unchanged with `replayed` set, a failed one is attempted again, and a
    /// concurrent attempt with the same reference fails with
    /// `DuplicateReference`.
    pub fn post_at(
        &self,
        req: CreateTransactionRequest,
        now: DateTime<Utc>,
    ) -> Result<PostingResult, LedgerError> {
        if let Some(prior) = self.posted(req.reference)? {
            return Ok(Self::result(prior, true));
        }
        let _claim = Claim::acquire(&self.in_flight, req.reference)?;
        if let Some(prior) = self.posted(req.reference)? {
            return Ok(Self::result(prior, true));
        }
        self.execute(Draft::from_request(req, now), now)
    }

    /// Reverses a posted transaction at the current time.
    pub fn reverse(&self, original: TransactionRef) -> Result<PostingResult, LedgerError> {
        self.reverse_at(original, Utc::now())
    }

    /// Posts the negated movements of `original`, and of its completion if
    /// it has one, to the original's journal.
    ///
    /// Reversing a completion reverses the pending transaction it completed,
    /// so a pending movement and its completion are always undone together.
    /// Limits are not checked, and the usage reserved by the original is
    /// released.
    pub fn reverse_at(
        &self,
        requested: TransactionRef,
        now: DateTime<Utc>,
    ) -> Result<PostingResult, LedgerError> {
        let original = match self.posted(requested)? {
            Some(record) => record.completes.unwrap_or(requested),
            None => return Err(LedgerError::TransactionNotFound(requested)),
        };
        if original != requested {
            debug!(completion = %requested, %original, "Reversing completed pending transaction");
        }
        let _claim = Claim::acquire(&self.settling, original)?;
        let record = self
            .posted(original)?
            .ok_or(LedgerError::TransactionNotFound(original))?;
        if self.transactions.find_reversal_of(original)?.is_some() {
            return Err(LedgerError::AlreadyReversed(original));
        }
        let completion = self.transactions.find_completion_of(original)?;
        let postings: Vec<Posting> = record
            .postings
            .iter()
            .chain(completion.iter().flat_map(|done| &done.postings))
            .map(Posting::negated)
            .collect();

        let mut draft = Draft::derived_from(
            &record,
            swapped_entries(&record.entries),
            postings,
            (META_REVERSES, original),
        );
        draft.reverses = Some(original);
        let result = self.execute(draft, now)?;

        let released = self.limits.release(original);
        info!(
            %original,
            reversal = %result.record.reference,
            %released,
            "Transaction reversed"
        );
        Ok(result)
    }

    /// Completes a pending transaction at the current time.
    pub fn complete(&self, pending: TransactionRef) -> Result<PostingResult, LedgerError> {
        self.complete_at(pending, Utc::now())
    }

    /// Moves the pending-layer movements of `pending` onto the available
    /// layer. Completing twice returns the first completion.
    pub fn complete_at(
        &self,
        pending: TransactionRef,
        now: DateTime<Utc>,
    ) -> Result<PostingResult, LedgerError> {
        let _claim = Claim::acquire(&self.settling, pending)?;
        let record = self
            .posted(pending)?
            .ok_or(LedgerError::TransactionNotFound(pending))?;
        if !record.pending {
            return Err(LedgerError::TransactionNotPending(pending));
        }
        if self.transactions.find_reversal_of(pending)?.is_some() {
            return Err(LedgerError::AlreadyReversed(pending));
        }
        if let Some(done) = self.transactions.find_completion_of(pending)? {
            return Ok(Self::result(done, true));
        }

        let mut postings = Vec::new();
        for posting in &record.postings {
            let currency = resolve_currency(self.currencies.as_ref(), posting.currency)?;
            if LayerKind::of_layer(posting.layer, &currency) != Some(LayerKind::Pending) {
                continue;
            }
            postings.push(posting.negated());
            postings.push(Posting {
                layer: LayerKind::Available.layer_id(&currency),
                ..posting.clone()
            });
        }
        if postings.is_empty() {
            return Err(LedgerError::TransactionNotPending(pending));
        }

        let mut draft = Draft::derived_from(
            &record,
            record.entries.clone(),
            postings,
            (META_COMPLETES, pending),
        );
        draft.pending = false;
        draft.completes = Some(pending);
        let result = self.execute(draft, now)?;
        info!(
            %pending,
            completion = %result.record.reference,
            "Pending transaction completed"
        );
        Ok(result)
    }

    // ========== Queries ==========

    /// Stored record of `reference`, posted or failed.
    pub fn transaction(&self, reference: TransactionRef) -> Result<TransactionRecord, LedgerError> {
        self.transactions
            .find(reference)?
            .ok_or(LedgerError::TransactionNotFound(reference))
    }

    /// Balance of an account on `layers` in the journal covering `date`.
    ///
    /// A composite account sums its final descendants booked in its
    /// currency.
    pub fn account_balance(
        &self,
        chart: &str,
        code: &str,
        date: NaiveDate,
        layers: &[u32],
    ) -> Result<Money, LedgerError> {
        let chart = self.charts.chart(chart)?;
        let currency = chart.effective_currency(code)?;
        let journal = self.journals.resolve(&chart.code, date)?;
        let mut total = Decimal::ZERO;
        for account in chart.final_descendants(code)? {
            if chart.effective_currency(&account.code)? != currency {
                continue;
            }
            for layer in layers {
                let key = SnapshotKey::new(&journal.name, &account.code, *layer);
                total += self.snapshots.get_balance(&key, currency)?.amount;
            }
        }
        Ok(Money::new(total, currency))
    }

    /// Balance of an account on its currency's available layer.
    pub fn available_balance(
        &self,
        chart: &str,
        code: &str,
        date: NaiveDate,
    ) -> Result<Money, LedgerError> {
        let currency = self.charts.chart(chart)?.effective_currency(code)?;
        let currency = resolve_currency(self.currencies.as_ref(), currency)?;
        self.account_balance(chart, code, date, &[LayerKind::Available.layer_id(&currency)])
    }

    /// Sum of every posted movement on one snapshot key, read from the
    /// transaction log.
    pub fn replay_balance(
        &self,
        journal: &str,
        account: &str,
        layer: u32,
    ) -> Result<Decimal, LedgerError> {
        Ok(self
            .transactions
            .movements(journal, account, layer)?
            .into_iter()
            .sum())
    }

    // ========== Pipeline ==========

    fn posted(&self, reference: TransactionRef) -> Result<Option<TransactionRecord>, LedgerError> {
        Ok(self
            .transactions
            .find(reference)?
            .filter(TransactionRecord::is_posted))
    }

    fn execute(&self, draft: Draft, now: DateTime<Utc>) -> Result<PostingResult, LedgerError> {
        match self.apply(&draft, now) {
            Ok(record) => {
                log_movements(record.reference, &record.journal, &record.postings);
                info!(
                    reference = %record.reference,
                    journal = %record.journal,
                    transaction_type = %record.transaction_type,
                    postings = record.postings.len(),
                    pending = record.pending,
                    "Transaction posted"
                );
                self.publish(&record, now);
                Ok(Self::result(record, false))
            }
            Err(err) => {
                self.limits.release(draft.reference);
                let journal = self
                    .journals
                    .resolve(&draft.chart, draft.post_date)
                    .map(|journal| journal.name.clone())
                    .unwrap_or_default();
                let failed = draft.record(
                    &journal,
                    TransactionStatus::Failed,
                    Vec::new(),
                    Vec::new(),
                    now,
                    Some(err.to_string()),
                );
                if let Err(save_err) = self.transactions.save(&failed) {
                    warn!(reference = %draft.reference, error = %save_err, "Failed to record failed transaction");
                }
                warn!(
                    reference = %draft.reference,
                    error = %err,
                    code = err.error_code(),
                    "Transaction failed"
                );
                Err(err)
            }
        }
    }

    fn apply(&self, draft: &Draft, now: DateTime<Utc>) -> Result<TransactionRecord, LedgerError> {
        let chart = self.charts.chart(&draft.chart)?;
        let postings = match &draft.fixed {
            Some(postings) => postings.clone(),
            None => self.derive_postings(&chart, draft)?,
        };
        if !is_balanced(&postings) {
            return Err(LedgerError::Internal(format!(
                "postings of {} do not balance",
                draft.reference
            )));
        }

        let journal = self.journals.resolve(&chart.code, draft.post_date)?;
        if !journal.is_open() {
            return Err(LedgerError::JournalClosed(journal.name.clone()));
        }
        if let Some(posting) = postings.iter().find(|posting| !journal.declares(posting.layer)) {
            return Err(LedgerError::LayerNotDeclared {
                journal: journal.name.clone(),
                layer: posting.layer,
            });
        }

        let is_reversal = draft.reverses.is_some();
        let mut keys: BTreeSet<SnapshotKey> = postings
            .iter()
            .map(|posting| SnapshotKey::new(&journal.name, &posting.account, posting.layer))
            .collect();
        keys.extend(
            required_balances(&journal, &chart, &postings, is_reversal)?
                .into_iter()
                .map(|(account, layer)| SnapshotKey::new(&journal.name, &account, layer)),
        );

        self.snapshots.with_locked_retrying(&keys, |locked| {
            let view = LockedView {
                journal: &journal.name,
                locked: &*locked,
            };
            run_rules(&RuleContext {
                journal: &journal,
                chart: &chart,
                post_date: draft.post_date,
                postings: &postings,
                is_reversal,
                balances: &view,
            })?;
            if draft.fixed.is_none() {
                self.check_limits(draft, &postings, &view, now)?;
            }

            let deltas = net_deltas(&journal.name, &postings);
            let applied = match locked.apply(&deltas) {
                Ok(applied) => applied,
                Err(err) => {
                    self.limits.release(draft.reference);
                    return Err(err);
                }
            };
            let running_balances = applied
                .into_iter()
                .map(|applied| RunningBalance {
                    account: applied.key.account,
                    layer: applied.key.layer,
                    version: applied.version,
                    previous_balance: applied.previous,
                    current_balance: applied.current,
                })
                .collect();

            let record = draft.record(
                &journal.name,
                TransactionStatus::Posted,
                postings.clone(),
                running_balances,
                now,
                None,
            );
            if let Err(err) = self.transactions.save(&record) {
                compensate(locked, &deltas, draft.reference, self.config.max_apply_retries);
                return Err(err.into());
            }
            Ok(record)
        })
    }

    fn derive_postings(
        &self,
        chart: &ChartOfAccounts,
        draft: &Draft,
    ) -> Result<Vec<Posting>, LedgerError> {
        require_entries(&draft.entries)?;
        let mut postings = Vec::with_capacity(draft.entries.len() * 2);
        for (index, entry) in draft.entries.iter().enumerate() {
            let debit = final_account(chart, &entry.debit_account)?;
            let credit = final_account(chart, &entry.credit_account)?;
            let expected = chart.effective_currency(&debit.code)?;
            let actual = chart.effective_currency(&credit.code)?;
            if expected != actual {
                return Err(LedgerError::CurrencyMismatch {
                    account: credit.code.clone(),
                    expected,
                    actual,
                });
            }
            let currency = resolve_currency(self.currencies.as_ref(), expected)?;
            validate_amount(entry.amount, &currency)?;

            let kind = match entry.layer_kind().map_err(LedgerError::UnknownLayer)? {
                Some(kind) => kind,
                None if draft.pending => LayerKind::Pending,
                None => LayerKind::Available,
            };
            postings.extend(entry_postings(
                index,
                entry,
                debit,
                credit,
                kind.layer_id(&currency),
                currency.code,
            ));
        }
        Ok(postings)
    }

    /// Checks and reserves every limited entry. The limited account is the
    /// debit account for debits and the credit account for credits.
    fn check_limits(
        &self,
        draft: &Draft,
        postings: &[Posting],
        balances: &dyn BalanceView,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let Some(context) = draft.limit else {
            return Ok(());
        };
        let side = match context.direction {
            Direction::Debit => Side::Debit,
            Direction::Credit => Side::Credit,
        };
        for (index, entry) in draft.entries.iter().enumerate() {
            if entry.kind() != EntryKind::Amount || entry.skip_limits() {
                continue;
            }
            let Some(posting) = postings
                .iter()
                .find(|posting| posting.entry_index == index && posting.side == side)
            else {
                continue;
            };
            let projected = balances.balance(&posting.account, posting.layer)
                + net_impact(postings, &posting.account, posting.layer);
            let request = LimitRequest {
                reference: draft.reference,
                profile_id: context.profile_id,
                transaction_type: draft.transaction_type.clone(),
                currency: posting.currency,
                amount: entry.amount,
                direction: context.direction,
                projected_balance: Some(projected),
                now,
            };
            if let LimitDecision::Rejected {
                kind,
                limit,
                attempted,
            } = self.limits.check_and_reserve(&request)?
            {
                return Err(LedgerError::LimitExceeded {
                    kind,
                    limit,
                    attempted,
                });
            }
        }
        Ok(())
    }

    fn publish(&self, record: &TransactionRecord, now: DateTime<Utc>) {
        let event = if let Some(original) = record.reverses {
            LedgerEvent::TransactionReversed {
                event_id: EventId::new(),
                original,
                reversal: record.reference,
                occurred_at: now,
            }
        } else {
            let Some(entry) = record.principal_entry() else {
                return;
            };
            let Some(currency) = record
                .postings
                .iter()
                .find(|posting| posting.account == entry.debit_account)
                .map(|posting| posting.currency)
            else {
                return;
            };
            LedgerEvent::TransactionCompleted {
                event_id: EventId::new(),
                reference: record.reference,
                transaction_type: record.transaction_type.clone(),
                group: record.group.clone(),
                sender_account: entry.debit_account.clone(),
                recipient_account: entry.credit_account.clone(),
                amount: Money::new(entry.amount, currency),
                merchant_id: record
                    .metadata
                    .get(META_MERCHANT_ID)
                    .and_then(Value::as_str)
                    .map(str::to_string),
                pending: record.pending,
                occurred_at: now,
            }
        };
        if let Err(err) = self.events.publish(&event) {
            warn!(reference = %record.reference, error = %err, "Event publish failed");
        }
    }

    fn result(record: TransactionRecord, replayed: bool) -> PostingResult {
        let (sender_balance, recipient_balance) = match record.principal_entry() {
            Some(entry) => (
                balance_after(&record, &entry.debit_account, Side::Debit),
                balance_after(&record, &entry.credit_account, Side::Credit),
            ),
            None => (None, None),
        };
        PostingResult {
            record,
            sender_balance,
            recipient_balance,
            replayed,
        }
    }
}

fn final_account<'c>(chart: &'c ChartOfAccounts, code: &str) -> Result<&'c Account, LedgerError> {
    let account = chart.resolve_account(code)?;
    if !account.is_final() {
        return Err(LedgerError::NotFinalAccount(code.to_string()));
    }
    Ok(account)
}

/// One delta per touched key; keys whose movements cancel out are skipped.
fn net_deltas(journal: &str, postings: &[Posting]) -> Vec<Delta> {
    let mut net: BTreeMap<(&str, u32), (Decimal, CurrencyCode)> = BTreeMap::new();
    for posting in postings {
        net.entry((posting.account.as_str(), posting.layer))
            .or_insert((Decimal::ZERO, posting.currency))
            .0 += posting.impact;
    }
    net.into_iter()
        .filter(|(_, (amount, _))| !amount.is_zero())
        .map(|((account, layer), (amount, currency))| Delta {
            key: SnapshotKey::new(journal, account, layer),
            amount,
            currency,
        })
        .collect()
}

/// Undoes applied deltas after the record could not be saved.
fn compensate(
    locked: &mut LockedSnapshots<'_>,
    deltas: &[Delta],
    reference: TransactionRef,
    retries: u32,
) {
    let undo: Vec<Delta> = deltas
        .iter()
        .map(|delta| Delta {
            amount: -delta.amount,
            ..delta.clone()
        })
        .collect();
    let mut attempt = 0;
    loop {
        match locked.apply(&undo) {
            Ok(_) => return,
            Err(LedgerError::ConcurrentModification) if attempt < retries => attempt += 1,
            Err(err) => {
                error!(%reference, error = %err, "Could not undo snapshot deltas of unsaved transaction");
                return;
            }
        }
    }
}

fn balance_after(record: &TransactionRecord, account: &str, side: Side) -> Option<Money> {
    let posting = record
        .postings
        .iter()
        .find(|posting| posting.account == account && posting.side == side)?;
    record
        .running_balances
        .iter()
        .find(|balance| balance.account == posting.account && balance.layer == posting.layer)
        .map(|balance| Money::new(balance.current_balance, posting.currency))
}
