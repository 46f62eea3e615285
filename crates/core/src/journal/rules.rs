//! Posting rules and the registry that binds rule ids to implementations.
//!
//! Rules run under the snapshot locks of the posting being checked. A rule
//! that reads balances declares which ones via [`JournalRule::balance_scope`]
//! so the engine locks them before the rule runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::types::{BoundRule, Journal, RuleDefinition};
use crate::chart::ChartOfAccounts;
use crate::ledger::LedgerError;
use crate::ledger::balance::Side;
use crate::ledger::types::Posting;

/// Read access to pre-posting balances held under lock.
pub trait BalanceView {
    /// Balance of `account` on `layer` before the posting is applied.
    fn balance(&self, account: &str, layer: u32) -> Decimal;
}

/// Everything a rule may inspect.
pub struct RuleContext<'a> {
    /// Journal being posted to.
    pub journal: &'a Journal,
    /// Chart the accounts belong to.
    pub chart: &'a ChartOfAccounts,
    /// Effective posting date.
    pub post_date: NaiveDate,
    /// Postings of the transaction.
    pub postings: &'a [Posting],
    /// True when posting a reversal.
    pub is_reversal: bool,
    /// Locked balances.
    pub balances: &'a dyn BalanceView,
}

/// Balances a rule reads, beyond the postings themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceScope {
    /// No balances.
    None,
    /// Balances of the posted accounts inside the rule's scope.
    PostedAccounts,
    /// Balances of every final account under the rule's composite account.
    Composite,
}

/// A posting rule.
pub trait JournalRule: Send + Sync {
    /// Checks the transaction; `Err` carries the rejection reason.
    fn check(&self, ctx: &RuleContext<'_>, rule: &RuleDefinition) -> Result<(), String>;

    /// Balances this rule reads.
    fn balance_scope(&self) -> BalanceScope {
        BalanceScope::None
    }
}

/// Maps rule ids to implementations.
#[derive(Clone)]
pub struct RuleRegistry {
    rules: HashMap<String, Arc<dyn JournalRule>>,
}

impl std::fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.rules.keys().collect();
        ids.sort();
        f.debug_struct("RuleRegistry").field("rules", &ids).finish()
    }
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl RuleRegistry {
    /// Registry id of [`CanPost`].
    pub const CAN_POST: &'static str = "can-post";
    /// Registry id of [`DoubleEntry`].
    pub const DOUBLE_ENTRY: &'static str = "double-entry";
    /// Registry id of the final-account minimum balance rule.
    pub const FINAL_MIN_BALANCE: &'static str = "final-min-balance";
    /// Registry id of the final-account maximum balance rule.
    pub const FINAL_MAX_BALANCE: &'static str = "final-max-balance";
    /// Registry id of the composite minimum balance rule.
    pub const COMPOSITE_MIN_BALANCE: &'static str = "composite-min-balance";
    /// Registry id of the composite maximum balance rule.
    pub const COMPOSITE_MAX_BALANCE: &'static str = "composite-max-balance";

    /// An empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// A registry holding the built-in rules.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(Self::CAN_POST, Arc::new(CanPost));
        registry.register(Self::DOUBLE_ENTRY, Arc::new(DoubleEntry));
        registry.register(Self::FINAL_MIN_BALANCE, Arc::new(FinalBalance(Bound::Min)));
        registry.register(Self::FINAL_MAX_BALANCE, Arc::new(FinalBalance(Bound::Max)));
        registry.register(Self::COMPOSITE_MIN_BALANCE, Arc::new(CompositeBalance(Bound::Min)));
        registry.register(Self::COMPOSITE_MAX_BALANCE, Arc::new(CompositeBalance(Bound::Max)));
        registry
    }

    /// Adds or replaces a rule implementation.
    pub fn register(&mut self, id: &str, rule: Arc<dyn JournalRule>) {
        self.rules.insert(id.to_string(), rule);
    }

    /// Binds a definition to its implementation.
    pub fn bind(&self, definition: RuleDefinition) -> Result<BoundRule, LedgerError> {
        let rule = self
            .rules
            .get(&definition.rule_id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownRule(definition.rule_id.clone()))?;
        Ok(BoundRule { definition, rule })
    }
}

/// Runs the journal's rules in order, stopping at the first violation.
pub fn run_rules(ctx: &RuleContext<'_>) -> Result<(), LedgerError> {
    for bound in &ctx.journal.rules {
        if ctx.is_reversal && bound.definition.reversal_exempt {
            continue;
        }
        bound
            .rule
            .check(ctx, &bound.definition)
            .map_err(|reason| LedgerError::RuleViolation {
                rule: bound.definition.name.clone(),
                reason,
            })?;
    }
    Ok(())
}

/// (account, layer) pairs whose balances the journal's rules read for
/// `postings`.
pub fn required_balances(
    journal: &Journal,
    chart: &ChartOfAccounts,
    postings: &[Posting],
    is_reversal: bool,
) -> Result<BTreeSet<(String, u32)>, LedgerError> {
    let mut keys = BTreeSet::new();
    for bound in &journal.rules {
        if is_reversal && bound.definition.reversal_exempt {
            continue;
        }
        let def = &bound.definition;
        let layers = layers_for(def, postings);
        match bound.rule.balance_scope() {
            BalanceScope::None => {}
            BalanceScope::PostedAccounts => {
                for posting in postings_in_scope(chart, def, postings, &layers) {
                    keys.extend(layers.iter().map(|layer| (posting.account.clone(), *layer)));
                }
            }
            BalanceScope::Composite => {
                let Some(scope) = def.account.as_deref() else {
                    continue;
                };
                if postings_in_scope(chart, def, postings, &layers).next().is_none() {
                    continue;
                }
                for account in chart.final_descendants(scope)? {
                    keys.extend(layers.iter().map(|layer| (account.code.clone(), *layer)));
                }
            }
        }
    }
    Ok(keys)
}

fn layers_for(def: &RuleDefinition, postings: &[Posting]) -> BTreeSet<u32> {
    if def.layers.is_empty() {
        postings.iter().map(|posting| posting.layer).collect()
    } else {
        def.layers.iter().copied().collect()
    }
}

fn postings_in_scope<'p>(
    chart: &'p ChartOfAccounts,
    def: &'p RuleDefinition,
    postings: &'p [Posting],
    layers: &'p BTreeSet<u32>,
) -> impl Iterator<Item = &'p Posting> {
    postings.iter().filter(move |posting| {
        layers.contains(&posting.layer)
            && def
                .account
                .as_deref()
                .is_none_or(|scope| chart.is_within(&posting.account, scope))
    })
}

fn parse_param(def: &RuleDefinition) -> Result<Decimal, String> {
    def.param
        .as_deref()
        .and_then(|param| param.trim().parse::<Decimal>().ok())
        .ok_or_else(|| format!("invalid parameter {:?}", def.param))
}

/// Rejects postings to closed journals, outside the journal period, on or
/// before the lock date, or to expired accounts.
#[derive(Debug, Clone, Copy)]
pub struct CanPost;

impl JournalRule for CanPost {
    fn check(&self, ctx: &RuleContext<'_>, _rule: &RuleDefinition) -> Result<(), String> {
        let journal = ctx.journal;
        if !journal.is_open() {
            return Err(format!("journal {} is closed", journal.name));
        }
        if !journal.covers(ctx.post_date) {
            return Err(format!(
                "post date {} outside journal period {}..{}",
                ctx.post_date, journal.start, journal.end
            ));
        }
        if let Some(lock_date) = journal.lock_date {
            if ctx.post_date <= lock_date {
                return Err(format!(
                    "post date {} is on or before lock date {lock_date}",
                    ctx.post_date
                ));
            }
        }
        for posting in ctx.postings {
            if let Some(account) = ctx.chart.account(&posting.account) {
                if account.is_expired_on(ctx.post_date) {
                    return Err(format!("account {} has expired", account.code));
                }
            }
        }
        Ok(())
    }
}

/// Requires debits to equal credits on every layer the rule covers.
#[derive(Debug, Clone, Copy)]
pub struct DoubleEntry;

impl JournalRule for DoubleEntry {
    fn check(&self, ctx: &RuleContext<'_>, rule: &RuleDefinition) -> Result<(), String> {
        let layers = layers_for(rule, ctx.postings);
        let mut totals: BTreeMap<u32, (Decimal, Decimal)> = BTreeMap::new();
        for posting in postings_in_scope(ctx.chart, rule, ctx.postings, &layers) {
            let (debit, credit) = totals.entry(posting.layer).or_default();
            match posting.side {
                Side::Debit => *debit += posting.amount,
                Side::Credit => *credit += posting.amount,
            }
        }
        for (layer, (debit, credit)) in totals {
            if debit != credit {
                return Err(format!(
                    "layer {layer} is unbalanced: debits {debit}, credits {credit}"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    Min,
    Max,
}

impl Bound {
    fn violated(self, total: Decimal, limit: Decimal) -> bool {
        match self {
            Self::Min => total < limit,
            Self::Max => total > limit,
        }
    }

    fn describe(self) -> &'static str {
        match self {
            Self::Min => "below minimum",
            Self::Max => "above maximum",
        }
    }
}

/// Bounds the resulting balance of each posted final account, summed over
/// the rule's layers.
#[derive(Debug, Clone, Copy)]
struct FinalBalance(Bound);

impl JournalRule for FinalBalance {
    fn check(&self, ctx: &RuleContext<'_>, rule: &RuleDefinition) -> Result<(), String> {
        let limit = parse_param(rule)?;
        let layers = layers_for(rule, ctx.postings);
        let mut impacts: BTreeMap<&str, Decimal> = BTreeMap::new();
        for posting in postings_in_scope(ctx.chart, rule, ctx.postings, &layers) {
            *impacts.entry(posting.account.as_str()).or_default() += posting.impact;
        }
        for (account, impact) in impacts {
            let current: Decimal = layers
                .iter()
                .map(|layer| ctx.balances.balance(account, *layer))
                .sum();
            let total = current + impact;
            if self.0.violated(total, limit) {
                return Err(format!(
                    "account {account} balance {total} {} {limit}",
                    self.0.describe()
                ));
            }
        }
        Ok(())
    }

    fn balance_scope(&self) -> BalanceScope {
        BalanceScope::PostedAccounts
    }
}

/// Bounds the aggregate balance of a composite account after the posting.
#[derive(Debug, Clone, Copy)]
struct CompositeBalance(Bound);

impl JournalRule for CompositeBalance {
    fn check(&self, ctx: &RuleContext<'_>, rule: &RuleDefinition) -> Result<(), String> {
        let Some(scope) = rule.account.as_deref() else {
            return Err("composite balance rule requires an account".to_string());
        };
        let limit = parse_param(rule)?;
        let layers = layers_for(rule, ctx.postings);
        let impact: Decimal = postings_in_scope(ctx.chart, rule, ctx.postings, &layers)
            .map(|posting| posting.impact)
            .sum();
        if postings_in_scope(ctx.chart, rule, ctx.postings, &layers).next().is_none() {
            return Ok(());
        }
        let finals = ctx
            .chart
            .final_descendants(scope)
            .map_err(|err| err.to_string())?;
        let current: Decimal = finals
            .iter()
            .flat_map(|account| layers.iter().map(move |layer| (account, *layer)))
            .map(|(account, layer)| ctx.balances.balance(&account.code, layer))
            .sum();
        let total = current + impact;
        if self.0.violated(total, limit) {
            return Err(format!(
                "composite {scope} balance {total} {} {limit}",
                self.0.describe()
            ));
        }
        Ok(())
    }

    fn balance_scope(&self) -> BalanceScope {
        BalanceScope::Composite
    }
}
