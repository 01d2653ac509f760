//! Chunk-scoped aggregate tracking
//!
//! A commit never holds the whole batch's aggregates in memory. Each chunk of
//! rows loads the aggregates it needs into an [`AggregateArena`], mutates them
//! in place and flushes the dirty ones into the open ledger transaction, after
//! which the arena is empty again. The arena records the most aggregates it
//! ever tracked at once so callers can verify the bound.
//!
//! Every flushed write is folded into a [`CommitJournal`]: the batch's
//! rollback record and the source of its audit entries.

use crate::core::ledger_store::LedgerTransaction;
use crate::core::traits::LedgerStore;
use crate::types::{Aggregate, AggregateKey, AggregateKind, EngineError, Versioned, Writer};
use rust_decimal::Decimal;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

/// One aggregate write, as flushed to the ledger transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key: AggregateKey,
    pub before: Option<Versioned>,
    pub after: Option<Versioned>,
}

#[derive(Debug)]
struct Tracked {
    original: Option<Versioned>,
    current: Option<Aggregate>,
    dirty: bool,
}

/// Aggregates loaded by the current chunk
#[derive(Debug, Default)]
pub struct AggregateArena {
    entries: BTreeMap<AggregateKey, Tracked>,
    peak: usize,
}

impl AggregateArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of aggregates currently tracked
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest number of aggregates tracked at any one time
    pub fn peak(&self) -> usize {
        self.peak
    }

    fn track(&mut self, txn: &LedgerTransaction<'_>, key: &AggregateKey) -> &mut Tracked {
        let tracked_if_new = self.entries.len() + 1;
        match self.entries.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.peak = self.peak.max(tracked_if_new);
                let original = txn.get(key);
                let current = original.as_ref().map(|versioned| versioned.aggregate.clone());
                entry.insert(Tracked {
                    original,
                    current,
                    dirty: false,
                })
            }
        }
    }

    /// Read an aggregate, loading it through `txn` on first access
    pub fn get(&mut self, txn: &LedgerTransaction<'_>, key: &AggregateKey) -> Option<&Aggregate> {
        self.track(txn, key).current.as_ref()
    }

    /// Mutable access; the aggregate is written back on the next flush
    pub fn get_mut(
        &mut self,
        txn: &LedgerTransaction<'_>,
        key: &AggregateKey,
    ) -> Option<&mut Aggregate> {
        let tracked = self.track(txn, key);
        let current = tracked.current.as_mut()?;
        tracked.dirty = true;
        Some(current)
    }

    /// Track a new aggregate; fails if the key is already live
    pub fn insert(
        &mut self,
        txn: &LedgerTransaction<'_>,
        aggregate: Aggregate,
    ) -> Result<(), EngineError> {
        let key = aggregate.key();
        let tracked = self.track(txn, &key);
        if tracked.current.is_some() {
            return Err(EngineError::duplicate_aggregate(&key));
        }
        tracked.current = Some(aggregate);
        tracked.dirty = true;
        Ok(())
    }

    /// Stage every dirty aggregate into `txn` and forget all tracked state
    pub fn flush(
        &mut self,
        txn: &mut LedgerTransaction<'_>,
        writer: &Writer,
    ) -> Result<Vec<Change>, EngineError> {
        let entries = std::mem::take(&mut self.entries);
        let mut changes = Vec::new();

        for (key, tracked) in entries {
            if !tracked.dirty {
                continue;
            }
            let after = match (&tracked.original, tracked.current) {
                (None, Some(aggregate)) => Some(txn.insert(aggregate, writer)?),
                (Some(read), Some(aggregate)) => Some(txn.update(read, aggregate, writer)?),
                (Some(read), None) => {
                    txn.remove(read, writer)?;
                    None
                }
                (None, None) => continue,
            };
            changes.push(Change {
                key,
                before: tracked.original,
                after,
            });
        }

        Ok(changes)
    }
}

/// Net effect of a batch on one document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTrace {
    /// State before the batch first wrote the document; `None` if it created it
    pub before: Option<Versioned>,
    /// Version the batch left behind
    pub after_version: u64,
}

/// Net effect of a batch on one customer
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerTrace {
    /// State before the batch first wrote the customer; `None` if it created it
    pub before: Option<Versioned>,
    pub after_version: u64,
    /// Balance contributed by the batch
    pub delta: Decimal,
}

/// Everything a committed batch wrote
///
/// Only aggregates that existed before the batch keep a snapshot, so the
/// journal of a batch that inserts rows holds keys and versions alone. The
/// state the batch left is read back from the ledger when needed.
///
/// Documents are restored from `before` on rollback, guarded by the recorded
/// version. Customer balances are derived, so only the net delta the batch
/// contributed is reversed for them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitJournal {
    pub documents: BTreeMap<AggregateKey, DocumentTrace>,
    pub customers: BTreeMap<AggregateKey, CustomerTrace>,
}

impl CommitJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.customers.is_empty()
    }

    /// Aggregate snapshots held by the journal
    pub fn snapshot_count(&self) -> usize {
        let documents = self.documents.values().filter(|t| t.before.is_some());
        let customers = self.customers.values().filter(|t| t.before.is_some());
        documents.count() + customers.count()
    }

    /// Fold one flushed write into the journal
    pub fn record(&mut self, change: Change) -> Result<(), EngineError> {
        let Some(after) = change.after else {
            return Err(EngineError::invariant(
                None,
                format!("commit removed {}", change.key),
            ));
        };

        if change.key.kind == AggregateKind::Customer {
            let delta = balance_of(Some(&after)) - balance_of(change.before.as_ref());
            let trace = self
                .customers
                .entry(change.key)
                .or_insert_with(|| CustomerTrace {
                    before: change.before,
                    after_version: 0,
                    delta: Decimal::ZERO,
                });
            trace.after_version = after.version;
            trace.delta += delta;
            return Ok(());
        }

        self.documents
            .entry(change.key)
            .and_modify(|trace| trace.after_version = after.version)
            .or_insert(DocumentTrace {
                before: change.before,
                after_version: after.version,
            });
        Ok(())
    }

    /// First and last state of every aggregate the batch wrote, customers first
    ///
    /// The after state is loaded from `ledger` one aggregate at a time. It is
    /// `None` when a later writer has already moved the aggregate on.
    pub fn net_changes<'a>(
        &'a self,
        ledger: &'a dyn LedgerStore,
    ) -> impl Iterator<Item = Change> + 'a {
        let customers = self
            .customers
            .iter()
            .map(|(key, trace)| (key, &trace.before, trace.after_version));
        let documents = self
            .documents
            .iter()
            .map(|(key, trace)| (key, &trace.before, trace.after_version));
        customers
            .chain(documents)
            .map(move |(key, before, after_version)| Change {
                key: key.clone(),
                before: before.clone(),
                after: ledger
                    .load(key)
                    .filter(|versioned| versioned.version == after_version),
            })
    }
}

fn balance_of(versioned: Option<&Versioned>) -> Decimal {
    versioned
        .and_then(|versioned| versioned.aggregate.as_customer())
        .map_or(Decimal::ZERO, |customer| customer.current_balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger_store::InMemoryLedger;
    use crate::types::Customer;

    fn customer(tax_id: &str, balance: i64) -> Aggregate {
        let mut customer = Customer::new(tax_id, None);
        customer.adjust_balance(Decimal::new(balance, 0));
        Aggregate::Customer(customer)
    }

    #[test]
    fn test_flush_stages_only_dirty_aggregates() {
        let ledger = InMemoryLedger::new();
        let mut seed = LedgerTransaction::begin(&ledger);
        seed.insert(customer("T1", 0), &Writer::Reconcile).unwrap();
        seed.insert(customer("T2", 0), &Writer::Reconcile).unwrap();
        seed.commit().unwrap();

        let mut txn = LedgerTransaction::begin(&ledger);
        let mut arena = AggregateArena::new();
        assert!(arena.get(&txn, &AggregateKey::customer("T1")).is_some());
        if let Some(Aggregate::Customer(c)) = arena.get_mut(&txn, &AggregateKey::customer("T2")) {
            c.adjust_balance(Decimal::new(5, 0));
        }
        arena.insert(&txn, customer("T3", 7)).unwrap();
        assert_eq!(arena.len(), 3);

        let changes = arena.flush(&mut txn, &Writer::Batch(1)).unwrap();
        let keys: Vec<String> = changes.iter().map(|c| c.key.to_string()).collect();
        assert_eq!(keys, vec!["customer:T2", "customer:T3"]);
        assert!(arena.is_empty());
        assert_eq!(arena.peak(), 3);

        txn.commit().unwrap();
        assert_eq!(ledger.load(&AggregateKey::customer("T2")).unwrap().version, 2);
        assert_eq!(ledger.load(&AggregateKey::customer("T3")).unwrap().version, 1);
    }

    #[test]
    fn test_insert_over_live_key_is_rejected() {
        let ledger = InMemoryLedger::new();
        let txn = LedgerTransaction::begin(&ledger);
        let mut arena = AggregateArena::new();
        arena.insert(&txn, customer("T1", 0)).unwrap();
        assert!(matches!(
            arena.insert(&txn, customer("t1", 0)),
            Err(EngineError::DuplicateAggregate { .. })
        ));
    }

    #[test]
    fn test_journal_accumulates_customer_delta_across_chunks() {
        let ledger = InMemoryLedger::new();
        let mut txn = LedgerTransaction::begin(&ledger);
        let mut journal = CommitJournal::new();
        let key = AggregateKey::customer("T1");

        let mut arena = AggregateArena::new();
        arena.insert(&txn, customer("T1", 100)).unwrap();
        for change in arena.flush(&mut txn, &Writer::Batch(1)).unwrap() {
            journal.record(change).unwrap();
        }

        if let Some(Aggregate::Customer(c)) = arena.get_mut(&txn, &key) {
            c.adjust_balance(Decimal::new(50, 0));
        }
        for change in arena.flush(&mut txn, &Writer::Batch(1)).unwrap() {
            journal.record(change).unwrap();
        }

        assert_eq!(journal.customers[&key].delta, Decimal::new(150, 0));
        assert_eq!(journal.customers[&key].after_version, 2);
        txn.commit().unwrap();

        let net: Vec<Change> = journal.net_changes(&ledger).collect();
        assert_eq!(net.len(), 1);
        assert!(net[0].before.is_none());
        assert_eq!(net[0].after.as_ref().unwrap().version, 2);
    }

    #[test]
    fn test_journal_keeps_snapshots_only_for_prior_state() {
        let ledger = InMemoryLedger::new();
        let mut seed = LedgerTransaction::begin(&ledger);
        seed.insert(customer("T1", 10), &Writer::Reconcile).unwrap();
        seed.commit().unwrap();

        let mut txn = LedgerTransaction::begin(&ledger);
        let mut arena = AggregateArena::new();
        let mut journal = CommitJournal::new();
        if let Some(Aggregate::Customer(c)) = arena.get_mut(&txn, &AggregateKey::customer("T1")) {
            c.adjust_balance(Decimal::new(5, 0));
        }
        for n in 2..40 {
            arena.insert(&txn, customer(&format!("T{}", n), 1)).unwrap();
        }
        for change in arena.flush(&mut txn, &Writer::Batch(1)).unwrap() {
            journal.record(change).unwrap();
        }

        assert_eq!(journal.customers.len(), 39);
        assert_eq!(journal.snapshot_count(), 1);
    }

    #[test]
    fn test_net_changes_drop_after_state_moved_on_by_later_writer() {
        let ledger = InMemoryLedger::new();
        let key = AggregateKey::customer("T1");
        let mut txn = LedgerTransaction::begin(&ledger);
        let mut arena = AggregateArena::new();
        let mut journal = CommitJournal::new();
        arena.insert(&txn, customer("T1", 3)).unwrap();
        for change in arena.flush(&mut txn, &Writer::Batch(1)).unwrap() {
            journal.record(change).unwrap();
        }
        txn.commit().unwrap();

        let mut later = LedgerTransaction::begin(&ledger);
        let read = later.get(&key).unwrap();
        later
            .update(&read, read.aggregate.clone(), &Writer::Reconcile)
            .unwrap();
        later.commit().unwrap();

        let net: Vec<Change> = journal.net_changes(&ledger).collect();
        assert!(net[0].after.is_none());
    }
}
