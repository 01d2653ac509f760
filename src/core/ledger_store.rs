//! In-memory balance ledger
//!
//! [`InMemoryLedger`] implements [`LedgerStore`] on top of `DashMap`s: one for
//! committed slots and one for the staged writes of every open transaction.
//! A commit takes the ledger's write gate, re-validates every staged
//! `expected_version` against the committed slots and then applies the whole
//! write set, so readers never observe half of a commit.
//!
//! [`LedgerTransaction`] is the RAII handle coordinators use: it computes the
//! next version of each write and aborts the store transaction when dropped
//! without a commit.

use crate::core::traits::{LedgerStore, Slot, TxnId};
use crate::types::{Aggregate, AggregateKey, EngineError, Versioned, Writer};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone)]
struct StagedWrite {
    expected_version: u64,
    slot: Slot,
}

/// Thread-safe ledger with optimistic concurrency
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    committed: DashMap<AggregateKey, Slot>,
    open: DashMap<TxnId, BTreeMap<AggregateKey, StagedWrite>>,
    next_txn: AtomicU64,
    /// Held for reading by `load`, for writing by `commit`
    gate: RwLock<()>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn committed_slot(&self, key: &AggregateKey) -> Slot {
        self.committed
            .get(key)
            .map(|slot| slot.value().clone())
            .unwrap_or_else(Slot::vacant)
    }

    /// Number of live (non-removed) aggregates
    pub fn len(&self) -> usize {
        let _read = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.committed
            .iter()
            .filter(|slot| slot.aggregate.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LedgerStore for InMemoryLedger {
    fn load(&self, key: &AggregateKey) -> Option<Versioned> {
        let _read = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.committed.get(key).and_then(|slot| slot.to_versioned())
    }

    fn documents_of(&self, customer_tax_id: &str) -> Vec<Versioned> {
        let customer = AggregateKey::customer(customer_tax_id);
        let _read = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let mut documents: Vec<Versioned> = self
            .committed
            .iter()
            .filter_map(|slot| slot.to_versioned())
            .filter(|versioned| {
                versioned
                    .aggregate
                    .as_document()
                    .is_some_and(|document| document.customer_key() == customer)
            })
            .collect();
        documents.sort_by_key(|versioned| versioned.aggregate.key());
        documents
    }

    fn begin(&self) -> TxnId {
        let txn = self.next_txn.fetch_add(1, Ordering::Relaxed) + 1;
        self.open.insert(txn, BTreeMap::new());
        txn
    }

    fn read(&self, txn: TxnId, key: &AggregateKey) -> Slot {
        let staged = self
            .open
            .get(&txn)
            .and_then(|writes| writes.get(key).map(|write| write.slot.clone()));
        match staged {
            Some(slot) => slot,
            None => {
                let _read = self.gate.read().unwrap_or_else(PoisonError::into_inner);
                self.committed_slot(key)
            }
        }
    }

    fn stage(
        &self,
        txn: TxnId,
        key: AggregateKey,
        expected_version: u64,
        slot: Slot,
    ) -> Result<(), EngineError> {
        let mut writes = self
            .open
            .get_mut(&txn)
            .ok_or_else(|| {
                EngineError::invariant(None, format!("transaction {} is not open", txn))
            })?;

        if let Some(staged) = writes.get_mut(&key) {
            if staged.slot.version != expected_version {
                return Err(EngineError::version_conflict(
                    &key,
                    expected_version,
                    staged.slot.version,
                ));
            }
            staged.slot = slot;
            return Ok(());
        }

        let current = {
            let _read = self.gate.read().unwrap_or_else(PoisonError::into_inner);
            self.committed_slot(&key).version
        };
        if current != expected_version {
            return Err(EngineError::version_conflict(&key, expected_version, current));
        }
        writes.insert(
            key,
            StagedWrite {
                expected_version,
                slot,
            },
        );
        Ok(())
    }

    fn commit(&self, txn: TxnId) -> Result<usize, EngineError> {
        let (_, writes) = self
            .open
            .remove(&txn)
            .ok_or_else(|| {
                EngineError::invariant(None, format!("transaction {} is not open", txn))
            })?;

        let _write = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        for (key, staged) in &writes {
            let current = self.committed_slot(key).version;
            if current != staged.expected_version {
                tracing::debug!(
                    txn,
                    %key,
                    expected = staged.expected_version,
                    found = current,
                    "commit rejected"
                );
                return Err(EngineError::version_conflict(
                    key,
                    staged.expected_version,
                    current,
                ));
            }
        }

        let applied = writes.len();
        for (key, staged) in writes {
            self.committed.insert(key, staged.slot);
        }
        Ok(applied)
    }

    fn abort(&self, txn: TxnId) {
        self.open.remove(&txn);
    }
}

/// Open transaction against a [`LedgerStore`]
///
/// Dropping the handle without calling [`commit`](Self::commit) discards
/// every staged write.
pub struct LedgerTransaction<'s> {
    store: &'s dyn LedgerStore,
    txn: TxnId,
    finished: bool,
}

impl<'s> LedgerTransaction<'s> {
    pub fn begin(store: &'s dyn LedgerStore) -> Self {
        let txn = store.begin();
        Self {
            store,
            txn,
            finished: false,
        }
    }

    /// Aggregate as seen by this transaction
    pub fn get(&self, key: &AggregateKey) -> Option<Versioned> {
        self.store.read(self.txn, key).to_versioned()
    }

    /// Create an aggregate that must not exist yet
    pub fn insert(
        &mut self,
        aggregate: Aggregate,
        writer: &Writer,
    ) -> Result<Versioned, EngineError> {
        let key = aggregate.key();
        let slot = self.store.read(self.txn, &key);
        if slot.aggregate.is_some() {
            return Err(EngineError::duplicate_aggregate(&key));
        }
        let version = self.write(key, slot.version, Some(aggregate.clone()), writer)?;
        Ok(Versioned {
            aggregate,
            version,
            last_writer: writer.clone(),
        })
    }

    /// Replace an aggregate read earlier at `read.version`
    pub fn update(
        &mut self,
        read: &Versioned,
        aggregate: Aggregate,
        writer: &Writer,
    ) -> Result<Versioned, EngineError> {
        let key = read.aggregate.key();
        if aggregate.key() != key {
            return Err(EngineError::invariant(
                None,
                format!("update of {} would change its key", key),
            ));
        }
        let version = self.write(key, read.version, Some(aggregate.clone()), writer)?;
        Ok(Versioned {
            aggregate,
            version,
            last_writer: writer.clone(),
        })
    }

    /// Remove an aggregate read earlier at `read.version`
    pub fn remove(&mut self, read: &Versioned, writer: &Writer) -> Result<(), EngineError> {
        let key = read.aggregate.key();
        self.write(key, read.version, None, writer).map(|_| ())
    }

    /// Stage one write; every write moves the version forward by exactly one
    fn write(
        &mut self,
        key: AggregateKey,
        expected_version: u64,
        aggregate: Option<Aggregate>,
        writer: &Writer,
    ) -> Result<u64, EngineError> {
        let version = expected_version + 1;
        let slot = Slot {
            version,
            last_writer: Some(writer.clone()),
            aggregate,
        };
        self.store.stage(self.txn, key, expected_version, slot)?;
        Ok(version)
    }

    pub fn commit(mut self) -> Result<usize, EngineError> {
        self.finished = true;
        self.store.commit(self.txn)
    }
}

impl Drop for LedgerTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.abort(self.txn);
        }
    }
}
