//! Collaborator interfaces
//!
//! The engine owns no I/O of its own: persistence, content hashing, audit
//! logging and actor identity are reached through the traits below. In-memory
//! implementations live next to the coordinators that use them.

use crate::core::audit::AuditEntry;
use crate::types::{Aggregate, AggregateKey, EngineError, Versioned, Writer};

/// Handle of an open ledger transaction
pub type TxnId = u64;

/// Storage cell of one aggregate key
///
/// Removal leaves a tombstone (`aggregate: None`) that keeps the version
/// counter, so a key that is removed and re-created never reuses a version.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// 0 for a key that was never written
    pub version: u64,
    pub last_writer: Option<Writer>,
    pub aggregate: Option<Aggregate>,
}

impl Slot {
    pub fn vacant() -> Self {
        Slot {
            version: 0,
            last_writer: None,
            aggregate: None,
        }
    }

    pub fn to_versioned(&self) -> Option<Versioned> {
        Some(Versioned {
            aggregate: self.aggregate.clone()?,
            version: self.version,
            last_writer: self.last_writer.clone()?,
        })
    }
}

/// Transactional persistence with optimistic version checks
///
/// Writes are staged inside the store under a transaction handle, so callers
/// only hold the aggregates they are currently working on. `stage` rejects a
/// write whose `expected_version` no longer matches; `commit` re-checks every
/// staged write and applies all of them or none.
pub trait LedgerStore: Send + Sync {
    /// Committed state of an aggregate
    fn load(&self, key: &AggregateKey) -> Option<Versioned>;

    /// Committed invoices, advances and receipts of one customer
    fn documents_of(&self, customer_tax_id: &str) -> Vec<Versioned>;

    fn begin(&self) -> TxnId;

    /// Current slot as seen by `txn`, staged writes included
    fn read(&self, txn: TxnId, key: &AggregateKey) -> Slot;

    /// Stage a write made against `expected_version`
    fn stage(
        &self,
        txn: TxnId,
        key: AggregateKey,
        expected_version: u64,
        slot: Slot,
    ) -> Result<(), EngineError>;

    /// Apply every staged write atomically, returning how many were applied
    fn commit(&self, txn: TxnId) -> Result<usize, EngineError>;

    /// Discard staged writes
    fn abort(&self, txn: TxnId);
}

/// Hash of uploaded file contents
pub trait ContentHasher: Send + Sync {
    fn hash(&self, bytes: &[u8]) -> String;
}

/// Destination of audit entries
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Supplies the acting user for audit attribution
pub trait ActorProvider: Send + Sync {
    fn current_actor(&self) -> String;
}
