//! Audit trail
//!
//! Every mutation of a ledger aggregate or batch lifecycle transition produces
//! an [`AuditEntry`] with JSON snapshots of the entity before and after.

use crate::core::traits::{ActorProvider, AuditSink, ContentHasher};
use crate::types::{AggregateKey, ImportBatch, Versioned};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Commit,
    Rollback,
    Cancel,
    Allocate,
    Reconcile,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuditAction::Commit => "commit",
            AuditAction::Rollback => "rollback",
            AuditAction::Cancel => "cancel",
            AuditAction::Allocate => "allocate",
            AuditAction::Reconcile => "reconcile",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    /// `customer`, `invoice`, `advance`, `receipt` or `batch`
    pub entity_type: String,
    pub entity_id: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub actor: String,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    /// Entry for one aggregate write
    pub fn aggregate(
        action: AuditAction,
        key: &AggregateKey,
        before: Option<&Versioned>,
        after: Option<&Versioned>,
        actor: &str,
    ) -> Self {
        AuditEntry {
            action,
            entity_type: key.kind.as_str().to_string(),
            entity_id: key.id.clone(),
            before: before.and_then(snapshot),
            after: after.and_then(snapshot),
            actor: actor.to_string(),
            at: Utc::now(),
        }
    }

    /// Entry for a batch lifecycle transition
    pub fn batch(
        action: AuditAction,
        before: &ImportBatch,
        after: &ImportBatch,
        actor: &str,
    ) -> Self {
        AuditEntry {
            action,
            entity_type: "batch".to_string(),
            entity_id: after.id.to_string(),
            before: snapshot(before),
            after: snapshot(after),
            actor: actor.to_string(),
            at: Utc::now(),
        }
    }
}

fn snapshot<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!("failed to snapshot audit value: {err}");
            None
        }
    }
}

/// Audit sink keeping entries in memory, in arrival order
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for InMemoryAuditLog {
    fn record(&self, entry: AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

/// Audit sink that emits entries as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "ledger_import_engine::audit",
            action = %entry.action,
            entity_type = %entry.entity_type,
            entity_id = %entry.entity_id,
            actor = %entry.actor,
            before = ?entry.before,
            after = ?entry.after,
            "audit"
        );
    }
}

/// Actor provider returning a fixed identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticActor(pub String);

impl StaticActor {
    pub fn new(actor: impl Into<String>) -> Self {
        Self(actor.into())
    }
}

impl ActorProvider for StaticActor {
    fn current_actor(&self) -> String {
        self.0.clone()
    }
}

/// SHA-256 content hash, lowercase hex
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl ContentHasher for Sha256Hasher {
    fn hash(&self, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Aggregate, Customer, Writer};

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            Sha256Hasher.hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_aggregate_entry_snapshots() {
        let after = Versioned {
            aggregate: Aggregate::Customer(Customer::new("T1", Some("Acme".to_string()))),
            version: 1,
            last_writer: Writer::Batch(4),
        };
        let entry = AuditEntry::aggregate(
            AuditAction::Commit,
            &after.aggregate.key(),
            None,
            Some(&after),
            "clerk",
        );

        assert_eq!(entry.entity_type, "customer");
        assert_eq!(entry.entity_id, "T1");
        assert!(entry.before.is_none());
        let after_json = entry.after.unwrap();
        assert_eq!(after_json["version"], 1);
        assert_eq!(after_json["aggregate"]["name"], "Acme");
    }

    #[test]
    fn test_in_memory_log_keeps_order() {
        let log = InMemoryAuditLog::new();
        for id in ["a", "b"] {
            log.record(AuditEntry {
                action: AuditAction::Cancel,
                entity_type: "batch".to_string(),
                entity_id: id.to_string(),
                before: None,
                after: None,
                actor: "system".to_string(),
                at: Utc::now(),
            });
        }
        let ids: Vec<String> = log.entries().into_iter().map(|e| e.entity_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
