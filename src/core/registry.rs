//! Batch registry
//!
//! Maps `(file hash, idempotency key)` to import batches and owns every batch
//! lifecycle transition:
//!
//! ```text
//! Staging --commit--> Committed --rollback--> Cancelled
//!    \--------------cancel-------------------^
//! ```
//!
//! # Thread Safety
//!
//! Identities are claimed through a single `DashMap` entry, so concurrent
//! uploads of the same content with the same key agree on one batch, and the
//! winner's rows are staged before the claim is released. Commit,
//! rollback and cancel of one batch exclude each other through a busy set;
//! the loser gets a retryable [`EngineError::BatchBusy`].

use crate::core::arena::CommitJournal;
use crate::types::{BatchId, BatchStatus, EngineError, ImportBatch, NewBatch};
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};

type Identity = (String, Option<String>);

/// Thread-safe store of import batches
#[derive(Debug, Default)]
pub struct BatchRegistry {
    batches: DashMap<BatchId, ImportBatch>,
    identities: DashMap<Identity, BatchId>,
    /// Rollback records of committed batches
    journals: DashMap<BatchId, CommitJournal>,
    busy: DashSet<BatchId>,
    next_id: AtomicU64,
}

/// Exclusive right to run a lifecycle operation on one batch
///
/// Released when dropped.
#[derive(Debug)]
pub struct BusyGuard<'r> {
    registry: &'r BatchRegistry,
    batch: BatchId,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.registry.busy.remove(&self.batch);
    }
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch previously registered for this content and key
    pub fn find(&self, file_hash: &str, idempotency_key: Option<&str>) -> Option<ImportBatch> {
        let identity = (file_hash.to_string(), idempotency_key.map(str::to_string));
        let id = *self.identities.get(&identity)?;
        self.batches.get(&id).map(|batch| batch.value().clone())
    }

    /// Return the batch registered for `(file_hash, idempotency_key)` or create it
    ///
    /// `stage` runs for a new batch while its identity is still claimed, so a
    /// concurrent upload of the same identity waits until the rows are staged.
    ///
    /// # Returns
    ///
    /// The batch plus the output of `stage` when this call created it. An
    /// existing batch is returned verbatim, whatever its status.
    ///
    /// # Errors
    ///
    /// Whatever `stage` fails with; the new batch is then discarded.
    pub fn create_or_get<T>(
        &self,
        new: NewBatch,
        stage: impl FnOnce(BatchId) -> Result<T, EngineError>,
    ) -> Result<(ImportBatch, Option<T>), EngineError> {
        let identity = (new.file_hash.clone(), new.idempotency_key.clone());
        let mut created = None;
        let id = *self.identities.entry(identity.clone()).or_insert_with(|| {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let batch = ImportBatch {
                id,
                document_type: new.document_type,
                source: new.source,
                status: BatchStatus::Staging,
                file_hash: new.file_hash,
                idempotency_key: new.idempotency_key,
                period: new.period,
                created_at: Utc::now(),
                committed_at: None,
                cancelled_at: None,
                cancel_reason: None,
                last_actor: None,
            };
            self.batches.insert(id, batch.clone());
            created = Some((batch, stage(id)));
            id
        });

        match created {
            Some((batch, Ok(staged))) => {
                tracing::info!(batch = id, document_type = %batch.document_type, "batch created");
                Ok((batch, Some(staged)))
            }
            Some((_, Err(e))) => {
                self.identities.remove(&identity);
                self.batches.remove(&id);
                tracing::warn!(batch = id, error = %e, "staging failed, batch discarded");
                Err(e)
            }
            None => {
                tracing::info!(batch = id, "idempotent upload, returning existing batch");
                Ok((self.get(id)?, None))
            }
        }
    }

    pub fn get(&self, id: BatchId) -> Result<ImportBatch, EngineError> {
        self.batches
            .get(&id)
            .map(|batch| batch.value().clone())
            .ok_or(EngineError::BatchNotFound { batch: id })
    }

    /// All batches, oldest first
    pub fn list(&self) -> Vec<ImportBatch> {
        let mut batches: Vec<ImportBatch> =
            self.batches.iter().map(|batch| batch.value().clone()).collect();
        batches.sort_by_key(|batch| batch.id);
        batches
    }

    /// Claim exclusive lifecycle access to a batch
    ///
    /// # Errors
    ///
    /// - [`EngineError::BatchNotFound`] for an unknown id
    /// - [`EngineError::BatchBusy`] while another commit, rollback or cancel
    ///   of the same batch is running
    pub fn acquire(&self, id: BatchId) -> Result<BusyGuard<'_>, EngineError> {
        if !self.batches.contains_key(&id) {
            return Err(EngineError::BatchNotFound { batch: id });
        }
        if !self.busy.insert(id) {
            return Err(EngineError::BatchBusy { batch: id });
        }
        Ok(BusyGuard {
            registry: self,
            batch: id,
        })
    }

    /// Fail unless the batch is in `expected` status
    pub fn ensure_status(
        &self,
        id: BatchId,
        expected: BatchStatus,
        operation: &str,
    ) -> Result<ImportBatch, EngineError> {
        let batch = self.get(id)?;
        if batch.status != expected {
            return Err(EngineError::invalid_state(id, batch.status, operation));
        }
        Ok(batch)
    }

    fn transition<F>(
        &self,
        id: BatchId,
        expected: BatchStatus,
        operation: &str,
        apply: F,
    ) -> Result<(ImportBatch, ImportBatch), EngineError>
    where
        F: FnOnce(&mut ImportBatch),
    {
        let mut batch = self
            .batches
            .get_mut(&id)
            .ok_or(EngineError::BatchNotFound { batch: id })?;
        if batch.status != expected {
            return Err(EngineError::invalid_state(id, batch.status, operation));
        }
        let before = batch.clone();
        apply(batch.value_mut());
        Ok((before, batch.clone()))
    }

    /// Staging -> Committed, storing the rollback journal
    pub fn mark_committed(
        &self,
        id: BatchId,
        actor: &str,
        journal: CommitJournal,
    ) -> Result<(ImportBatch, ImportBatch), EngineError> {
        let transition = self.transition(id, BatchStatus::Staging, "commit", |batch| {
            batch.status = BatchStatus::Committed;
            batch.committed_at = Some(Utc::now());
            batch.last_actor = Some(actor.to_string());
        })?;
        self.journals.insert(id, journal);
        Ok(transition)
    }

    /// Staging -> Cancelled
    pub fn mark_cancelled(
        &self,
        id: BatchId,
        actor: &str,
        reason: &str,
    ) -> Result<(ImportBatch, ImportBatch), EngineError> {
        self.transition(id, BatchStatus::Staging, "cancel", |batch| {
            cancel(batch, actor, reason)
        })
    }

    /// Committed -> Cancelled, dropping the rollback journal
    pub fn mark_rolled_back(
        &self,
        id: BatchId,
        actor: &str,
        reason: &str,
    ) -> Result<(ImportBatch, ImportBatch), EngineError> {
        let transition = self.transition(id, BatchStatus::Committed, "roll back", |batch| {
            cancel(batch, actor, reason)
        })?;
        self.journals.remove(&id);
        Ok(transition)
    }

    /// Rollback record of a committed batch
    pub fn journal(&self, id: BatchId) -> Option<CommitJournal> {
        self.journals.get(&id).map(|journal| journal.value().clone())
    }
}

fn cancel(batch: &mut ImportBatch, actor: &str, reason: &str) {
    batch.status = BatchStatus::Cancelled;
    batch.cancelled_at = Some(Utc::now());
    batch.cancel_reason = Some(reason.to_string());
    batch.last_actor = Some(actor.to_string());
}
