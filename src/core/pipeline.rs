//! Import pipeline
//!
//! [`ImportPipeline`] is the entry point callers use. It wires the parsers,
//! registry, staging store and coordinators to the collaborators (ledger
//! store, hasher, audit sink, actor provider) and implements the external
//! operations:
//!
//! - `upload`: hash, idempotency check, parse, stage
//! - `preview`: paged staging rows, filterable by status
//! - `commit` / `cancel` / `rollback`: batch lifecycle
//! - `post_receipt`: allocate a committed receipt
//! - `reconcile`: recompute a customer balance
//!
//! Audit entries are emitted only after the ledger transaction of an
//! operation has committed.

use crate::config::EngineConfig;
use crate::core::arena::Change;
use crate::core::audit::{AuditAction, AuditEntry, Sha256Hasher, StaticActor, TracingAuditSink};
use crate::core::commit::{CommitCoordinator, CommitOutcome};
use crate::core::ledger_store::InMemoryLedger;
use crate::core::receipts::{PostingOutcome, ReceiptAllocation, ReceiptPoster};
use crate::core::reconcile::{reconcile_customer, ReconcileOutcome};
use crate::core::registry::BatchRegistry;
use crate::core::rollback::RollbackCoordinator;
use crate::core::staging_store::StagingStore;
use crate::core::traits::{ActorProvider, AuditSink, ContentHasher, LedgerStore};
use crate::io::sheet::Sheet;
use crate::parser::{mark_existing, parser_for, ParseContext};
use crate::types::{
    AggregateKey, BatchId, BatchPeriod, BatchStatus, DocumentType, EngineError, ImportBatch,
    NewBatch, Page, StagingRow, StagingSummary, ValidationStatus,
};
use serde::Serialize;
use std::sync::Arc;

/// One uploaded file
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub document_type: DocumentType,
    /// Where the file came from, e.g. its name
    pub source: String,
    pub bytes: Vec<u8>,
    pub period: BatchPeriod,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadOutcome {
    pub batch: ImportBatch,
    pub summary: StagingSummary,
    /// The upload matched an existing batch and nothing was parsed
    pub reused: bool,
}

pub struct ImportPipeline {
    ledger: Arc<dyn LedgerStore>,
    audit: Arc<dyn AuditSink>,
    actor: Arc<dyn ActorProvider>,
    hasher: Arc<dyn ContentHasher>,
    registry: BatchRegistry,
    staging: StagingStore,
    config: EngineConfig,
}

impl ImportPipeline {
    /// Pipeline over `ledger` with SHA-256 hashing, `tracing` audit output and
    /// a `system` actor
    pub fn new(ledger: Arc<dyn LedgerStore>, config: EngineConfig) -> Self {
        Self {
            ledger,
            audit: Arc::new(TracingAuditSink),
            actor: Arc::new(StaticActor::new("system")),
            hasher: Arc::new(Sha256Hasher),
            registry: BatchRegistry::new(),
            staging: StagingStore::new(),
            config,
        }
    }

    /// Pipeline over a fresh in-memory ledger
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryLedger::new()), config)
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_actor(mut self, actor: Arc<dyn ActorProvider>) -> Self {
        self.actor = actor;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn ledger(&self) -> &dyn LedgerStore {
        self.ledger.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn batch(&self, id: BatchId) -> Result<ImportBatch, EngineError> {
        self.registry.get(id)
    }

    pub fn batches(&self) -> Vec<ImportBatch> {
        self.registry.list()
    }

    /// Register and parse an uploaded file
    ///
    /// Re-submitting the same bytes with the same idempotency key returns the
    /// existing batch and its summary without parsing again, whatever state
    /// the batch is in.
    ///
    /// # Errors
    ///
    /// Structural problems (not UTF-8, empty file, missing required header,
    /// broken CSV framing) fail the upload before any batch is created.
    pub fn upload(&self, request: UploadRequest) -> Result<UploadOutcome, EngineError> {
        let file_hash = self.hasher.hash(&request.bytes);
        if let Some(batch) = self
            .registry
            .find(&file_hash, request.idempotency_key.as_deref())
        {
            tracing::info!(batch = batch.id, "upload matched existing batch");
            return Ok(UploadOutcome {
                summary: self.staging.summary(batch.id),
                batch,
                reused: true,
            });
        }

        let sheet = Sheet::from_bytes(&request.bytes)?;
        let context = ParseContext {
            period: request.period,
        };
        let mut drafts = parser_for(request.document_type).parse(&sheet, &context)?;
        mark_existing(request.document_type, &mut drafts, |key| {
            self.ledger.load(key).is_some()
        });

        let new = NewBatch {
            document_type: request.document_type,
            source: request.source,
            file_hash,
            idempotency_key: request.idempotency_key,
            period: request.period,
        };
        let (batch, staged) = self
            .registry
            .create_or_get(new, |id| self.staging.insert(id, drafts))?;
        let Some(summary) = staged else {
            return Ok(UploadOutcome {
                summary: self.staging.summary(batch.id),
                batch,
                reused: true,
            });
        };

        tracing::info!(
            batch = batch.id,
            total = summary.total,
            ok = summary.ok,
            warn = summary.warn,
            error = summary.error,
            "batch staged"
        );
        Ok(UploadOutcome {
            batch,
            summary,
            reused: false,
        })
    }

    /// Page through a batch's staging rows
    ///
    /// `page_size` is capped at the configured maximum.
    pub fn preview(
        &self,
        batch: BatchId,
        status: Option<ValidationStatus>,
        page: usize,
        page_size: usize,
    ) -> Result<Page<StagingRow>, EngineError> {
        self.registry.get(batch)?;
        let page_size = page_size.clamp(1, self.config.max_page_size);
        Ok(self.staging.preview(batch, status, page, page_size))
    }

    /// Staging -> Committed
    ///
    /// Applies OK rows, plus WARN rows when `include_warn_rows` is set. On any
    /// error the batch stays in Staging and the ledger is untouched.
    pub fn commit(
        &self,
        batch_id: BatchId,
        include_warn_rows: bool,
    ) -> Result<CommitOutcome, EngineError> {
        let _guard = self.registry.acquire(batch_id)?;
        let batch = self
            .registry
            .ensure_status(batch_id, BatchStatus::Staging, "commit")?;
        let actor = self.actor.current_actor();
        tracing::info!(batch = batch_id, include_warn_rows, "commit started");

        let coordinator =
            CommitCoordinator::new(self.ledger.as_ref(), &self.staging, self.config.chunk_size);
        let (outcome, journal) = coordinator
            .run(&batch, include_warn_rows)
            .inspect_err(|err| log_failure(batch_id, "commit", err))?;

        self.record_changes(
            AuditAction::Commit,
            journal.net_changes(self.ledger.as_ref()),
            &actor,
        );
        let (before, after) = self.registry.mark_committed(batch_id, &actor, journal)?;
        self.audit
            .record(AuditEntry::batch(AuditAction::Commit, &before, &after, &actor));

        tracing::info!(
            batch = batch_id,
            committed_rows = outcome.committed_rows,
            skipped_rows = outcome.skipped_rows,
            peak_tracked = outcome.peak_tracked_aggregates,
            "commit finished"
        );
        Ok(outcome)
    }

    /// Staging -> Cancelled; nothing touches the ledger
    pub fn cancel(&self, batch_id: BatchId, reason: &str) -> Result<ImportBatch, EngineError> {
        let _guard = self.registry.acquire(batch_id)?;
        let actor = self.actor.current_actor();
        let (before, after) = self
            .registry
            .mark_cancelled(batch_id, &actor, reason)
            .inspect_err(|err| log_failure(batch_id, "cancel", err))?;
        self.audit
            .record(AuditEntry::batch(AuditAction::Cancel, &before, &after, &actor));
        tracing::info!(batch = batch_id, reason, "batch cancelled");
        Ok(after)
    }

    /// Committed -> Cancelled, undoing the batch's ledger writes
    ///
    /// # Errors
    ///
    /// [`EngineError::RollbackBlocked`] when a document the batch wrote has
    /// been changed since, for example by a receipt allocation.
    pub fn rollback(&self, batch_id: BatchId, reason: &str) -> Result<ImportBatch, EngineError> {
        let _guard = self.registry.acquire(batch_id)?;
        let batch = self
            .registry
            .ensure_status(batch_id, BatchStatus::Committed, "roll back")?;
        let journal = self.registry.journal(batch_id).ok_or_else(|| {
            EngineError::invariant(None, format!("batch {} has no commit journal", batch_id))
        })?;
        let actor = self.actor.current_actor();

        let changes = RollbackCoordinator::new(self.ledger.as_ref())
            .run(&batch, &journal)
            .inspect_err(|err| log_failure(batch_id, "rollback", err))?;

        let (before, after) = self.registry.mark_rolled_back(batch_id, &actor, reason)?;
        self.record_changes(AuditAction::Rollback, changes, &actor);
        self.audit
            .record(AuditEntry::batch(AuditAction::Rollback, &before, &after, &actor));
        tracing::info!(batch = batch_id, reason, "batch rolled back");
        Ok(after)
    }

    /// Allocate a committed receipt over its customer's open obligations
    pub fn post_receipt(
        &self,
        receipt: &AggregateKey,
        how: &ReceiptAllocation,
    ) -> Result<PostingOutcome, EngineError> {
        let outcome = ReceiptPoster::new(self.ledger.as_ref()).post(receipt, how)?;
        let actor = self.actor.current_actor();
        self.record_changes(AuditAction::Allocate, outcome.changes.iter().cloned(), &actor);
        Ok(outcome)
    }

    /// Recompute a customer's balance from its documents
    pub fn reconcile(&self, tax_id: &str) -> Result<ReconcileOutcome, EngineError> {
        let outcome = reconcile_customer(self.ledger.as_ref(), tax_id)?;
        if outcome.drifted() {
            let actor = self.actor.current_actor();
            self.record_changes(AuditAction::Reconcile, outcome.change.iter().cloned(), &actor);
        }
        Ok(outcome)
    }

    fn record_changes<I>(&self, action: AuditAction, changes: I, actor: &str)
    where
        I: IntoIterator<Item = Change>,
    {
        for change in changes {
            self.audit.record(AuditEntry::aggregate(
                action,
                &change.key,
                change.before.as_ref(),
                change.after.as_ref(),
                actor,
            ));
        }
    }
}

fn log_failure(batch: BatchId, operation: &str, err: &EngineError) {
    if err.is_retryable() {
        tracing::warn!(batch, operation, error = %err, "retryable conflict");
    } else {
        tracing::error!(batch, operation, error = %err, "operation failed");
    }
}
