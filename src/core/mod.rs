//! Core business logic module
//!
//! This module contains the import pipeline and its components:
//! - `traits` - Collaborator interfaces (ledger store, hasher, audit, actor)
//! - `ledger_store` - In-memory versioned ledger and the transaction handle
//! - `registry` - Batch identity and lifecycle
//! - `staging_store` - Parsed rows per batch
//! - `arena` - Chunk-scoped aggregate tracking and the commit journal
//! - `commit` / `rollback` - Batch lifecycle coordinators
//! - `allocation` - Pure receipt allocation engine
//! - `receipts` / `reconcile` - Ledger operations outside the batch lifecycle
//! - `audit` - Audit entries and default collaborator implementations
//! - `pipeline` - Facade tying everything together

pub mod allocation;
pub mod arena;
pub mod audit;
pub mod commit;
pub mod ledger_store;
pub mod pipeline;
pub mod receipts;
pub mod reconcile;
pub mod registry;
pub mod rollback;
pub mod staging_store;
pub mod traits;

pub use allocation::allocate;
pub use arena::{AggregateArena, Change, CommitJournal, CustomerTrace, DocumentTrace};
pub use audit::{
    AuditAction, AuditEntry, InMemoryAuditLog, Sha256Hasher, StaticActor, TracingAuditSink,
};
pub use commit::{CommitCoordinator, CommitOutcome};
pub use ledger_store::{InMemoryLedger, LedgerTransaction};
pub use pipeline::{ImportPipeline, UploadOutcome, UploadRequest};
pub use receipts::{PostingOutcome, ReceiptAllocation, ReceiptPoster};
pub use reconcile::{expected_balance, reconcile_customer, ReconcileOutcome};
pub use registry::{BatchRegistry, BusyGuard};
pub use rollback::RollbackCoordinator;
pub use staging_store::StagingStore;
pub use traits::{ActorProvider, AuditSink, ContentHasher, LedgerStore, Slot, TxnId};
