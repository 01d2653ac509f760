//! Ledger Import & Allocation Engine Library
//! # Overview
//!
//! This library ingests spreadsheet-sourced financial documents (invoices,
//! prepaid advances, cash receipts) into an outstanding-balance ledger through
//! a staged, idempotent batch pipeline, and distributes cash receipts across
//! open obligations with a deterministic allocation engine.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (batches, staging rows, ledger aggregates, allocation)
//! - [`parser`] - One sheet parser per document type, with row validation
//! - [`core`] - Business logic components:
//!   - [`core::registry`] - Batch identity and lifecycle
//!   - [`core::commit`] / [`core::rollback`] - Chunked, all-or-nothing ledger application
//!   - [`core::allocation`] - Pure allocation engine
//!   - [`core::pipeline`] - Facade implementing upload, preview, commit, cancel and rollback
//! - [`io`] - Sheet reading and CSV output
//! - [`config`] - Engine tunables
//! - [`cli`] - Command line interface
//!
//! # Batch Lifecycle
//!
//! - **Staging**: rows parsed and validated, visible through preview
//! - **Committed**: eligible rows applied to the ledger in one transaction
//! - **Cancelled**: discarded before commit, or rolled back after it
//!
//! # Concurrency
//!
//! Every ledger aggregate carries a version. Writes are checked against the
//! version they were read at, so of two overlapping commits exactly one wins
//! and the other fails with a retryable conflict, leaving the ledger untouched.

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod parser;
pub mod types;

pub use config::EngineConfig;
pub use core::{
    allocate, ImportPipeline, InMemoryAuditLog, InMemoryLedger, LedgerStore, ReceiptAllocation,
    UploadOutcome, UploadRequest,
};
pub use types::{
    AggregateKey, AllocationRequest, AllocationResult, AllocationTarget, BatchStatus,
    DocumentType, EngineError, ImportBatch, StagingSummary,
};
