//! Types module
//!
//! Contains core data structures used throughout the engine:
//! - `batch`: import batches and their lifecycle
//! - `staging`: staging rows, validation codes and summaries
//! - `ledger`: ledger aggregates and their concurrency tokens
//! - `allocation`: allocation requests and results
//! - `error`: error types

pub mod allocation;
pub mod batch;
pub mod error;
pub mod ledger;
pub mod staging;

pub use allocation::{
    AllocationLine, AllocationMode, AllocationRequest, AllocationResult, AllocationTarget,
    TargetType,
};
pub use batch::{BatchId, BatchPeriod, BatchStatus, DocumentType, ImportBatch, NewBatch};
pub use error::{AllocationError, EngineError, ErrorKind};
pub use ledger::{
    Aggregate, AggregateKey, AggregateKind, BalanceStatus, Customer, DocumentStatus,
    LedgerDocument, Versioned, Writer,
};
pub use staging::{
    status_of, ActionSuggestion, Page, RawData, RowId, StagingRow, StagingSummary,
    ValidationCode, ValidationStatus,
};
