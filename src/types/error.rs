//! Error types for the ledger import engine
//!
//! Row-level validation problems are never errors: they are recorded on the
//! staging row as [`ValidationCode`](super::ValidationCode)s. Everything in
//! this module propagates to the caller.
//!
//! # Error Categories
//!
//! - **Structural parse errors**: unreadable file, missing header. Abort the upload.
//! - **State errors**: unknown batch, operation not allowed in the batch's status.
//! - **Commit-time errors**: version conflicts (retryable), missing references and
//!   invariant violations (data errors). Abort the whole commit.
//! - **Rollback-blocked**: a downstream write prevents reversing a batch.
//! - **Allocation errors**: malformed allocation requests.

use super::batch::{BatchId, BatchStatus};
use rust_decimal::Decimal;
use thiserror::Error;

/// Coarse classification of an [`EngineError`], used by callers to decide
/// how to present it and whether a retry can help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    NotFound,
    State,
    Conflict,
    Data,
    Blocked,
    Io,
}

/// Main error type for the engine
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The uploaded file has no header row
    #[error("Uploaded file is empty")]
    EmptyFile,

    /// A header the document type requires is absent from the sheet
    #[error("Missing required column '{header}'")]
    MissingHeader { header: String },

    /// The sheet could not be read as delimited text
    #[error(
        "Sheet parse error{}: {message}",
        line.map(|l| format!(" at line {}", l)).unwrap_or_default()
    )]
    SheetParse { line: Option<u64>, message: String },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Batch {batch} not found")]
    BatchNotFound { batch: BatchId },

    /// The requested lifecycle operation is not allowed from the current status
    #[error("Cannot {operation} batch {batch} in status {status}")]
    InvalidBatchState {
        batch: BatchId,
        status: BatchStatus,
        operation: String,
    },

    /// Another lifecycle operation on the same batch is running
    #[error("Batch {batch} has another operation in progress")]
    BatchBusy { batch: BatchId },

    /// Optimistic concurrency check failed at the persistence boundary
    #[error("Version conflict on {key}: expected version {expected}, found {found}")]
    VersionConflict {
        key: String,
        expected: u64,
        found: u64,
    },

    /// An insert collided with an existing aggregate
    #[error("Aggregate {key} already exists")]
    DuplicateAggregate { key: String },

    #[error("Aggregate {key} not found")]
    AggregateNotFound { key: String },

    /// A row refers to a ledger entity that does not exist
    #[error("Row {row_no} references missing {key}")]
    MissingReference { row_no: u32, key: String },

    #[error(
        "Invariant violated{}: {message}",
        row_no.map(|r| format!(" at row {}", r)).unwrap_or_default()
    )]
    InvariantViolation { row_no: Option<u32>, message: String },

    /// Rollback refused because a document was changed after the batch wrote it
    #[error("Cannot roll back batch {batch}: {key} was modified by {modified_by}")]
    RollbackBlocked {
        batch: BatchId,
        key: String,
        modified_by: String,
    },

    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

/// Errors produced by the allocation engine for malformed requests
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AllocationError {
    #[error("Allocation amount must not be negative, got {amount}")]
    NegativeAmount { amount: Decimal },

    #[error("ByPeriod allocation requires an applied period")]
    MissingAppliedPeriod,

    #[error("ByInvoice allocation requires selected targets")]
    MissingSelection,

    #[error("Selected target '{id}' is not among the candidate targets")]
    UnknownTarget { id: String },
}

impl From<std::io::Error> for EngineError {
    fn from(error: std::io::Error) -> Self {
        EngineError::Io {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for EngineError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        EngineError::SheetParse {
            line,
            message: error.to_string(),
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::EmptyFile
            | EngineError::MissingHeader { .. }
            | EngineError::SheetParse { .. } => ErrorKind::Parse,
            EngineError::Io { .. } => ErrorKind::Io,
            EngineError::BatchNotFound { .. } | EngineError::AggregateNotFound { .. } => {
                ErrorKind::NotFound
            }
            EngineError::InvalidBatchState { .. } => ErrorKind::State,
            EngineError::BatchBusy { .. } | EngineError::VersionConflict { .. } => {
                ErrorKind::Conflict
            }
            EngineError::DuplicateAggregate { .. }
            | EngineError::MissingReference { .. }
            | EngineError::InvariantViolation { .. }
            | EngineError::Allocation(_) => ErrorKind::Data,
            EngineError::RollbackBlocked { .. } => ErrorKind::Blocked,
        }
    }

    /// Whether the same request may succeed if simply retried
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn missing_header(header: &str) -> Self {
        EngineError::MissingHeader {
            header: header.to_string(),
        }
    }

    pub fn invalid_state(batch: BatchId, status: BatchStatus, operation: &str) -> Self {
        EngineError::InvalidBatchState {
            batch,
            status,
            operation: operation.to_string(),
        }
    }

    pub fn version_conflict(key: impl ToString, expected: u64, found: u64) -> Self {
        EngineError::VersionConflict {
            key: key.to_string(),
            expected,
            found,
        }
    }

    pub fn duplicate_aggregate(key: impl ToString) -> Self {
        EngineError::DuplicateAggregate {
            key: key.to_string(),
        }
    }

    pub fn aggregate_not_found(key: impl ToString) -> Self {
        EngineError::AggregateNotFound {
            key: key.to_string(),
        }
    }

    pub fn missing_reference(row_no: u32, key: impl ToString) -> Self {
        EngineError::MissingReference {
            row_no,
            key: key.to_string(),
        }
    }

    pub fn invariant(row_no: Option<u32>, message: impl Into<String>) -> Self {
        EngineError::InvariantViolation {
            row_no,
            message: message.into(),
        }
    }

    pub fn rollback_blocked(
        batch: BatchId,
        key: impl ToString,
        modified_by: impl ToString,
    ) -> Self {
        EngineError::RollbackBlocked {
            batch,
            key: key.to_string(),
            modified_by: modified_by.to_string(),
        }
    }

    /// Attach a row number to an invariant violation raised without one
    pub fn at_row(self, row: u32) -> Self {
        match self {
            EngineError::InvariantViolation {
                row_no: None,
                message,
            } => EngineError::InvariantViolation {
                row_no: Some(row),
                message,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::missing_header(
        EngineError::missing_header("amount"),
        "Missing required column 'amount'"
    )]
    #[case::sheet_parse_with_line(
        EngineError::SheetParse { line: Some(7), message: "bad quote".to_string() },
        "Sheet parse error at line 7: bad quote"
    )]
    #[case::sheet_parse_without_line(
        EngineError::SheetParse { line: None, message: "bad quote".to_string() },
        "Sheet parse error: bad quote"
    )]
    #[case::invalid_state(
        EngineError::invalid_state(3, BatchStatus::Committed, "cancel"),
        "Cannot cancel batch 3 in status committed"
    )]
    #[case::version_conflict(
        EngineError::version_conflict("invoice:T1/INV-1", 2, 3),
        "Version conflict on invoice:T1/INV-1: expected version 2, found 3"
    )]
    #[case::missing_reference(
        EngineError::missing_reference(4, "customer:T9"),
        "Row 4 references missing customer:T9"
    )]
    #[case::invariant_with_row(
        EngineError::invariant(Some(2), "outstanding would be negative"),
        "Invariant violated at row 2: outstanding would be negative"
    )]
    #[case::rollback_blocked(
        EngineError::rollback_blocked(5, "invoice:T1/INV-1", "receipt T1/R-1"),
        "Cannot roll back batch 5: invoice:T1/INV-1 was modified by receipt T1/R-1"
    )]
    #[case::allocation(
        EngineError::from(AllocationError::MissingAppliedPeriod),
        "ByPeriod allocation requires an applied period"
    )]
    fn test_error_display(#[case] error: EngineError, #[case] expected: &str) {
        assert_eq!(error.to_string(), expected);
    }

    #[rstest]
    #[case::conflict(EngineError::version_conflict("k", 1, 2), ErrorKind::Conflict, true)]
    #[case::busy(EngineError::BatchBusy { batch: 1 }, ErrorKind::Conflict, true)]
    #[case::missing_reference(EngineError::missing_reference(1, "k"), ErrorKind::Data, false)]
    #[case::blocked(EngineError::rollback_blocked(1, "k", "w"), ErrorKind::Blocked, false)]
    #[case::parse(EngineError::EmptyFile, ErrorKind::Parse, false)]
    #[case::state(
        EngineError::invalid_state(1, BatchStatus::Cancelled, "commit"),
        ErrorKind::State,
        false
    )]
    fn test_kind_and_retryability(
        #[case] error: EngineError,
        #[case] kind: ErrorKind,
        #[case] retryable: bool,
    ) {
        assert_eq!(error.kind(), kind);
        assert_eq!(error.is_retryable(), retryable);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "Permission denied");
        let error: EngineError = io_error.into();
        assert!(matches!(error, EngineError::Io { .. }));
        assert_eq!(error.to_string(), "I/O error: Permission denied");
    }
}
