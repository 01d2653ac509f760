//! Import batch types
//!
//! An import batch is the unit of idempotency for uploads: one uploaded file,
//! identified by its content hash and an optional caller-supplied key, moves
//! through `Staging` to either `Committed` or `Cancelled`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Batch identifier
pub type BatchId = u64;

/// Kind of financial document carried by an uploaded sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// Customer invoice, becomes an allocation target once committed
    Invoice,
    /// Prepaid advance billed to a customer, also an allocation target
    Advance,
    /// Cash receipt, later distributed across open obligations
    Receipt,
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DocumentType::Invoice => "invoice",
            DocumentType::Advance => "advance",
            DocumentType::Receipt => "receipt",
        };
        f.write_str(name)
    }
}

/// Lifecycle state of an import batch
///
/// `Staging` is the only state in which rows may be appended or committed.
/// `Committed` and `Cancelled` are terminal apart from the rollback
/// transition `Committed -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Staging,
    Committed,
    Cancelled,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Staging => "staging",
            BatchStatus::Committed => "committed",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Optional accounting window an upload is declared to cover
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchPeriod {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl BatchPeriod {
    pub fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    /// Whether `date` falls inside the declared window (open bounds always match)
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// One uploaded file and its position in the import lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: BatchId,
    pub document_type: DocumentType,
    /// Free-form origin of the upload (file name, channel)
    pub source: String,
    pub status: BatchStatus,
    /// Lowercase hex SHA-256 of the uploaded bytes
    pub file_hash: String,
    pub idempotency_key: Option<String>,
    pub period: BatchPeriod,
    pub created_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// Actor that performed the last lifecycle transition
    pub last_actor: Option<String>,
}

/// Caller-facing request to register an upload
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatch {
    pub document_type: DocumentType,
    pub source: String,
    pub file_hash: String,
    pub idempotency_key: Option<String>,
    pub period: BatchPeriod,
}
