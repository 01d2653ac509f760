//! Staging row types
//!
//! A staging row is one parsed, validated candidate ledger entry awaiting
//! commit. Validation outcomes are a closed set of [`ValidationCode`]s so that
//! every code can be matched exhaustively and rendered in one place.

use super::batch::BatchId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Staging row identifier
pub type RowId = u64;

/// Canonical key-value payload extracted from one sheet row
///
/// Keys are the canonical field names (`customer_tax_id`, `document_no`,
/// `issue_date`, ...). Values are normalized: ISO dates, plain decimals.
pub type RawData = BTreeMap<String, String>;

/// Aggregate validation outcome of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationStatus::Ok => "OK",
            ValidationStatus::Warn => "WARN",
            ValidationStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// What commit should do with a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionSuggestion {
    /// Create a new ledger document
    Insert,
    /// Leave the row out of the commit
    Skip,
    /// Re-price an existing, committed ledger document
    Update,
}

impl fmt::Display for ActionSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionSuggestion::Insert => "insert",
            ActionSuggestion::Skip => "skip",
            ActionSuggestion::Update => "update",
        };
        f.write_str(name)
    }
}

/// Closed set of row-level validation findings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    RequiredTaxId,
    RequiredDocumentNo,
    RequiredDate,
    RequiredAmount,
    InvalidDate,
    InvalidAmount,
    NonPositiveAmount,
    InvalidPeriod,
    InvalidEnum,
    PeriodNotFirstOfMonth,
    AmountRounded,
    OutsideBatchPeriod,
    DupInFile,
    ExistsInLedger,
}

impl ValidationCode {
    /// Stable wire code, as stored in `validation_messages`
    pub fn code(self) -> &'static str {
        match self {
            ValidationCode::RequiredTaxId => "REQUIRED_TAX_ID",
            ValidationCode::RequiredDocumentNo => "REQUIRED_DOCUMENT_NO",
            ValidationCode::RequiredDate => "REQUIRED_DATE",
            ValidationCode::RequiredAmount => "REQUIRED_AMOUNT",
            ValidationCode::InvalidDate => "INVALID_DATE",
            ValidationCode::InvalidAmount => "INVALID_AMOUNT",
            ValidationCode::NonPositiveAmount => "NON_POSITIVE_AMOUNT",
            ValidationCode::InvalidPeriod => "INVALID_PERIOD",
            ValidationCode::InvalidEnum => "INVALID_ENUM",
            ValidationCode::PeriodNotFirstOfMonth => "PERIOD_NOT_FIRST_OF_MONTH",
            ValidationCode::AmountRounded => "AMOUNT_ROUNDED",
            ValidationCode::OutsideBatchPeriod => "OUTSIDE_BATCH_PERIOD",
            ValidationCode::DupInFile => "DUP_IN_FILE",
            ValidationCode::ExistsInLedger => "EXISTS_IN_LEDGER",
        }
    }

    /// Severity a single occurrence of this code imposes on its row
    pub fn severity(self) -> ValidationStatus {
        match self {
            ValidationCode::RequiredTaxId
            | ValidationCode::RequiredDocumentNo
            | ValidationCode::RequiredDate
            | ValidationCode::RequiredAmount
            | ValidationCode::InvalidDate
            | ValidationCode::InvalidAmount
            | ValidationCode::NonPositiveAmount
            | ValidationCode::InvalidPeriod => ValidationStatus::Error,
            ValidationCode::InvalidEnum
            | ValidationCode::PeriodNotFirstOfMonth
            | ValidationCode::AmountRounded
            | ValidationCode::OutsideBatchPeriod
            | ValidationCode::DupInFile
            | ValidationCode::ExistsInLedger => ValidationStatus::Warn,
        }
    }

    /// Human readable rendering for previews and logs
    pub fn describe(self) -> &'static str {
        match self {
            ValidationCode::RequiredTaxId => "counterpart tax id is required",
            ValidationCode::RequiredDocumentNo => "document number is required",
            ValidationCode::RequiredDate => "document date is required",
            ValidationCode::RequiredAmount => "amount is required",
            ValidationCode::InvalidDate => {
                "date is not in yyyy-MM-dd, dd/MM/yyyy or dd-MM-yyyy form"
            }
            ValidationCode::InvalidAmount => "amount is not a decimal number",
            ValidationCode::NonPositiveAmount => "amount must be greater than zero",
            ValidationCode::InvalidPeriod => "applied period is not a valid date",
            ValidationCode::InvalidEnum => "unknown value, default applied",
            ValidationCode::PeriodNotFirstOfMonth => {
                "applied period moved to the first of its month"
            }
            ValidationCode::AmountRounded => "amount rounded to 2 decimal places",
            ValidationCode::OutsideBatchPeriod => "document date falls outside the batch period",
            ValidationCode::DupInFile => "duplicate of an earlier row in the same file",
            ValidationCode::ExistsInLedger => "document already committed, row will update it",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Reduce a list of findings to the row status
pub fn status_of(messages: &[ValidationCode]) -> ValidationStatus {
    messages
        .iter()
        .map(|code| code.severity())
        .max()
        .unwrap_or(ValidationStatus::Ok)
}

/// One parsed sheet row attached to a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagingRow {
    pub id: RowId,
    pub batch_id: BatchId,
    /// 1-based position in the source sheet (header excluded)
    pub row_no: u32,
    pub raw_data: RawData,
    pub validation_status: ValidationStatus,
    pub validation_messages: Vec<ValidationCode>,
    /// `None` for ERROR rows
    pub action_suggestion: Option<ActionSuggestion>,
}

impl StagingRow {
    /// Whether commit may apply this row
    pub fn is_eligible(&self, include_warn_rows: bool) -> bool {
        let status_ok = match self.validation_status {
            ValidationStatus::Ok => true,
            ValidationStatus::Warn => include_warn_rows,
            ValidationStatus::Error => false,
        };
        status_ok
            && matches!(
                self.action_suggestion,
                Some(ActionSuggestion::Insert) | Some(ActionSuggestion::Update)
            )
    }
}

/// Row counts of a batch by validation status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingSummary {
    pub total: usize,
    pub ok: usize,
    pub warn: usize,
    pub error: usize,
}

impl StagingSummary {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a StagingRow>) -> Self {
        rows.into_iter().fold(Self::default(), |mut summary, row| {
            summary.total += 1;
            match row.validation_status {
                ValidationStatus::Ok => summary.ok += 1,
                ValidationStatus::Warn => summary.warn += 1,
                ValidationStatus::Error => summary.error += 1,
            }
            summary
        })
    }
}

/// One page of staging rows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number
    pub page: usize,
    pub page_size: usize,
    /// Items matching the filter across all pages
    pub total: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: usize, page_size: usize, total: usize) -> Self {
        let total_pages = if total == 0 {
            1
        } else {
            total.div_ceil(page_size.max(1))
        };
        Self {
            items,
            page,
            page_size,
            total,
            total_pages,
        }
    }
}
