//! Document parsers
//!
//! One [`DocumentParser`] per document type turns a [`Sheet`] into staging
//! drafts: canonical raw data, validation codes and an action suggestion for
//! every row. Parsers share the row pipeline in this module and differ only in
//! their [`DocumentLayout`].
//!
//! # Validation
//!
//! - Required fields (tax id, document number, date, amount) missing or
//!   malformed yield ERROR rows with no action suggestion.
//! - Soft issues (unknown enum value, period not on the first of the month,
//!   amount with more than two decimals, date outside the batch period) yield
//!   WARN rows that keep their action.
//! - Rows repeating the natural key (tax id + document number) of an earlier
//!   row in the same file are WARN `DUP_IN_FILE` with action `Skip`.

pub mod advance;
pub mod invoice;
pub mod receipt;

pub use advance::AdvanceParser;
pub use invoice::InvoiceParser;
pub use receipt::ReceiptParser;

use crate::io::dates::{format_date, parse_date, parse_period};
use crate::io::sheet::{Sheet, SheetRow};
use crate::types::{
    status_of, ActionSuggestion, AggregateKey, AggregateKind, BatchPeriod, DocumentStatus,
    DocumentType, EngineError, LedgerDocument, RawData, ValidationCode, ValidationStatus,
};
use crate::types::ledger::normalize_key_part;
use chrono::NaiveDate;
use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::str::FromStr;

/// Canonical raw data keys
pub mod fields {
    pub const CUSTOMER_TAX_ID: &str = "customer_tax_id";
    pub const CUSTOMER_NAME: &str = "customer_name";
    pub const DOCUMENT_NO: &str = "document_no";
    pub const ISSUE_DATE: &str = "issue_date";
    pub const APPLIED_PERIOD: &str = "applied_period";
    pub const AMOUNT: &str = "amount";
    pub const CLASSIFICATION: &str = "classification";
}

/// Sheet columns shared by every document type
const TAX_ID_COLUMN: &str = "customer_tax_id";
const NAME_COLUMN: &str = "customer_name";
const AMOUNT_COLUMN: &str = "amount";
const PERIOD_COLUMN: &str = "applied_period";

/// Money is kept to cents
pub const AMOUNT_SCALE: u32 = 2;

/// Optional column holding a closed set of values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumColumn {
    pub column: &'static str,
    pub allowed: &'static [&'static str],
    pub default: &'static str,
}

/// Column layout of one document type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentLayout {
    pub document_type: DocumentType,
    pub document_no_column: &'static str,
    pub date_column: &'static str,
    pub classification: EnumColumn,
}

/// Per-upload facts the parser validates against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseContext {
    pub period: BatchPeriod,
}

/// Parsed row before it is attached to a batch
#[derive(Debug, Clone, PartialEq)]
pub struct StagingDraft {
    pub row_no: u32,
    pub raw_data: RawData,
    pub validation_messages: Vec<ValidationCode>,
    pub action_suggestion: Option<ActionSuggestion>,
}

impl StagingDraft {
    pub fn status(&self) -> ValidationStatus {
        status_of(&self.validation_messages)
    }

    /// Natural key of the row, when both parts are present
    pub fn natural_key(&self, document_type: DocumentType) -> Option<AggregateKey> {
        let tax_id = self.raw_data.get(fields::CUSTOMER_TAX_ID)?;
        let document_no = self.raw_data.get(fields::DOCUMENT_NO)?;
        Some(AggregateKey::document(
            document_type.into(),
            tax_id,
            document_no,
        ))
    }
}

/// Parser for one document type
pub trait DocumentParser: Send + Sync {
    fn layout(&self) -> &DocumentLayout;

    fn document_type(&self) -> DocumentType {
        self.layout().document_type
    }

    /// Parse a whole sheet
    ///
    /// Fails only on structural problems (missing required header); every row
    /// level issue is recorded on the returned drafts.
    fn parse(
        &self,
        sheet: &Sheet,
        context: &ParseContext,
    ) -> Result<Vec<StagingDraft>, EngineError> {
        parse_with_layout(self.layout(), sheet, context)
    }
}

/// Parser for the given document type
pub fn parser_for(document_type: DocumentType) -> Box<dyn DocumentParser> {
    match document_type {
        DocumentType::Invoice => Box::new(InvoiceParser),
        DocumentType::Advance => Box::new(AdvanceParser),
        DocumentType::Receipt => Box::new(ReceiptParser),
    }
}

struct Columns {
    tax_id: usize,
    document_no: usize,
    date: usize,
    amount: usize,
    name: Option<usize>,
    period: Option<usize>,
    classification: Option<usize>,
}

impl Columns {
    fn resolve(layout: &DocumentLayout, sheet: &Sheet) -> Result<Self, EngineError> {
        Ok(Self {
            tax_id: sheet.require_column(TAX_ID_COLUMN)?,
            document_no: sheet.require_column(layout.document_no_column)?,
            date: sheet.require_column(layout.date_column)?,
            amount: sheet.require_column(AMOUNT_COLUMN)?,
            name: sheet.column(NAME_COLUMN),
            period: sheet.column(PERIOD_COLUMN),
            classification: sheet.column(layout.classification.column),
        })
    }
}

/// Shared row pipeline for every layout
pub fn parse_with_layout(
    layout: &DocumentLayout,
    sheet: &Sheet,
    context: &ParseContext,
) -> Result<Vec<StagingDraft>, EngineError> {
    let columns = Columns::resolve(layout, sheet)?;
    let mut seen = HashSet::new();
    let mut drafts = Vec::with_capacity(sheet.len());

    for (row_no, row) in sheet.rows() {
        let mut draft = parse_row(layout, &columns, row_no, row, context);

        if let Some(key) = draft.natural_key(layout.document_type) {
            if !seen.insert(key) {
                draft.validation_messages.push(ValidationCode::DupInFile);
                if draft.action_suggestion.is_some() {
                    draft.action_suggestion = Some(ActionSuggestion::Skip);
                }
            }
        }
        drafts.push(draft);
    }

    Ok(drafts)
}

fn parse_row(
    layout: &DocumentLayout,
    columns: &Columns,
    row_no: u32,
    row: SheetRow<'_>,
    context: &ParseContext,
) -> StagingDraft {
    let mut raw = RawData::new();
    let mut messages = Vec::new();

    match row.get(Some(columns.tax_id)) {
        Some(tax_id) => {
            raw.insert(fields::CUSTOMER_TAX_ID.to_string(), tax_id.to_string());
        }
        None => messages.push(ValidationCode::RequiredTaxId),
    }

    if let Some(name) = row.get(columns.name) {
        raw.insert(fields::CUSTOMER_NAME.to_string(), name.to_string());
    }

    match row.get(Some(columns.document_no)) {
        Some(document_no) => {
            raw.insert(fields::DOCUMENT_NO.to_string(), document_no.to_string());
        }
        None => messages.push(ValidationCode::RequiredDocumentNo),
    }

    match row.get(Some(columns.date)).map(|text| (text, parse_date(text))) {
        Some((_, Some(date))) => {
            raw.insert(fields::ISSUE_DATE.to_string(), format_date(date));
            if !context.period.contains(date) {
                messages.push(ValidationCode::OutsideBatchPeriod);
            }
        }
        Some((_, None)) => messages.push(ValidationCode::InvalidDate),
        None => messages.push(ValidationCode::RequiredDate),
    }

    match row.get(Some(columns.amount)).map(parse_amount) {
        Some(Ok((amount, rounded))) => {
            raw.insert(fields::AMOUNT.to_string(), amount.to_string());
            if rounded {
                messages.push(ValidationCode::AmountRounded);
            }
        }
        Some(Err(code)) => messages.push(code),
        None => messages.push(ValidationCode::RequiredAmount),
    }

    if let Some(text) = row.get(columns.period) {
        match parse_period(text) {
            Some((period, snapped)) => {
                raw.insert(fields::APPLIED_PERIOD.to_string(), format_date(period));
                if snapped {
                    messages.push(ValidationCode::PeriodNotFirstOfMonth);
                }
            }
            None => messages.push(ValidationCode::InvalidPeriod),
        }
    }

    let classification = match row.get(columns.classification) {
        Some(value) => {
            let value = value.to_lowercase();
            if layout.classification.allowed.contains(&value.as_str()) {
                value
            } else {
                messages.push(ValidationCode::InvalidEnum);
                layout.classification.default.to_string()
            }
        }
        None => layout.classification.default.to_string(),
    };
    raw.insert(fields::CLASSIFICATION.to_string(), classification);

    let action_suggestion = match status_of(&messages) {
        ValidationStatus::Error => None,
        ValidationStatus::Ok | ValidationStatus::Warn => Some(ActionSuggestion::Insert),
    };

    StagingDraft {
        row_no,
        raw_data: raw,
        validation_messages: messages,
        action_suggestion,
    }
}

/// Parse a money amount, rounding to cents
///
/// Returns the amount and whether rounding changed it.
pub fn parse_amount(text: &str) -> Result<(Decimal, bool), ValidationCode> {
    let cleaned: String = text.chars().filter(|c| !matches!(c, ' ' | '_')).collect();
    let amount = Decimal::from_str(&cleaned).map_err(|_| ValidationCode::InvalidAmount)?;
    let rounded =
        amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero);
    if rounded <= Decimal::ZERO {
        return Err(ValidationCode::NonPositiveAmount);
    }
    Ok((rounded, rounded != amount))
}

/// Turn rows whose natural key is already committed into updates
///
/// Applies to rows that would otherwise be inserted; ERROR rows and in-file
/// duplicates are left alone.
pub fn mark_existing<F>(document_type: DocumentType, drafts: &mut [StagingDraft], exists: F)
where
    F: Fn(&AggregateKey) -> bool,
{
    for draft in drafts.iter_mut() {
        if draft.action_suggestion != Some(ActionSuggestion::Insert) {
            continue;
        }
        if draft
            .natural_key(document_type)
            .is_some_and(|key| exists(&key))
        {
            draft.validation_messages.push(ValidationCode::ExistsInLedger);
            draft.action_suggestion = Some(ActionSuggestion::Update);
        }
    }
}

/// Rebuild a ledger document from a committed row's raw data
///
/// Staging rows are validated before they reach commit, so a failure here
/// means the row was tampered with or the format changed: an invariant
/// violation rather than a validation finding.
pub fn decode_document(
    document_type: DocumentType,
    row_no: u32,
    raw: &RawData,
) -> Result<LedgerDocument, EngineError> {
    let field = |name: &str| {
        raw.get(name).map(String::as_str).ok_or_else(|| {
            EngineError::invariant(Some(row_no), format!("raw data lacks '{}'", name))
        })
    };
    let date = |text: &str| {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
            EngineError::invariant(Some(row_no), format!("'{}' is not an ISO date", text))
        })
    };

    let amount = Decimal::from_str(field(fields::AMOUNT)?).map_err(|_| {
        EngineError::invariant(Some(row_no), "raw amount is not a decimal".to_string())
    })?;
    let applied_period = raw
        .get(fields::APPLIED_PERIOD)
        .map(|text| date(text.as_str()))
        .transpose()?;

    Ok(LedgerDocument {
        kind: AggregateKind::from(document_type),
        customer_tax_id: normalize_key_part(field(fields::CUSTOMER_TAX_ID)?),
        document_no: normalize_key_part(field(fields::DOCUMENT_NO)?),
        issue_date: date(field(fields::ISSUE_DATE)?)?,
        applied_period,
        amount,
        outstanding: amount,
        status: DocumentStatus::Open,
        classification: raw
            .get(fields::CLASSIFICATION)
            .cloned()
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn invoices(csv: &str) -> Vec<StagingDraft> {
        let sheet = Sheet::from_bytes(csv.as_bytes()).unwrap();
        InvoiceParser
            .parse(&sheet, &ParseContext::default())
            .unwrap()
    }

    #[rstest]
    #[case::plain("120.50", Ok((Decimal::new(12050, 2), false)))]
    #[case::rounded_half_up("10.005", Ok((Decimal::new(1001, 2), true)))]
    #[case::spaces("1 000.00", Ok((Decimal::new(100000, 2), false)))]
    #[case::zero("0", Err(ValidationCode::NonPositiveAmount))]
    #[case::rounds_to_zero("0.001", Err(ValidationCode::NonPositiveAmount))]
    #[case::negative("-5", Err(ValidationCode::NonPositiveAmount))]
    #[case::text("ten", Err(ValidationCode::InvalidAmount))]
    fn test_parse_amount(
        #[case] text: &str,
        #[case] expected: Result<(Decimal, bool), ValidationCode>,
    ) {
        assert_eq!(parse_amount(text), expected);
    }

    #[test]
    fn test_duplicate_in_file_first_insert_then_skip() {
        let drafts = invoices(
            "customer_tax_id,invoice_no,issue_date,amount\n\
             T1,INV-1,2024-01-10,100\n\
             t1,inv-1,2024-01-11,90\n\
             T1,INV-2,2024-01-12,80\n",
        );

        assert_eq!(drafts[0].action_suggestion, Some(ActionSuggestion::Insert));
        assert!(drafts[0].validation_messages.is_empty());

        assert_eq!(drafts[1].action_suggestion, Some(ActionSuggestion::Skip));
        assert_eq!(drafts[1].validation_messages, vec![ValidationCode::DupInFile]);
        assert_eq!(drafts[1].status(), ValidationStatus::Warn);

        assert_eq!(drafts[2].action_suggestion, Some(ActionSuggestion::Insert));
    }

    #[test]
    fn test_required_fields_yield_error_without_action() {
        let drafts = invoices(
            "customer_tax_id,invoice_no,issue_date,amount\n\
             ,INV-1,,\n",
        );
        let draft = &drafts[0];
        assert_eq!(draft.status(), ValidationStatus::Error);
        assert_eq!(draft.action_suggestion, None);
        assert_eq!(
            draft.validation_messages,
            vec![
                ValidationCode::RequiredTaxId,
                ValidationCode::RequiredDate,
                ValidationCode::RequiredAmount
            ]
        );
    }

    #[test]
    fn test_dates_normalized_to_iso() {
        let drafts = invoices(
            "customer_tax_id,invoice_no,issue_date,amount\n\
             T1,A,2024-01-10,1\n\
             T1,B,10/01/2024,1\n\
             T1,C,10-01-2024,1\n",
        );
        for draft in &drafts {
            assert_eq!(draft.raw_data[fields::ISSUE_DATE], "2024-01-10");
        }
    }

    #[test]
    fn test_short_year_is_invalid_date() {
        let drafts = invoices(
            "customer_tax_id,invoice_no,issue_date,amount\n\
             T1,A,12/01/24,1\n\
             T1,B,01-02-03,1\n",
        );
        for draft in &drafts {
            assert_eq!(draft.validation_messages, vec![ValidationCode::InvalidDate]);
            assert_eq!(draft.status(), ValidationStatus::Error);
            assert!(!draft.raw_data.contains_key(fields::ISSUE_DATE));
        }
    }

    #[test]
    fn test_soft_issues_keep_action() {
        let drafts = invoices(
            "customer_tax_id,invoice_no,issue_date,amount,applied_period,category\n\
             T1,INV-1,2024-01-10,100,2024-01-15,furniture\n",
        );
        let draft = &drafts[0];
        assert_eq!(draft.status(), ValidationStatus::Warn);
        assert_eq!(draft.action_suggestion, Some(ActionSuggestion::Insert));
        assert_eq!(
            draft.validation_messages,
            vec![ValidationCode::PeriodNotFirstOfMonth, ValidationCode::InvalidEnum]
        );
        assert_eq!(draft.raw_data[fields::APPLIED_PERIOD], "2024-01-01");
        assert_eq!(draft.raw_data[fields::CLASSIFICATION], "other");
    }

    #[test]
    fn test_outside_batch_period() {
        let sheet = Sheet::from_bytes(
            b"customer_tax_id,invoice_no,issue_date,amount\nT1,INV-1,2024-02-01,5\n",
        )
        .unwrap();
        let context = ParseContext {
            period: BatchPeriod::new(
                NaiveDate::from_ymd_opt(2024, 1, 1),
                NaiveDate::from_ymd_opt(2024, 1, 31),
            ),
        };
        let drafts = InvoiceParser.parse(&sheet, &context).unwrap();
        assert_eq!(
            drafts[0].validation_messages,
            vec![ValidationCode::OutsideBatchPeriod]
        );
    }

    #[test]
    fn test_missing_required_header_is_structural() {
        let sheet = Sheet::from_bytes(b"customer_tax_id,invoice_no,amount\nT1,INV-1,5\n").unwrap();
        let result = InvoiceParser.parse(&sheet, &ParseContext::default());
        assert_eq!(result, Err(EngineError::missing_header("issue_date")));
    }

    #[test]
    fn test_mark_existing_turns_insert_into_update() {
        let mut drafts = invoices(
            "customer_tax_id,invoice_no,issue_date,amount\n\
             T1,INV-1,2024-01-10,100\n\
             T1,INV-2,2024-01-10,100\n",
        );
        let existing = AggregateKey::document(AggregateKind::Invoice, "T1", "INV-2");
        mark_existing(DocumentType::Invoice, &mut drafts, |key| *key == existing);

        assert_eq!(drafts[0].action_suggestion, Some(ActionSuggestion::Insert));
        assert_eq!(drafts[1].action_suggestion, Some(ActionSuggestion::Update));
        assert_eq!(
            drafts[1].validation_messages,
            vec![ValidationCode::ExistsInLedger]
        );
    }

    #[test]
    fn test_decode_document_round_trips_parsed_row() {
        let drafts = invoices(
            "customer_tax_id,invoice_no,issue_date,amount,applied_period\n\
             t1,inv-9,15/01/2024,99.90,2024-01\n",
        );
        let document = decode_document(DocumentType::Invoice, 1, &drafts[0].raw_data).unwrap();
        assert_eq!(document.customer_tax_id, "T1");
        assert_eq!(document.document_no, "INV-9");
        assert_eq!(document.amount, Decimal::new(9990, 2));
        assert_eq!(document.outstanding, document.amount);
        assert_eq!(document.applied_period, NaiveDate::from_ymd_opt(2024, 1, 1));
    }

    #[test]
    fn test_decode_document_rejects_incomplete_raw_data() {
        let raw = RawData::new();
        let result = decode_document(DocumentType::Invoice, 3, &raw);
        assert!(matches!(
            result,
            Err(EngineError::InvariantViolation { row_no: Some(3), .. })
        ));
    }
}
