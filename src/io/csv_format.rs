//! CSV format handling for CLI input and output
//!
//! This module centralizes the CSV shapes the command line speaks:
//! - `TargetRecord` for reading allocation targets
//! - import reports, staging rows and allocation lines for output
//!
//! Writers take any `Write` and never touch the file system themselves.

use crate::io::dates::parse_date;
use crate::parser::fields;
use crate::types::{
    AllocationResult, AllocationTarget, BatchId, Page, StagingRow, TargetType,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;

/// Allocation target as read from CSV
///
/// Columns: `id, type, issue_date, applied_period, outstanding`. The
/// `applied_period` column may be empty.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TargetRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub issue_date: String,
    pub applied_period: Option<String>,
    pub outstanding: String,
}

/// Convert a TargetRecord to an AllocationTarget
///
/// # Returns
///
/// Result containing either:
/// - Ok(AllocationTarget) - Successfully converted record
/// - Err(String) - Error message describing the conversion failure
pub fn convert_target_record(record: TargetRecord) -> Result<AllocationTarget, String> {
    let target_type = match record.target_type.trim().to_lowercase().as_str() {
        "invoice" => TargetType::Invoice,
        "advance" => TargetType::Advance,
        other => {
            return Err(format!(
                "Invalid target type: '{}' for target {}",
                other, record.id
            ))
        }
    };

    let issue_date = parse_date(&record.issue_date).ok_or_else(|| {
        format!(
            "Invalid issue date '{}' for target {}",
            record.issue_date, record.id
        )
    })?;

    let applied_period = match record.applied_period.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Some(parse_date(text).ok_or_else(|| {
            format!("Invalid applied period '{}' for target {}", text, record.id)
        })?),
        _ => None,
    };

    let outstanding_amount = Decimal::from_str(record.outstanding.trim()).map_err(|_| {
        format!(
            "Invalid outstanding amount '{}' for target {}",
            record.outstanding, record.id
        )
    })?;

    Ok(AllocationTarget {
        id: record.id,
        target_type,
        issue_date,
        applied_period,
        outstanding_amount,
    })
}

/// Read every allocation target from CSV, failing on the first bad record
pub fn read_targets_csv<R: Read>(input: R) -> Result<Vec<AllocationTarget>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut targets = Vec::new();
    for (index, record) in reader.deserialize::<TargetRecord>().enumerate() {
        let record = record.map_err(|e| format!("Failed to read target {}: {}", index + 1, e))?;
        targets.push(convert_target_record(record)?);
    }
    Ok(targets)
}

/// Outcome of importing one file, as printed by the `import` command
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub file: String,
    pub document_type: String,
    pub batch: Option<BatchId>,
    pub status: String,
    pub total: usize,
    pub ok: usize,
    pub warn: usize,
    pub error: usize,
    pub committed_rows: usize,
    pub skipped_rows: usize,
    pub message: String,
}

/// Write import reports, one row per file, in the given order
pub fn write_import_reports_csv(
    reports: &[ImportReport],
    output: &mut dyn Write,
) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);
    for report in reports {
        writer
            .serialize(report)
            .map_err(|e| format!("Failed to write import report: {}", e))?;
    }
    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Write one page of staging rows
///
/// Columns: `row_no, status, action, messages, customer_tax_id, document_no,
/// issue_date, amount`. Messages are joined with `;`.
pub fn write_staging_rows_csv(
    page: &Page<StagingRow>,
    output: &mut dyn Write,
) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);

    writer
        .write_record([
            "row_no",
            "status",
            "action",
            "messages",
            "customer_tax_id",
            "document_no",
            "issue_date",
            "amount",
        ])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    for row in &page.items {
        let field = |name: &str| row.raw_data.get(name).cloned().unwrap_or_default();
        let messages: Vec<&str> = row
            .validation_messages
            .iter()
            .map(|code| code.code())
            .collect();
        writer
            .write_record(&[
                row.row_no.to_string(),
                row.validation_status.to_string(),
                row.action_suggestion
                    .map(|action| action.to_string())
                    .unwrap_or_default(),
                messages.join(";"),
                field(fields::CUSTOMER_TAX_ID),
                field(fields::DOCUMENT_NO),
                field(fields::ISSUE_DATE),
                field(fields::AMOUNT),
            ])
            .map_err(|e| format!("Failed to write staging row: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}

/// Write allocation lines followed by an `UNALLOCATED` row
pub fn write_allocation_csv(
    result: &AllocationResult,
    output: &mut dyn Write,
) -> Result<(), String> {
    let mut writer = csv::Writer::from_writer(output);

    writer
        .write_record(["target_id", "amount"])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;
    for line in &result.lines {
        writer
            .write_record(&[line.target_id.clone(), format!("{:.2}", line.amount)])
            .map_err(|e| format!("Failed to write allocation line: {}", e))?;
    }
    writer
        .write_record(&[
            "UNALLOCATED".to_string(),
            format!("{:.2}", result.unallocated_amount),
        ])
        .map_err(|e| format!("Failed to write allocation line: {}", e))?;

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))
}
