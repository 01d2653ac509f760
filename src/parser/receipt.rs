//! Cash receipt sheet parser
//!
//! Required columns: `customer_tax_id`, `receipt_no`, `receipt_date`, `amount`.
//! Optional: `customer_name`, `applied_period`, `method`.

use super::{DocumentLayout, DocumentParser, EnumColumn};
use crate::types::DocumentType;

const LAYOUT: DocumentLayout = DocumentLayout {
    document_type: DocumentType::Receipt,
    document_no_column: "receipt_no",
    date_column: "receipt_date",
    classification: EnumColumn {
        column: "method",
        allowed: &["cash", "transfer", "card", "cheque"],
        default: "transfer",
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiptParser;

impl DocumentParser for ReceiptParser {
    fn layout(&self) -> &DocumentLayout {
        &LAYOUT
    }
}
