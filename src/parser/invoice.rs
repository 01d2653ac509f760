//! Invoice sheet parser
//!
//! Required columns: `customer_tax_id`, `invoice_no`, `issue_date`, `amount`.
//! Optional: `customer_name`, `applied_period`, `category`.

use super::{DocumentLayout, DocumentParser, EnumColumn};
use crate::types::DocumentType;

const LAYOUT: DocumentLayout = DocumentLayout {
    document_type: DocumentType::Invoice,
    document_no_column: "invoice_no",
    date_column: "issue_date",
    classification: EnumColumn {
        column: "category",
        allowed: &["service", "goods", "other"],
        default: "other",
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct InvoiceParser;

impl DocumentParser for InvoiceParser {
    fn layout(&self) -> &DocumentLayout {
        &LAYOUT
    }
}
