//! Prepaid advance sheet parser
//!
//! Required columns: `customer_tax_id`, `advance_no`, `issue_date`, `amount`.
//! Optional: `customer_name`, `applied_period`, `kind`.

use super::{DocumentLayout, DocumentParser, EnumColumn};
use crate::types::DocumentType;

const LAYOUT: DocumentLayout = DocumentLayout {
    document_type: DocumentType::Advance,
    document_no_column: "advance_no",
    date_column: "issue_date",
    classification: EnumColumn {
        column: "kind",
        allowed: &["deposit", "prepayment"],
        default: "prepayment",
    },
};

#[derive(Debug, Clone, Copy, Default)]
pub struct AdvanceParser;

impl DocumentParser for AdvanceParser {
    fn layout(&self) -> &DocumentLayout {
        &LAYOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sheet::Sheet;
    use crate::parser::{fields, ParseContext};
    use crate::types::{EngineError, ValidationCode};

    #[test]
    fn test_invoice_headers_do_not_satisfy_advance_layout() {
        let sheet = Sheet::from_bytes(
            b"customer_tax_id,invoice_no,issue_date,amount\nT1,INV-1,2024-01-01,10\n",
        )
        .unwrap();
        let result = AdvanceParser.parse(&sheet, &ParseContext::default());
        assert_eq!(result, Err(EngineError::missing_header("advance_no")));
    }

    #[test]
    fn test_unknown_kind_defaults_to_prepayment() {
        let sheet = Sheet::from_bytes(
            b"customer_tax_id,advance_no,issue_date,amount,kind\nT1,ADV-1,2024-01-01,10,loan\n",
        )
        .unwrap();
        let drafts = AdvanceParser.parse(&sheet, &ParseContext::default()).unwrap();
        assert_eq!(drafts[0].validation_messages, vec![ValidationCode::InvalidEnum]);
        assert_eq!(drafts[0].raw_data[fields::CLASSIFICATION], "prepayment");
    }
}
