//! Commit coordinator
//!
//! Applies the eligible rows of a staging batch to the ledger. Rows are read
//! from the staging store `chunk_size` at a time and applied in row order
//! through an [`AggregateArena`]; each chunk is flushed into one ledger
//! transaction that is committed only after the last chunk. Any failure drops
//! the transaction, so the ledger sees all of the batch or none of it.

use crate::core::arena::{AggregateArena, CommitJournal};
use crate::core::ledger_store::LedgerTransaction;
use crate::core::staging_store::StagingStore;
use crate::core::traits::LedgerStore;
use crate::parser::{decode_document, fields};
use crate::types::{
    ActionSuggestion, Aggregate, AggregateKey, Customer, DocumentType, EngineError, ImportBatch,
    StagingRow, Writer,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub committed_rows: usize,
    /// Rows not applied: ERROR, Skip, and WARN rows unless included
    pub skipped_rows: usize,
    /// Most aggregates held in memory at once during the commit
    pub peak_tracked_aggregates: usize,
}

/// Applies one batch's rows to the ledger
pub struct CommitCoordinator<'a> {
    ledger: &'a dyn LedgerStore,
    staging: &'a StagingStore,
    chunk_size: usize,
}

impl<'a> CommitCoordinator<'a> {
    pub fn new(ledger: &'a dyn LedgerStore, staging: &'a StagingStore, chunk_size: usize) -> Self {
        Self {
            ledger,
            staging,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Apply the batch and commit the ledger transaction
    ///
    /// The caller is responsible for the batch being in `Staging` and for
    /// holding its busy guard.
    ///
    /// # Returns
    ///
    /// The row counts and the journal of every aggregate written, used for
    /// audit and for a later rollback.
    ///
    /// # Errors
    ///
    /// - [`EngineError::VersionConflict`] when another writer got there first
    ///   (retryable)
    /// - [`EngineError::MissingReference`] for a receipt whose customer is unknown
    /// - [`EngineError::DuplicateAggregate`] / [`EngineError::InvariantViolation`]
    ///   for rows the ledger cannot accept
    pub fn run(
        &self,
        batch: &ImportBatch,
        include_warn_rows: bool,
    ) -> Result<(CommitOutcome, CommitJournal), EngineError> {
        let writer = Writer::Batch(batch.id);
        let mut txn = LedgerTransaction::begin(self.ledger);
        let mut arena = AggregateArena::new();
        let mut journal = CommitJournal::new();
        let mut committed_rows = 0;
        let mut skipped_rows = 0;
        let mut offset = 0;

        loop {
            let rows = self.staging.chunk(batch.id, offset, self.chunk_size);
            if rows.is_empty() {
                break;
            }
            offset += rows.len();

            for row in &rows {
                if !row.is_eligible(include_warn_rows) {
                    skipped_rows += 1;
                    continue;
                }
                apply_row(&mut arena, &txn, batch.document_type, row)?;
                committed_rows += 1;
            }

            for change in arena.flush(&mut txn, &writer)? {
                journal.record(change)?;
            }
            tracing::debug!(batch = batch.id, rows = offset, "chunk staged");
        }

        txn.commit()?;

        Ok((
            CommitOutcome {
                committed_rows,
                skipped_rows,
                peak_tracked_aggregates: arena.peak(),
            },
            journal,
        ))
    }
}

fn apply_row(
    arena: &mut AggregateArena,
    txn: &LedgerTransaction<'_>,
    document_type: DocumentType,
    row: &StagingRow,
) -> Result<(), EngineError> {
    let document = decode_document(document_type, row.row_no, &row.raw_data)?;
    let customer_key = document.customer_key();

    match row.action_suggestion {
        Some(ActionSuggestion::Insert) => {
            let balance_delta = match document_type {
                DocumentType::Receipt => {
                    if arena.get(txn, &customer_key).is_none() {
                        return Err(EngineError::missing_reference(row.row_no, &customer_key));
                    }
                    -document.amount
                }
                DocumentType::Invoice | DocumentType::Advance => {
                    if arena.get(txn, &customer_key).is_none() {
                        let name = row.raw_data.get(fields::CUSTOMER_NAME).cloned();
                        let customer = Customer::new(&document.customer_tax_id, name);
                        arena.insert(txn, Aggregate::Customer(customer))?;
                    }
                    document.amount
                }
            };
            adjust_customer(arena, txn, &customer_key, row.row_no, balance_delta)?;
            arena
                .insert(txn, Aggregate::Document(document))
                .map_err(|err| err.at_row(row.row_no))
        }
        Some(ActionSuggestion::Update) => {
            if document_type == DocumentType::Receipt {
                return Err(EngineError::invariant(
                    Some(row.row_no),
                    "committed receipts cannot be re-priced",
                ));
            }
            let key = document.key();
            let existing = match arena.get_mut(txn, &key) {
                Some(Aggregate::Document(existing)) => existing,
                _ => return Err(EngineError::missing_reference(row.row_no, &key)),
            };
            let delta = existing
                .reprice(document.amount)
                .map_err(|err| err.at_row(row.row_no))?;
            existing.issue_date = document.issue_date;
            existing.applied_period = document.applied_period;
            existing.classification = document.classification;
            adjust_customer(arena, txn, &customer_key, row.row_no, delta)
        }
        Some(ActionSuggestion::Skip) | None => Err(EngineError::invariant(
            Some(row.row_no),
            "row has no applicable action",
        )),
    }
}

fn adjust_customer(
    arena: &mut AggregateArena,
    txn: &LedgerTransaction<'_>,
    key: &AggregateKey,
    row_no: u32,
    delta: Decimal,
) -> Result<(), EngineError> {
    match arena.get_mut(txn, key) {
        Some(Aggregate::Customer(customer)) => {
            customer.adjust_balance(delta);
            Ok(())
        }
        _ => Err(EngineError::missing_reference(row_no, key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger_store::InMemoryLedger;
    use crate::io::sheet::Sheet;
    use crate::parser::{parser_for, ParseContext};
    use crate::types::{AggregateKind, BatchId, BatchPeriod, BatchStatus};
    use chrono::Utc;
    use std::fmt::Write;

    fn stage(
        staging: &StagingStore,
        id: BatchId,
        document_type: DocumentType,
        csv: &str,
    ) -> ImportBatch {
        let sheet = Sheet::from_bytes(csv.as_bytes()).unwrap();
        let drafts = parser_for(document_type)
            .parse(&sheet, &ParseContext::default())
            .unwrap();
        staging.insert(id, drafts).unwrap();
        ImportBatch {
            id,
            document_type,
            source: "test".to_string(),
            status: BatchStatus::Staging,
            file_hash: format!("hash-{}", id),
            idempotency_key: None,
            period: BatchPeriod::default(),
            created_at: Utc::now(),
            committed_at: None,
            cancelled_at: None,
            cancel_reason: None,
            last_actor: None,
        }
    }

    fn balance(ledger: &InMemoryLedger, tax_id: &str) -> Decimal {
        ledger
            .load(&AggregateKey::customer(tax_id))
            .and_then(|v| v.aggregate.as_customer().map(|c| c.current_balance))
            .unwrap_or_default()
    }

    #[test]
    fn test_invoices_create_customer_and_skip_error_rows() {
        let ledger = InMemoryLedger::new();
        let staging = StagingStore::new();
        let batch = stage(
            &staging,
            1,
            DocumentType::Invoice,
            "customer_tax_id,invoice_no,issue_date,amount\n\
             T1,INV-1,2024-01-10,100\n\
             T1,INV-2,2024-01-11,50\n\
             T1,INV-3,2024-01-12,\n",
        );

        let (outcome, journal) = CommitCoordinator::new(&ledger, &staging, 20)
            .run(&batch, false)
            .unwrap();

        assert_eq!((outcome.committed_rows, outcome.skipped_rows), (2, 1));
        assert_eq!(balance(&ledger, "T1"), Decimal::new(150, 0));
        assert_eq!(journal.documents.len(), 2);
        assert_eq!(
            journal.customers[&AggregateKey::customer("T1")].delta,
            Decimal::new(150, 0)
        );
        let invoice = ledger
            .load(&AggregateKey::document(AggregateKind::Invoice, "T1", "INV-1"))
            .unwrap();
        assert_eq!(invoice.version, 1);
        assert_eq!(invoice.last_writer, Writer::Batch(1));
    }

    #[test]
    fn test_warn_rows_need_explicit_opt_in() {
        let ledger = InMemoryLedger::new();
        let staging = StagingStore::new();
        let batch = stage(
            &staging,
            1,
            DocumentType::Invoice,
            "customer_tax_id,invoice_no,issue_date,amount,category\n\
             T1,INV-1,2024-01-10,100,bogus\n",
        );
        let coordinator = CommitCoordinator::new(&ledger, &staging, 20);

        let (outcome, _) = coordinator.run(&batch, false).unwrap();
        assert_eq!((outcome.committed_rows, outcome.skipped_rows), (0, 1));
        assert!(ledger.is_empty());

        let (outcome, _) = coordinator.run(&batch, true).unwrap();
        assert_eq!((outcome.committed_rows, outcome.skipped_rows), (1, 0));
    }

    #[test]
    fn test_receipt_for_unknown_customer_aborts_without_mutation() {
        let ledger = InMemoryLedger::new();
        let staging = StagingStore::new();
        let invoices = stage(
            &staging,
            1,
            DocumentType::Invoice,
            "customer_tax_id,invoice_no,issue_date,amount\nT1,INV-1,2024-01-10,100\n",
        );
        CommitCoordinator::new(&ledger, &staging, 20)
            .run(&invoices, false)
            .unwrap();

        let receipts = stage(
            &staging,
            2,
            DocumentType::Receipt,
            "customer_tax_id,receipt_no,receipt_date,amount\n\
             T1,R-1,2024-02-01,40\n\
             T9,R-2,2024-02-01,10\n",
        );
        let result = CommitCoordinator::new(&ledger, &staging, 20).run(&receipts, false);

        assert_eq!(
            result.unwrap_err(),
            EngineError::missing_reference(2, "customer:T9")
        );
        assert_eq!(balance(&ledger, "T1"), Decimal::new(100, 0));
        assert!(ledger
            .load(&AggregateKey::document(AggregateKind::Receipt, "T1", "R-1"))
            .is_none());
    }

    #[test]
    fn test_large_batch_keeps_tracked_aggregates_bounded() {
        let ledger = InMemoryLedger::new();
        let staging = StagingStore::new();
        let mut csv = String::from("customer_tax_id,invoice_no,issue_date,amount\n");
        for n in 0..1200 {
            writeln!(csv, "T{},INV-{},2024-01-10,10", n % 30, n).unwrap();
        }
        let batch = stage(&staging, 1, DocumentType::Invoice, &csv);

        let (outcome, journal) = CommitCoordinator::new(&ledger, &staging, 20)
            .run(&batch, false)
            .unwrap();

        assert_eq!(outcome.committed_rows, 1200);
        assert!(outcome.peak_tracked_aggregates <= 50);
        assert_eq!(journal.documents.len(), 1200);
        assert_eq!(journal.snapshot_count(), 0);
        assert_eq!(ledger.len(), 1230);
        assert_eq!(balance(&ledger, "T0"), Decimal::new(400, 0));
    }
}
