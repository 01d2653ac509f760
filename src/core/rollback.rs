//! Rollback coordinator
//!
//! Reverses a committed batch from its [`CommitJournal`]. Documents are
//! restored to the state they had before the batch (or removed if the batch
//! created them), but only while they still carry the version the batch left:
//! any later write, such as a receipt allocation, blocks the rollback and is
//! named in the error. Customer balances are derived figures, so the batch's
//! net contribution is subtracted instead of restoring a snapshot.

use crate::core::arena::{Change, CommitJournal};
use crate::core::ledger_store::LedgerTransaction;
use crate::core::traits::LedgerStore;
use crate::types::{Aggregate, EngineError, ImportBatch, Writer};

pub struct RollbackCoordinator<'a> {
    ledger: &'a dyn LedgerStore,
}

impl<'a> RollbackCoordinator<'a> {
    pub fn new(ledger: &'a dyn LedgerStore) -> Self {
        Self { ledger }
    }

    /// Undo the batch's ledger writes in one transaction
    ///
    /// # Errors
    ///
    /// - [`EngineError::RollbackBlocked`] when a document was modified or
    ///   removed after the batch committed
    /// - [`EngineError::VersionConflict`] when a concurrent writer commits
    ///   first (retryable)
    pub fn run(
        &self,
        batch: &ImportBatch,
        journal: &CommitJournal,
    ) -> Result<Vec<Change>, EngineError> {
        let writer = Writer::Rollback(batch.id);
        let mut txn = LedgerTransaction::begin(self.ledger);
        let mut changes = Vec::new();

        for (key, trace) in &journal.documents {
            let current = txn
                .get(key)
                .ok_or_else(|| EngineError::rollback_blocked(batch.id, key, "removal"))?;
            if current.version != trace.after_version {
                return Err(EngineError::rollback_blocked(
                    batch.id,
                    key,
                    &current.last_writer,
                ));
            }

            let after = match &trace.before {
                Some(before) => Some(txn.update(&current, before.aggregate.clone(), &writer)?),
                None => {
                    txn.remove(&current, &writer)?;
                    None
                }
            };
            changes.push(Change {
                key: key.clone(),
                before: Some(current),
                after,
            });
        }

        for (key, trace) in &journal.customers {
            let delta = trace.delta;
            if delta.is_zero() {
                continue;
            }
            let Some(current) = txn.get(key) else {
                tracing::warn!(batch = batch.id, %key, "customer vanished before rollback");
                continue;
            };
            let Aggregate::Customer(mut customer) = current.aggregate.clone() else {
                continue;
            };
            customer.adjust_balance(-delta);
            let after = txn.update(&current, Aggregate::Customer(customer), &writer)?;
            changes.push(Change {
                key: key.clone(),
                before: Some(current),
                after: Some(after),
            });
        }

        txn.commit()?;
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::arena::AggregateArena;
    use crate::core::ledger_store::InMemoryLedger;
    use crate::types::{
        AggregateKey, AggregateKind, Customer, DocumentStatus, LedgerDocument, Versioned,
    };
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    fn batch(id: u64) -> ImportBatch {
        ImportBatch {
            id,
            document_type: crate::types::DocumentType::Invoice,
            source: "test".to_string(),
            status: crate::types::BatchStatus::Committed,
            file_hash: "h".to_string(),
            idempotency_key: None,
            period: Default::default(),
            created_at: Utc::now(),
            committed_at: Some(Utc::now()),
            cancelled_at: None,
            cancel_reason: None,
            last_actor: None,
        }
    }

    fn invoice(amount: i64) -> LedgerDocument {
        LedgerDocument {
            kind: AggregateKind::Invoice,
            customer_tax_id: "T1".to_string(),
            document_no: "INV-1".to_string(),
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            applied_period: None,
            amount: Decimal::new(amount, 0),
            outstanding: Decimal::new(amount, 0),
            status: DocumentStatus::Open,
            classification: "other".to_string(),
        }
    }

    /// Commit a customer plus one invoice as batch 1 and return its journal
    fn commit_batch(ledger: &InMemoryLedger) -> CommitJournal {
        let mut txn = LedgerTransaction::begin(ledger);
        let mut arena = AggregateArena::new();
        let mut customer = Customer::new("T1", None);
        customer.adjust_balance(Decimal::new(100, 0));
        arena.insert(&txn, Aggregate::Customer(customer)).unwrap();
        arena.insert(&txn, Aggregate::Document(invoice(100))).unwrap();
        let mut journal = CommitJournal::new();
        for change in arena.flush(&mut txn, &Writer::Batch(1)).unwrap() {
            journal.record(change).unwrap();
        }
        txn.commit().unwrap();
        journal
    }

    fn invoice_key() -> AggregateKey {
        AggregateKey::document(AggregateKind::Invoice, "T1", "INV-1")
    }

    #[test]
    fn test_rollback_removes_created_documents_and_reverses_balance() {
        let ledger = InMemoryLedger::new();
        let journal = commit_batch(&ledger);

        let changes = RollbackCoordinator::new(&ledger).run(&batch(1), &journal).unwrap();

        assert_eq!(changes.len(), 2);
        assert!(ledger.load(&invoice_key()).is_none());
        let customer = ledger.load(&AggregateKey::customer("T1")).unwrap();
        assert_eq!(customer.aggregate.as_customer().unwrap().current_balance, Decimal::ZERO);
        assert_eq!(customer.version, 2);
        assert_eq!(customer.last_writer, Writer::Rollback(1));
    }

    #[test]
    fn test_later_write_blocks_rollback_and_names_writer() {
        let ledger = InMemoryLedger::new();
        let journal = commit_batch(&ledger);

        let current: Versioned = ledger.load(&invoice_key()).unwrap();
        let mut settled = invoice(100);
        settled.settle(Decimal::new(30, 0)).unwrap();
        let mut txn = LedgerTransaction::begin(&ledger);
        txn.update(&current, Aggregate::Document(settled), &Writer::Receipt("T1/R-1".to_string()))
            .unwrap();
        txn.commit().unwrap();

        let result = RollbackCoordinator::new(&ledger).run(&batch(1), &journal);

        assert_eq!(
            result.unwrap_err(),
            EngineError::rollback_blocked(1, "invoice:T1/INV-1", "receipt T1/R-1")
        );
        let customer = ledger.load(&AggregateKey::customer("T1")).unwrap();
        assert_eq!(customer.version, 1);
    }
}
