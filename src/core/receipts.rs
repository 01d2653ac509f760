//! Receipt posting
//!
//! Distributes the unapplied cash of a committed receipt over the customer's
//! open invoices and advances. Allocation lines are written back in one
//! ledger transaction against the versions the targets were read at, so a
//! concurrent commit or posting surfaces as a retryable version conflict.
//!
//! The customer balance is unchanged by posting: obligations and unapplied
//! cash shrink by the same amount.

use crate::core::allocation::allocate;
use crate::core::arena::Change;
use crate::core::ledger_store::LedgerTransaction;
use crate::core::traits::LedgerStore;
use crate::types::{
    Aggregate, AggregateKey, AggregateKind, AllocationMode, AllocationRequest, AllocationResult,
    EngineError, LedgerDocument, Versioned, Writer,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a receipt should be distributed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptAllocation {
    pub mode: AllocationMode,
    pub applied_period: Option<NaiveDate>,
    pub selected_targets: Option<Vec<String>>,
}

impl ReceiptAllocation {
    pub fn fifo() -> Self {
        Self {
            mode: AllocationMode::Fifo,
            applied_period: None,
            selected_targets: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostingOutcome {
    pub allocation: AllocationResult,
    /// Targets settled and the receipt itself, in write order
    pub changes: Vec<Change>,
}

pub struct ReceiptPoster<'a> {
    ledger: &'a dyn LedgerStore,
}

impl<'a> ReceiptPoster<'a> {
    pub fn new(ledger: &'a dyn LedgerStore) -> Self {
        Self { ledger }
    }

    pub fn post(
        &self,
        receipt_key: &AggregateKey,
        how: &ReceiptAllocation,
    ) -> Result<PostingOutcome, EngineError> {
        let writer = Writer::Receipt(receipt_key.id.clone());
        let mut txn = LedgerTransaction::begin(self.ledger);

        let receipt = txn
            .get(receipt_key)
            .ok_or_else(|| EngineError::aggregate_not_found(receipt_key))?;
        let receipt_doc = match receipt.aggregate.as_document() {
            Some(document) if document.kind == AggregateKind::Receipt => document.clone(),
            _ => {
                return Err(EngineError::invariant(
                    None,
                    format!("{} is not a receipt", receipt_key),
                ))
            }
        };

        let candidates: HashMap<String, (Versioned, LedgerDocument)> = self
            .ledger
            .documents_of(&receipt_doc.customer_tax_id)
            .into_iter()
            .filter_map(|versioned| {
                let document = versioned.aggregate.as_document()?.clone();
                document.as_target()?;
                Some((document.key().id, (versioned, document)))
            })
            .collect();
        let mut targets: Vec<_> = candidates
            .values()
            .filter_map(|(_, document)| document.as_target())
            .collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));

        let request = AllocationRequest {
            amount: receipt_doc.outstanding,
            mode: how.mode,
            applied_period: how.applied_period,
            selected_targets: how.selected_targets.clone(),
        };
        let allocation = allocate(&request, &targets)?;
        if allocation.lines.is_empty() {
            return Ok(PostingOutcome {
                allocation,
                changes: Vec::new(),
            });
        }

        let mut changes = Vec::with_capacity(allocation.lines.len() + 1);
        for line in &allocation.lines {
            let Some((read, document)) = candidates.get(&line.target_id) else {
                return Err(EngineError::aggregate_not_found(&line.target_id));
            };
            let mut settled = document.clone();
            settled.settle(line.amount)?;
            let after = txn.update(read, Aggregate::Document(settled), &writer)?;
            changes.push(Change {
                key: read.aggregate.key(),
                before: Some(read.clone()),
                after: Some(after),
            });
        }

        let mut applied = receipt_doc;
        applied.settle(allocation.allocated_amount())?;
        let after = txn.update(&receipt, Aggregate::Document(applied), &writer)?;
        changes.push(Change {
            key: receipt_key.clone(),
            before: Some(receipt),
            after: Some(after),
        });

        txn.commit()?;
        tracing::info!(
            receipt = %receipt_key,
            lines = allocation.lines.len(),
            unallocated = %allocation.unallocated_amount,
            "receipt posted"
        );
        Ok(PostingOutcome {
            allocation,
            changes,
        })
    }
}
