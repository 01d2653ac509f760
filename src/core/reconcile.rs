//! Customer balance reconciliation
//!
//! `current_balance` is maintained incrementally by commits and rollbacks.
//! Reconciliation recomputes it from the customer's documents (open invoice
//! and advance amounts minus unapplied receipt cash) and corrects it with a
//! versioned write when the two disagree.

use crate::core::arena::Change;
use crate::core::ledger_store::LedgerTransaction;
use crate::core::traits::LedgerStore;
use crate::types::{Aggregate, AggregateKey, AggregateKind, EngineError, Writer};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub tax_id: String,
    pub previous_balance: Decimal,
    pub balance: Decimal,
    /// Present only when the stored balance had drifted
    #[serde(skip)]
    pub change: Option<Change>,
}

impl ReconcileOutcome {
    pub fn drifted(&self) -> bool {
        self.change.is_some()
    }
}

/// Balance implied by a customer's committed documents
pub fn expected_balance(ledger: &dyn LedgerStore, tax_id: &str) -> Decimal {
    ledger
        .documents_of(tax_id)
        .iter()
        .filter_map(|versioned| versioned.aggregate.as_document())
        .map(|document| match document.kind {
            AggregateKind::Invoice | AggregateKind::Advance => document.outstanding,
            AggregateKind::Receipt => -document.outstanding,
            AggregateKind::Customer => Decimal::ZERO,
        })
        .sum()
}

pub fn reconcile_customer(
    ledger: &dyn LedgerStore,
    tax_id: &str,
) -> Result<ReconcileOutcome, EngineError> {
    let key = AggregateKey::customer(tax_id);
    let mut txn = LedgerTransaction::begin(ledger);
    let current = txn
        .get(&key)
        .ok_or_else(|| EngineError::aggregate_not_found(&key))?;
    let Aggregate::Customer(mut customer) = current.aggregate.clone() else {
        return Err(EngineError::invariant(None, format!("{} is not a customer", key)));
    };

    let previous_balance = customer.current_balance;
    let balance = expected_balance(ledger, tax_id);
    if balance == previous_balance {
        return Ok(ReconcileOutcome {
            tax_id: customer.tax_id,
            previous_balance,
            balance,
            change: None,
        });
    }

    customer.adjust_balance(balance - previous_balance);
    let tax_id = customer.tax_id.clone();
    let after = txn.update(&current, Aggregate::Customer(customer), &Writer::Reconcile)?;
    txn.commit()?;
    tracing::warn!(customer = %tax_id, %previous_balance, %balance, "customer balance corrected");

    Ok(ReconcileOutcome {
        tax_id,
        previous_balance,
        balance,
        change: Some(Change {
            key,
            before: Some(current),
            after: Some(after),
        }),
    })
}
