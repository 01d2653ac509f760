//! Ledger aggregate types
//!
//! The balance ledger holds four aggregate kinds: customers and the three
//! document kinds (invoices, advances, receipts). Every stored aggregate is
//! wrapped in [`Versioned`], whose `version` is the optimistic-concurrency
//! token and whose `last_writer` names who produced that version.

use super::allocation::{AllocationTarget, TargetType};
use super::batch::{BatchId, DocumentType};
use super::error::EngineError;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateKind {
    Customer,
    Invoice,
    Advance,
    Receipt,
}

impl AggregateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateKind::Customer => "customer",
            AggregateKind::Invoice => "invoice",
            AggregateKind::Advance => "advance",
            AggregateKind::Receipt => "receipt",
        }
    }
}

impl From<DocumentType> for AggregateKind {
    fn from(document_type: DocumentType) -> Self {
        match document_type {
            DocumentType::Invoice => AggregateKind::Invoice,
            DocumentType::Advance => AggregateKind::Advance,
            DocumentType::Receipt => AggregateKind::Receipt,
        }
    }
}

/// Identity of a ledger aggregate
///
/// Customers are keyed by tax id, documents by `TAXID/DOCUMENT_NO`; both parts
/// are trimmed and upper-cased so that the natural key is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    pub kind: AggregateKind,
    pub id: String,
}

impl AggregateKey {
    pub fn customer(tax_id: &str) -> Self {
        Self {
            kind: AggregateKind::Customer,
            id: normalize_key_part(tax_id),
        }
    }

    pub fn document(kind: AggregateKind, tax_id: &str, document_no: &str) -> Self {
        Self {
            kind,
            id: format!(
                "{}/{}",
                normalize_key_part(tax_id),
                normalize_key_part(document_no)
            ),
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

pub fn normalize_key_part(part: &str) -> String {
    part.trim().to_uppercase()
}

/// Settlement state of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Nothing allocated yet
    Open,
    PartiallySettled,
    /// Outstanding amount is zero
    Settled,
}

/// Invoice, advance or receipt as held by the ledger
///
/// For invoices and advances `outstanding` is the amount still owed; for
/// receipts it is the cash not yet allocated to any obligation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerDocument {
    pub kind: AggregateKind,
    pub customer_tax_id: String,
    pub document_no: String,
    pub issue_date: NaiveDate,
    /// Accounting month (first day) the document belongs to, when declared
    pub applied_period: Option<NaiveDate>,
    pub amount: Decimal,
    pub outstanding: Decimal,
    pub status: DocumentStatus,
    /// Category, advance kind or payment method, depending on `kind`
    pub classification: String,
}

impl LedgerDocument {
    pub fn key(&self) -> AggregateKey {
        AggregateKey::document(self.kind, &self.customer_tax_id, &self.document_no)
    }

    pub fn customer_key(&self) -> AggregateKey {
        AggregateKey::customer(&self.customer_tax_id)
    }

    fn refresh_status(&mut self) {
        self.status = if self.outstanding.is_zero() {
            DocumentStatus::Settled
        } else if self.outstanding == self.amount {
            DocumentStatus::Open
        } else {
            DocumentStatus::PartiallySettled
        };
    }

    /// Reduce the outstanding amount, refusing to go below zero
    pub fn settle(&mut self, amount: Decimal) -> Result<(), EngineError> {
        let remaining = self.outstanding - amount;
        if amount < Decimal::ZERO || remaining < Decimal::ZERO {
            return Err(EngineError::invariant(
                None,
                format!(
                    "settling {} against {} would leave outstanding {}",
                    amount,
                    self.key(),
                    remaining
                ),
            ));
        }
        self.outstanding = remaining;
        self.refresh_status();
        Ok(())
    }

    /// Replace the document amount, shifting outstanding by the same delta
    ///
    /// Returns the delta applied.
    pub fn reprice(&mut self, new_amount: Decimal) -> Result<Decimal, EngineError> {
        let delta = new_amount - self.amount;
        let outstanding = self.outstanding + delta;
        if outstanding < Decimal::ZERO {
            return Err(EngineError::invariant(
                None,
                format!(
                    "repricing {} to {} would leave outstanding {}",
                    self.key(),
                    new_amount,
                    outstanding
                ),
            ));
        }
        self.amount = new_amount;
        self.outstanding = outstanding;
        self.refresh_status();
        Ok(delta)
    }

    /// Allocation view of an open invoice or advance
    pub fn as_target(&self) -> Option<AllocationTarget> {
        let target_type = match self.kind {
            AggregateKind::Invoice => TargetType::Invoice,
            AggregateKind::Advance => TargetType::Advance,
            AggregateKind::Customer | AggregateKind::Receipt => return None,
        };
        if self.outstanding <= Decimal::ZERO {
            return None;
        }
        Some(AllocationTarget {
            id: self.key().id,
            target_type,
            issue_date: self.issue_date,
            applied_period: self.applied_period,
            outstanding_amount: self.outstanding,
        })
    }
}

/// Direction of a customer's derived balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStatus {
    Owing,
    Settled,
    InCredit,
}

/// Counterpart of ledger documents
///
/// `current_balance` is owed obligations minus unapplied receipts. It is a
/// derived figure kept up to date incrementally and periodically reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub tax_id: String,
    pub name: Option<String>,
    pub current_balance: Decimal,
    pub status: BalanceStatus,
}

impl Customer {
    pub fn new(tax_id: &str, name: Option<String>) -> Self {
        Customer {
            tax_id: normalize_key_part(tax_id),
            name,
            current_balance: Decimal::ZERO,
            status: BalanceStatus::Settled,
        }
    }

    pub fn key(&self) -> AggregateKey {
        AggregateKey::customer(&self.tax_id)
    }

    pub fn adjust_balance(&mut self, delta: Decimal) {
        self.current_balance += delta;
        self.status = if self.current_balance > Decimal::ZERO {
            BalanceStatus::Owing
        } else if self.current_balance < Decimal::ZERO {
            BalanceStatus::InCredit
        } else {
            BalanceStatus::Settled
        };
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Aggregate {
    Customer(Customer),
    Document(LedgerDocument),
}

impl Aggregate {
    pub fn key(&self) -> AggregateKey {
        match self {
            Aggregate::Customer(customer) => customer.key(),
            Aggregate::Document(document) => document.key(),
        }
    }

    pub fn as_document(&self) -> Option<&LedgerDocument> {
        match self {
            Aggregate::Document(document) => Some(document),
            Aggregate::Customer(_) => None,
        }
    }

    pub fn as_customer(&self) -> Option<&Customer> {
        match self {
            Aggregate::Customer(customer) => Some(customer),
            Aggregate::Document(_) => None,
        }
    }
}

/// Origin of the latest version of an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "ref", rename_all = "snake_case")]
pub enum Writer {
    Batch(BatchId),
    Rollback(BatchId),
    /// Receipt posting, by receipt key id
    Receipt(String),
    Reconcile,
}

impl fmt::Display for Writer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Writer::Batch(batch) => write!(f, "batch {}", batch),
            Writer::Rollback(batch) => write!(f, "rollback of batch {}", batch),
            Writer::Receipt(receipt) => write!(f, "receipt {}", receipt),
            Writer::Reconcile => f.write_str("reconciliation"),
        }
    }
}

/// Stored aggregate with its concurrency token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned {
    pub aggregate: Aggregate,
    /// Starts at 1 on insert, +1 on every write
    pub version: u64,
    pub last_writer: Writer,
}
