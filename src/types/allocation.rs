//! Allocation request and result types
//!
//! These values are transient: they are built per allocation call and the
//! caller decides how to persist the resulting lines.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Ordering strategy used to distribute a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationMode {
    /// Caller-selected targets, in caller order
    ByInvoice,
    /// Targets of the applied period first, then the rest, oldest first
    ByPeriod,
    /// Oldest obligations first
    Fifo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Invoice,
    Advance,
}

/// Open obligation eligible to receive part of a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub id: String,
    pub target_type: TargetType,
    pub issue_date: NaiveDate,
    /// Accounting month of the obligation; falls back to `issue_date` when absent
    pub applied_period: Option<NaiveDate>,
    pub outstanding_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub amount: Decimal,
    pub mode: AllocationMode,
    /// Used by [`AllocationMode::ByPeriod`]; only year and month matter
    pub applied_period: Option<NaiveDate>,
    /// Used by [`AllocationMode::ByInvoice`], ordered target ids
    pub selected_targets: Option<Vec<String>>,
}

impl AllocationRequest {
    pub fn fifo(amount: Decimal) -> Self {
        Self {
            amount,
            mode: AllocationMode::Fifo,
            applied_period: None,
            selected_targets: None,
        }
    }

    pub fn by_period(amount: Decimal, applied_period: NaiveDate) -> Self {
        Self {
            amount,
            mode: AllocationMode::ByPeriod,
            applied_period: Some(applied_period),
            selected_targets: None,
        }
    }

    pub fn by_invoice(amount: Decimal, selected: Vec<String>) -> Self {
        Self {
            amount,
            mode: AllocationMode::ByInvoice,
            applied_period: None,
            selected_targets: Some(selected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub target_id: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub lines: Vec<AllocationLine>,
    /// Amount left after every eligible target was exhausted
    pub unallocated_amount: Decimal,
}

impl AllocationResult {
    pub fn allocated_amount(&self) -> Decimal {
        self.lines.iter().map(|line| line.amount).sum()
    }
}
