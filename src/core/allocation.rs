//! Allocation engine
//!
//! [`allocate`] splits a receipt amount across open obligations. It is a pure
//! function: no I/O, no shared state, and the same inputs always give the
//! same lines. Whatever cannot be placed is returned as the unallocated
//! remainder; overpayment is an ordinary outcome.
//!
//! For every successful call `sum(lines) + unallocated == request.amount`.

use crate::io::dates::same_month;
use crate::types::{
    AllocationError, AllocationLine, AllocationMode, AllocationRequest, AllocationResult,
    AllocationTarget,
};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Distribute `request.amount` over `targets`
///
/// # Ordering
///
/// - `ByInvoice`: `selected_targets` in caller order; repeated ids are
///   allocated once.
/// - `ByPeriod`: targets whose applied period (else issue date) falls in the
///   month of `applied_period`, oldest first; then all other targets, oldest
///   first.
/// - `Fifo`: all targets, oldest first.
///
/// Equal issue dates are ordered by target id. Targets with nothing
/// outstanding never receive a line.
///
/// # Errors
///
/// - [`AllocationError::NegativeAmount`]
/// - [`AllocationError::MissingAppliedPeriod`] for `ByPeriod` without a period
/// - [`AllocationError::MissingSelection`] for `ByInvoice` without a selection
/// - [`AllocationError::UnknownTarget`] when a selected id is not a target
pub fn allocate(
    request: &AllocationRequest,
    targets: &[AllocationTarget],
) -> Result<AllocationResult, AllocationError> {
    if request.amount < Decimal::ZERO {
        return Err(AllocationError::NegativeAmount {
            amount: request.amount,
        });
    }

    let ordered = match request.mode {
        AllocationMode::ByInvoice => {
            let selected = request
                .selected_targets
                .as_ref()
                .ok_or(AllocationError::MissingSelection)?;
            in_selection_order(selected, targets)?
        }
        AllocationMode::ByPeriod => {
            let period = request
                .applied_period
                .ok_or(AllocationError::MissingAppliedPeriod)?;
            let (mut matching, mut rest): (Vec<_>, Vec<_>) = targets
                .iter()
                .partition(|target| {
                    same_month(target.applied_period.unwrap_or(target.issue_date), period)
                });
            matching.sort_by(|a, b| oldest_first(a, b));
            rest.sort_by(|a, b| oldest_first(a, b));
            matching.extend(rest);
            matching
        }
        AllocationMode::Fifo => {
            let mut all: Vec<&AllocationTarget> = targets.iter().collect();
            all.sort_by(|a, b| oldest_first(a, b));
            all
        }
    };

    let mut remaining = request.amount;
    let mut lines = Vec::new();
    for target in ordered {
        if remaining <= Decimal::ZERO {
            break;
        }
        if target.outstanding_amount <= Decimal::ZERO {
            continue;
        }
        let amount = remaining.min(target.outstanding_amount);
        remaining -= amount;
        lines.push(AllocationLine {
            target_id: target.id.clone(),
            amount,
        });
    }

    Ok(AllocationResult {
        lines,
        unallocated_amount: remaining,
    })
}

fn oldest_first(a: &AllocationTarget, b: &AllocationTarget) -> Ordering {
    a.issue_date
        .cmp(&b.issue_date)
        .then_with(|| a.id.cmp(&b.id))
}

fn in_selection_order<'t>(
    selected: &[String],
    targets: &'t [AllocationTarget],
) -> Result<Vec<&'t AllocationTarget>, AllocationError> {
    let by_id: HashMap<&str, &AllocationTarget> = targets
        .iter()
        .map(|target| (target.id.as_str(), target))
        .collect();
    let mut seen = HashSet::new();
    let mut ordered = Vec::with_capacity(selected.len());

    for id in selected {
        let target = by_id
            .get(id.as_str())
            .ok_or_else(|| AllocationError::UnknownTarget { id: id.clone() })?;
        if seen.insert(id.as_str()) {
            ordered.push(*target);
        }
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetType;
    use chrono::NaiveDate;
    use rstest::rstest;
    use rust_decimal::prelude::ToPrimitive;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn target(id: &str, issue_date: NaiveDate, outstanding: i64) -> AllocationTarget {
        AllocationTarget {
            id: id.to_string(),
            target_type: TargetType::Invoice,
            issue_date,
            applied_period: None,
            outstanding_amount: Decimal::new(outstanding, 0),
        }
    }

    fn lines(result: &AllocationResult) -> Vec<(&str, i64)> {
        result
            .lines
            .iter()
            .map(|line| (line.target_id.as_str(), line.amount.to_i64().unwrap()))
            .collect()
    }

    #[test]
    fn test_by_invoice_follows_selection_order() {
        let targets = vec![
            target("A", date(2024, 1, 10), 50),
            target("B", date(2024, 1, 15), 100),
        ];
        let request =
            AllocationRequest::by_invoice(Decimal::new(120, 0), vec!["B".into(), "A".into()]);

        let result = allocate(&request, &targets).unwrap();

        assert_eq!(lines(&result), vec![("B", 100), ("A", 20)]);
        assert_eq!(result.unallocated_amount, Decimal::ZERO);
    }

    #[test]
    fn test_fifo_oldest_first() {
        let targets = vec![
            target("new", date(2024, 1, 2), 30),
            target("old", date(2023, 12, 15), 30),
        ];
        let result = allocate(&AllocationRequest::fifo(Decimal::new(40, 0)), &targets).unwrap();

        assert_eq!(lines(&result), vec![("old", 30), ("new", 10)]);
        assert_eq!(result.unallocated_amount, Decimal::ZERO);
    }

    #[test]
    fn test_overpayment_is_left_unallocated() {
        let targets = vec![target("single", date(2024, 1, 2), 25)];
        let result = allocate(&AllocationRequest::fifo(Decimal::new(40, 0)), &targets).unwrap();

        assert_eq!(lines(&result), vec![("single", 25)]);
        assert_eq!(result.unallocated_amount, Decimal::new(15, 0));
    }

    #[test]
    fn test_fifo_ties_broken_by_id() {
        let day = date(2024, 1, 5);
        let targets = vec![target("B", day, 10), target("A", day, 10), target("C", day, 10)];
        let result = allocate(&AllocationRequest::fifo(Decimal::new(25, 0)), &targets).unwrap();

        assert_eq!(lines(&result), vec![("A", 10), ("B", 10), ("C", 5)]);
    }

    #[test]
    fn test_by_period_matching_month_first() {
        let mut february = target("feb", date(2024, 1, 28), 40);
        february.applied_period = Some(date(2024, 2, 1));
        let targets = vec![
            target("jan-late", date(2024, 1, 20), 40),
            february,
            target("jan-early", date(2024, 1, 3), 40),
            target("mar", date(2024, 3, 1), 40),
        ];
        let request = AllocationRequest::by_period(Decimal::new(100, 0), date(2024, 2, 14));

        let result = allocate(&request, &targets).unwrap();

        assert_eq!(
            lines(&result),
            vec![("feb", 40), ("jan-early", 40), ("jan-late", 20)]
        );
    }

    #[test]
    fn test_settled_targets_and_duplicates_get_no_line() {
        let targets = vec![
            target("A", date(2024, 1, 1), 0),
            target("B", date(2024, 1, 2), 30),
        ];
        let request = AllocationRequest::by_invoice(
            Decimal::new(50, 0),
            vec!["A".into(), "B".into(), "B".into()],
        );

        let result = allocate(&request, &targets).unwrap();

        assert_eq!(lines(&result), vec![("B", 30)]);
        assert_eq!(result.unallocated_amount, Decimal::new(20, 0));
    }

    #[rstest]
    #[case::negative(
        AllocationRequest::fifo(Decimal::new(-1, 0)),
        AllocationError::NegativeAmount { amount: Decimal::new(-1, 0) }
    )]
    #[case::period_missing(
        AllocationRequest {
            applied_period: None,
            ..AllocationRequest::by_period(Decimal::ONE, NaiveDate::MIN)
        },
        AllocationError::MissingAppliedPeriod
    )]
    #[case::selection_missing(
        AllocationRequest {
            selected_targets: None,
            ..AllocationRequest::by_invoice(Decimal::ONE, Vec::new())
        },
        AllocationError::MissingSelection
    )]
    #[case::unknown_target(
        AllocationRequest::by_invoice(Decimal::ONE, vec!["nope".into()]),
        AllocationError::UnknownTarget { id: "nope".to_string() }
    )]
    fn test_malformed_requests(
        #[case] request: AllocationRequest,
        #[case] expected: AllocationError,
    ) {
        let targets = vec![target("A", date(2024, 1, 1), 10)];
        assert_eq!(allocate(&request, &targets), Err(expected));
    }

    #[rstest]
    #[case(AllocationRequest::fifo(Decimal::new(7333, 2)))]
    #[case(AllocationRequest::fifo(Decimal::ZERO))]
    #[case(AllocationRequest::by_period(Decimal::new(500, 0), date(2024, 1, 1)))]
    #[case(AllocationRequest::by_invoice(Decimal::new(15, 0), vec!["C".into(), "A".into()]))]
    fn test_lines_plus_remainder_equal_amount(#[case] request: AllocationRequest) {
        let targets = vec![
            target("A", date(2024, 1, 1), 10),
            target("B", date(2024, 2, 1), 20),
            target("C", date(2023, 12, 1), 30),
        ];
        let result = allocate(&request, &targets).unwrap();
        assert_eq!(
            result.allocated_amount() + result.unallocated_amount,
            request.amount
        );
        assert!(result.lines.iter().all(|line| line.amount > Decimal::ZERO));
    }
}
