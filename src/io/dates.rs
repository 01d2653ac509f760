//! Date text normalization
//!
//! Sheets come from many sources, so dates are accepted in ISO
//! (`yyyy-MM-dd`) and the two day-first forms (`dd/MM/yyyy`, `dd-MM-yyyy`).
//! Everything is written back to staging rows in ISO form.

use chrono::{Datelike, NaiveDate};

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y"];

/// Years written with fewer digits are rejected rather than read as 00xx
const MIN_YEAR: i32 = 1000;

/// Parse a date in any accepted form
///
/// The year must be written in full: `12/01/24` is not a date.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    DATE_FORMATS
        .iter()
        .filter_map(|format| NaiveDate::parse_from_str(text, format).ok())
        .find(|date| date.year() >= MIN_YEAR)
}

/// Canonical text form stored in raw data
pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Parse an accounting period
///
/// Besides full dates, a bare month (`yyyy-MM` or `MM/yyyy`) is accepted and
/// means the first of that month. The flag reports whether a full date was
/// given that was not the first of its month.
pub fn parse_period(text: &str) -> Option<(NaiveDate, bool)> {
    let text = text.trim();
    if let Some(date) = parse_date(text) {
        return Some((first_of_month(date), date.day() != 1));
    }
    let month_first = [format!("{}-01", text), format!("01/{}", text)];
    month_first
        .iter()
        .find_map(|candidate| parse_date(candidate))
        .map(|date| (date, false))
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Whether two dates fall in the same calendar month
pub fn same_month(a: NaiveDate, b: NaiveDate) -> bool {
    a.year() == b.year() && a.month() == b.month()
}
