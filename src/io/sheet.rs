//! Header-indexed sheet reader
//!
//! Uploaded spreadsheets arrive as delimited text. A [`Sheet`] keeps the header
//! row and resolves columns by normalized header name, so a reordered or
//! partially missing set of columns can never be read from the wrong position.
//!
//! Header names are compared after trimming, lower-casing and dropping spaces,
//! underscores and dashes: `Customer Tax ID`, `customer_tax_id` and
//! `CUSTOMER-TAX-ID` all resolve to the same column.

use crate::types::EngineError;
use csv::{ReaderBuilder, Trim};
use std::collections::HashMap;

/// Parsed sheet: header row plus data rows, in source order
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    headers: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<String>>,
}

/// Normalize a header name for lookup
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .trim_start_matches('\u{feff}')
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

impl Sheet {
    /// Read a sheet from uploaded bytes
    ///
    /// The reader trims every field and tolerates short rows; structural
    /// problems (invalid UTF-8, broken quoting, no header row) are fatal.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EngineError> {
        if std::str::from_utf8(bytes).is_err() {
            return Err(EngineError::SheetParse {
                line: None,
                message: "file is not valid UTF-8 text".to_string(),
            });
        }

        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .has_headers(true)
            .from_reader(bytes);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|header| header.is_empty()) {
            return Err(EngineError::EmptyFile);
        }

        let mut index = HashMap::new();
        for (position, header) in headers.iter().enumerate() {
            // First occurrence of a repeated header wins
            index.entry(normalize_header(header)).or_insert(position);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self {
            headers,
            index,
            rows,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by header name, if present
    pub fn column(&self, name: &str) -> Option<usize> {
        self.index.get(&normalize_header(name)).copied()
    }

    /// Resolve a column that must exist
    pub fn require_column(&self, name: &str) -> Result<usize, EngineError> {
        self.column(name)
            .ok_or_else(|| EngineError::missing_header(name))
    }

    /// Data rows with their 1-based row numbers
    pub fn rows(&self) -> impl Iterator<Item = (u32, SheetRow<'_>)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, cells)| (i as u32 + 1, SheetRow { cells }))
    }
}

/// Borrowed view of one data row
#[derive(Debug, Clone, Copy)]
pub struct SheetRow<'a> {
    cells: &'a [String],
}

impl<'a> SheetRow<'a> {
    /// Non-empty cell value at `column`
    pub fn get(&self, column: Option<usize>) -> Option<&'a str> {
        column
            .and_then(|position| self.cells.get(position))
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}
