//! I/O module
//!
//! Handles reading uploaded sheets and CLI output.
//!
//! # Components
//!
//! - `sheet` - Header-indexed sheet reader for uploaded bytes
//! - `dates` - Accepted date formats and period helpers
//! - `csv_format` - CSV shapes of the command line (targets in, reports out)

pub mod csv_format;
pub mod dates;
pub mod sheet;

pub use csv_format::{
    convert_target_record, read_targets_csv, write_allocation_csv, write_import_reports_csv,
    write_staging_rows_csv, ImportReport, TargetRecord,
};
pub use sheet::Sheet;
