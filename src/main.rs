//! Ledger import CLI
//!
//! Command-line interface for staging, committing and allocating ledger
//! documents read from CSV files.
//!
//! # Usage
//!
//! ```bash
//! ledger-import import --invoices january.csv february.csv > report.csv
//! ledger-import import --include-warn --invoices january.csv --receipts receipts.csv
//! ledger-import preview --type invoice --status error --page-size 100 january.csv
//! ledger-import allocate --amount 120 --mode by-invoice --select B,A targets.csv
//! ```
//!
//! Results are written to stdout as CSV; logs go to stderr, filtered by
//! `--log-level` or `LEDGER_IMPORT_LOG`.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (file not found, structural parse error, invalid request, etc.)

use ledger_import_engine::cli;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = cli::parse_args();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut output = std::io::stdout();
    if let Err(e) = cli::run(&args, &mut output) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
