use crate::config::EngineConfig;
use crate::types::{AllocationMode, DocumentType, ValidationStatus};
use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;

/// Stage, commit and allocate spreadsheet-sourced ledger documents
#[derive(Parser, Debug)]
#[command(name = "ledger-import")]
#[command(
    about = "Import invoices, advances and receipts into a balance ledger",
    long_about = None
)]
pub struct CliArgs {
    /// Log filter, e.g. `info` or `ledger_import_engine=debug`
    #[arg(
        long = "log-level",
        value_name = "FILTER",
        env = "LEDGER_IMPORT_LOG",
        default_value = "warn",
        global = true
    )]
    pub log_level: String,

    /// Staging rows applied per commit chunk
    #[arg(
        long = "chunk-size",
        value_name = "ROWS",
        global = true,
        help = "Staging rows applied per commit chunk (default: 20, max: 25)"
    )]
    pub chunk_size: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upload and commit files of mixed types, one batch per file
    Import(ImportArgs),
    /// Upload a file and print its staged rows
    Preview(PreviewArgs),
    /// Allocate an amount across targets read from CSV
    Allocate(AllocateArgs),
}

/// Batch options shared by `import` and `preview`
#[derive(Args, Debug)]
pub struct BatchArgs {
    /// First day of the batch period
    #[arg(long = "period-from", value_name = "DATE")]
    pub period_from: Option<NaiveDate>,

    /// Last day of the batch period
    #[arg(long = "period-to", value_name = "DATE")]
    pub period_to: Option<NaiveDate>,

    /// Caller idempotency key
    #[arg(long = "key", value_name = "KEY")]
    pub idempotency_key: Option<String>,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Document type carried by the file
    #[arg(long = "type", value_name = "TYPE")]
    pub document_type: DocumentKind,

    #[command(flatten)]
    pub batch: BatchArgs,
}

/// Files of any mix of types; invoices and advances commit before receipts
#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("files")
        .args(["invoices", "advances", "receipts"])
        .required(true)
        .multiple(true)
))]
pub struct ImportArgs {
    #[command(flatten)]
    pub batch: BatchArgs,

    /// Invoice CSV files
    #[arg(long = "invoices", value_name = "FILE", num_args = 1..)]
    pub invoices: Vec<PathBuf>,

    /// Advance CSV files
    #[arg(long = "advances", value_name = "FILE", num_args = 1..)]
    pub advances: Vec<PathBuf>,

    /// Receipt CSV files
    #[arg(long = "receipts", value_name = "FILE", num_args = 1..)]
    pub receipts: Vec<PathBuf>,

    /// Also commit WARN rows
    #[arg(long = "include-warn")]
    pub include_warn_rows: bool,

    /// Maximum number of files committing concurrently
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of files committing concurrently (default: CPU cores)"
    )]
    pub max_concurrent: Option<usize>,
}

impl ImportArgs {
    /// Files grouped into commit phases
    ///
    /// Receipts settle obligations, so they form a second phase that starts
    /// once every invoice and advance batch has finished.
    pub fn phases(&self) -> [Vec<(DocumentType, PathBuf)>; 2] {
        let obligations = tagged(DocumentType::Invoice, &self.invoices)
            .chain(tagged(DocumentType::Advance, &self.advances))
            .collect();
        let receipts = tagged(DocumentType::Receipt, &self.receipts).collect();
        [obligations, receipts]
    }
}

fn tagged(
    document_type: DocumentType,
    files: &[PathBuf],
) -> impl Iterator<Item = (DocumentType, PathBuf)> + '_ {
    files.iter().map(move |path| (document_type, path.clone()))
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub upload: UploadArgs,

    /// Only rows with this status
    #[arg(long = "status", value_name = "STATUS")]
    pub status: Option<StatusFilter>,

    #[arg(long = "page", value_name = "PAGE", default_value_t = 1)]
    pub page: usize,

    #[arg(long = "page-size", value_name = "SIZE", default_value_t = 50)]
    pub page_size: usize,

    /// Input CSV file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct AllocateArgs {
    /// Amount to distribute
    #[arg(long = "amount", value_name = "AMOUNT")]
    pub amount: Decimal,

    #[arg(long = "mode", value_name = "MODE", default_value = "fifo")]
    pub mode: ModeArg,

    /// Applied period for `by-period`
    #[arg(long = "period", value_name = "DATE")]
    pub applied_period: Option<NaiveDate>,

    /// Comma separated target ids for `by-invoice`, in allocation order
    #[arg(long = "select", value_name = "IDS", value_delimiter = ',')]
    pub selected: Option<Vec<String>>,

    /// CSV with columns id,type,issue_date,applied_period,outstanding
    #[arg(value_name = "TARGETS")]
    pub targets: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DocumentKind {
    Invoice,
    Advance,
    Receipt,
}

impl From<DocumentKind> for DocumentType {
    fn from(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Invoice => DocumentType::Invoice,
            DocumentKind::Advance => DocumentType::Advance,
            DocumentKind::Receipt => DocumentType::Receipt,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StatusFilter {
    Ok,
    Warn,
    Error,
}

impl From<StatusFilter> for ValidationStatus {
    fn from(status: StatusFilter) -> Self {
        match status {
            StatusFilter::Ok => ValidationStatus::Ok,
            StatusFilter::Warn => ValidationStatus::Warn,
            StatusFilter::Error => ValidationStatus::Error,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Fifo,
    ByPeriod,
    ByInvoice,
}

impl From<ModeArg> for AllocationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Fifo => AllocationMode::Fifo,
            ModeArg::ByPeriod => AllocationMode::ByPeriod,
            ModeArg::ByInvoice => AllocationMode::ByInvoice,
        }
    }
}

impl CliArgs {
    /// Create an EngineConfig from CLI arguments
    ///
    /// Values not given on the command line keep their defaults; zero values
    /// fall back to the defaults with a warning.
    pub fn to_engine_config(&self) -> EngineConfig {
        let default = EngineConfig::default();
        let max_concurrent = match &self.command {
            Command::Import(import) => import.max_concurrent,
            Command::Preview(_) | Command::Allocate(_) => None,
        };
        EngineConfig::new(
            self.chunk_size.unwrap_or(default.chunk_size),
            default.max_page_size,
            max_concurrent.unwrap_or(default.max_concurrent_commits),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_import_parsing() {
        let parsed = CliArgs::try_parse_from([
            "ledger-import",
            "import",
            "--include-warn",
            "--period-from",
            "2024-01-01",
            "--receipts",
            "r.csv",
            "--invoices",
            "a.csv",
            "b.csv",
        ])
        .unwrap();

        let Command::Import(import) = parsed.command else {
            panic!("expected import");
        };
        assert!(import.include_warn_rows);
        assert_eq!(import.batch.period_from, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(import.invoices.len(), 2);
        assert!(import.advances.is_empty());

        let [obligations, receipts] = import.phases();
        assert_eq!(
            obligations,
            vec![
                (DocumentType::Invoice, PathBuf::from("a.csv")),
                (DocumentType::Invoice, PathBuf::from("b.csv")),
            ]
        );
        assert_eq!(receipts, vec![(DocumentType::Receipt, PathBuf::from("r.csv"))]);
    }

    #[test]
    fn test_allocate_parsing() {
        let parsed = CliArgs::try_parse_from([
            "ledger-import",
            "allocate",
            "--amount",
            "120.50",
            "--mode",
            "by-invoice",
            "--select",
            "B,A",
            "targets.csv",
        ])
        .unwrap();

        let Command::Allocate(allocate) = parsed.command else {
            panic!("expected allocate");
        };
        assert_eq!(allocate.amount, Decimal::new(12050, 2));
        assert_eq!(allocate.mode, ModeArg::ByInvoice);
        assert_eq!(
            allocate.selected,
            Some(vec!["B".to_string(), "A".to_string()])
        );
    }

    #[rstest]
    #[case::all_defaults(&["ledger-import", "import", "--receipts", "a.csv"], 20, num_cpus::get())]
    #[case::custom_chunk(
        &["ledger-import", "--chunk-size", "5", "import", "--receipts", "a.csv"],
        5,
        num_cpus::get()
    )]
    #[case::chunk_capped(
        &["ledger-import", "--chunk-size", "5000", "import", "--receipts", "a.csv"],
        25,
        num_cpus::get()
    )]
    #[case::custom_concurrency(
        &["ledger-import", "import", "--max-concurrent", "3", "--receipts", "a.csv"],
        20,
        3
    )]
    #[case::zero_chunk_falls_back(
        &["ledger-import", "--chunk-size", "0", "import", "--receipts", "a.csv"],
        20,
        num_cpus::get()
    )]
    #[case::zero_concurrency_falls_back(
        &["ledger-import", "import", "--max-concurrent", "0", "--receipts", "a.csv"],
        20,
        num_cpus::get()
    )]
    fn test_engine_config_conversion(
        #[case] args: &[&str],
        #[case] expected_chunk: usize,
        #[case] expected_concurrency: usize,
    ) {
        let config = CliArgs::try_parse_from(args).unwrap().to_engine_config();
        assert_eq!(config.chunk_size, expected_chunk);
        assert_eq!(config.max_concurrent_commits, expected_concurrency);
    }

    #[rstest]
    #[case::missing_command(&["ledger-import"])]
    #[case::missing_files(&["ledger-import", "import", "--include-warn"])]
    #[case::empty_file_list(&["ledger-import", "import", "--invoices"])]
    #[case::invalid_type(&["ledger-import", "preview", "--type", "memo", "a.csv"])]
    #[case::invalid_amount(&["ledger-import", "allocate", "--amount", "lots", "t.csv"])]
    #[case::invalid_date(
        &["ledger-import", "preview", "--type", "invoice", "--period-from", "Jan", "a.csv"]
    )]
    fn test_parsing_errors(#[case] args: &[&str]) {
        assert!(CliArgs::try_parse_from(args).is_err());
    }
}
