//! Subcommand execution
//!
//! Every command builds its own in-memory pipeline, runs, and writes CSV to
//! the given output. `import` commits its files concurrently on a tokio
//! multi-threaded runtime; the blocking pipeline calls run on the blocking
//! pool, bounded by a semaphore of `max_concurrent_commits` permits. Invoice
//! and advance files commit first, receipts only after all of them finish,
//! all against the same ledger.

use crate::cli::args::{AllocateArgs, BatchArgs, CliArgs, Command, ImportArgs, PreviewArgs};
use crate::config::EngineConfig;
use crate::core::{allocate, ImportPipeline, UploadRequest};
use crate::io::csv_format::{
    read_targets_csv, write_allocation_csv, write_import_reports_csv, write_staging_rows_csv,
    ImportReport,
};
use crate::types::{AllocationRequest, BatchPeriod, BatchStatus, DocumentType};
use futures::future::join_all;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Attempts per file when a commit hits a retryable conflict
const COMMIT_ATTEMPTS: usize = 3;

/// Run the parsed command, writing its CSV result to `output`
pub fn run(args: &CliArgs, output: &mut dyn Write) -> Result<(), String> {
    let config = args.to_engine_config();
    match &args.command {
        Command::Import(import) => run_import(import, config, output),
        Command::Preview(preview) => run_preview(preview, config, output),
        Command::Allocate(allocation) => run_allocate(allocation, output),
    }
}

impl BatchArgs {
    fn request(
        &self,
        document_type: DocumentType,
        source: String,
        bytes: Vec<u8>,
    ) -> UploadRequest {
        UploadRequest {
            document_type,
            source,
            bytes,
            period: BatchPeriod::new(self.period_from, self.period_to),
            idempotency_key: self.idempotency_key.clone(),
        }
    }
}

fn run_import(
    args: &ImportArgs,
    config: EngineConfig,
    output: &mut dyn Write,
) -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.max_concurrent_commits)
        .build()
        .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

    let limit = Arc::new(Semaphore::new(config.max_concurrent_commits));
    let pipeline = Arc::new(ImportPipeline::in_memory(config));

    let reports = runtime.block_on(async {
        let mut reports = Vec::new();
        for phase in args.phases() {
            let jobs = phase.into_iter().map(|(document_type, path)| {
                import_file(
                    Arc::clone(&pipeline),
                    Arc::clone(&limit),
                    args,
                    document_type,
                    path,
                )
            });
            reports.extend(join_all(jobs).await);
        }
        reports
    });

    write_import_reports_csv(&reports, output)
}

async fn import_file(
    pipeline: Arc<ImportPipeline>,
    limit: Arc<Semaphore>,
    args: &ImportArgs,
    document_type: DocumentType,
    path: PathBuf,
) -> ImportReport {
    let file = path.display().to_string();
    let failed = |message: String| ImportReport {
        file: file.clone(),
        document_type: document_type.to_string(),
        status: "failed".to_string(),
        message,
        ..ImportReport::default()
    };

    let _permit = match limit.acquire_owned().await {
        Ok(permit) => permit,
        Err(e) => return failed(format!("Failed to acquire commit slot: {}", e)),
    };
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => return failed(format!("Failed to open file '{}': {}", file, e)),
    };

    let request = args.batch.request(document_type, file.clone(), bytes);
    let include_warn_rows = args.include_warn_rows;
    let task = tokio::task::spawn_blocking(move || {
        upload_and_commit(&pipeline, request, include_warn_rows)
    });
    match task.await {
        Ok(report) => report,
        Err(e) => failed(format!("Import task failed: {}", e)),
    }
}

/// Upload one file and commit its batch, retrying conflicts
fn upload_and_commit(
    pipeline: &ImportPipeline,
    request: UploadRequest,
    include_warn_rows: bool,
) -> ImportReport {
    let mut report = ImportReport {
        file: request.source.clone(),
        document_type: request.document_type.to_string(),
        ..ImportReport::default()
    };

    let upload = match pipeline.upload(request) {
        Ok(upload) => upload,
        Err(e) => {
            report.status = "failed".to_string();
            report.message = e.to_string();
            return report;
        }
    };
    report.batch = Some(upload.batch.id);
    report.total = upload.summary.total;
    report.ok = upload.summary.ok;
    report.warn = upload.summary.warn;
    report.error = upload.summary.error;

    if upload.batch.status != BatchStatus::Staging {
        report.status = upload.batch.status.to_string();
        report.message = "already imported".to_string();
        return report;
    }

    let mut attempt = 1;
    let result = loop {
        match pipeline.commit(upload.batch.id, include_warn_rows) {
            Err(e) if e.is_retryable() && attempt < COMMIT_ATTEMPTS => {
                tracing::warn!(batch = upload.batch.id, attempt, error = %e, "retrying commit");
                attempt += 1;
            }
            other => break other,
        }
    };

    match result {
        Ok(outcome) => {
            report.status = BatchStatus::Committed.to_string();
            report.committed_rows = outcome.committed_rows;
            report.skipped_rows = outcome.skipped_rows;
        }
        Err(e) => {
            report.status = BatchStatus::Staging.to_string();
            report.message = e.to_string();
        }
    }
    report
}

fn run_preview(
    args: &PreviewArgs,
    config: EngineConfig,
    output: &mut dyn Write,
) -> Result<(), String> {
    let bytes = read_file(&args.file)?;
    let pipeline = ImportPipeline::in_memory(config);
    let request = args.upload.batch.request(
        args.upload.document_type.into(),
        args.file.display().to_string(),
        bytes,
    );
    let upload = pipeline.upload(request).map_err(|e| e.to_string())?;
    let page = pipeline
        .preview(
            upload.batch.id,
            args.status.map(Into::into),
            args.page,
            args.page_size,
        )
        .map_err(|e| e.to_string())?;
    write_staging_rows_csv(&page, output)
}

fn run_allocate(args: &AllocateArgs, output: &mut dyn Write) -> Result<(), String> {
    let file = std::fs::File::open(&args.targets)
        .map_err(|e| format!("Failed to open file '{}': {}", args.targets.display(), e))?;
    let targets = read_targets_csv(file)?;
    let request = AllocationRequest {
        amount: args.amount,
        mode: args.mode.into(),
        applied_period: args.applied_period,
        selected_targets: args.selected.clone(),
    };
    let result = allocate(&request, &targets).map_err(|e| e.to_string())?;
    write_allocation_csv(&result, output)
}

fn read_file(path: &Path) -> Result<Vec<u8>, String> {
    std::fs::read(path).map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))
}
