//! Staging row storage
//!
//! Rows are written once per batch, when the upload that created the batch is
//! parsed, and are read back by preview (paged) and commit (in chunks).

use crate::parser::StagingDraft;
use crate::types::{
    status_of, BatchId, EngineError, Page, StagingRow, StagingSummary, ValidationStatus,
};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct StagingStore {
    rows: DashMap<BatchId, Vec<StagingRow>>,
    next_row: AtomicU64,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach parsed rows to a batch
    ///
    /// # Errors
    ///
    /// Returns an invariant violation if the batch already has rows: a batch
    /// is parsed exactly once.
    pub fn insert(
        &self,
        batch: BatchId,
        drafts: Vec<StagingDraft>,
    ) -> Result<StagingSummary, EngineError> {
        let mut fresh = false;
        let entry = self.rows.entry(batch).or_insert_with(|| {
            fresh = true;
            drafts
                .into_iter()
                .map(|draft| StagingRow {
                    id: self.next_row.fetch_add(1, Ordering::Relaxed) + 1,
                    batch_id: batch,
                    row_no: draft.row_no,
                    validation_status: status_of(&draft.validation_messages),
                    raw_data: draft.raw_data,
                    validation_messages: draft.validation_messages,
                    action_suggestion: draft.action_suggestion,
                })
                .collect()
        });
        if !fresh {
            return Err(EngineError::invariant(
                None,
                format!("batch {} already has staging rows", batch),
            ));
        }
        Ok(StagingSummary::from_rows(entry.iter()))
    }

    pub fn summary(&self, batch: BatchId) -> StagingSummary {
        self.rows
            .get(&batch)
            .map(|rows| StagingSummary::from_rows(rows.iter()))
            .unwrap_or_default()
    }

    /// One page of rows in source order, optionally filtered by status
    ///
    /// `page` is 1-based; 0 is read as 1.
    pub fn preview(
        &self,
        batch: BatchId,
        status: Option<ValidationStatus>,
        page: usize,
        page_size: usize,
    ) -> Page<StagingRow> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let Some(rows) = self.rows.get(&batch) else {
            return Page::new(Vec::new(), page, page_size, 0);
        };

        let matches = |row: &&StagingRow| status.map_or(true, |s| row.validation_status == s);
        let total = rows.iter().filter(matches).count();
        let items = rows
            .iter()
            .filter(matches)
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();
        Page::new(items, page, page_size, total)
    }

    /// Rows `offset..offset + len` in source order
    pub fn chunk(&self, batch: BatchId, offset: usize, len: usize) -> Vec<StagingRow> {
        self.rows
            .get(&batch)
            .map(|rows| rows.iter().skip(offset).take(len).cloned().collect())
            .unwrap_or_default()
    }
}
