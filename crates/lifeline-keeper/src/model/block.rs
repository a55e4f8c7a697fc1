//! A single block

use bytes::Bytes;

use crate::discovery::BlockEntry;
use crate::executor::{JobKind, JobOutcome, JobReport};
use crate::key::ContentKey;

/// Where a block is in its fetch/insert lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Idle,
    Fetching,
    FetchDone { success: bool },
    InsertDone { success: bool },
}

/// One block of a segment
#[derive(Debug, Clone)]
pub struct Block {
    key: ContentKey,
    segment_id: u32,
    block_id: u32,
    is_data: bool,
    payload: Option<Bytes>,
    status: BlockStatus,
    fetch_successful: bool,
    result: String,
}

impl Block {
    /// Create an idle block
    pub fn new(key: ContentKey, segment_id: u32, block_id: u32, is_data: bool) -> Self {
        Self {
            key,
            segment_id,
            block_id,
            is_data,
            payload: None,
            status: BlockStatus::Idle,
            fetch_successful: false,
            result: String::new(),
        }
    }

    /// Create from a manifest entry
    pub fn from_entry(entry: &BlockEntry) -> Self {
        Self::new(
            entry.key.clone(),
            entry.segment_id,
            entry.block_id,
            entry.is_data,
        )
    }

    pub fn key(&self) -> &ContentKey {
        &self.key
    }

    pub fn segment_id(&self) -> u32 {
        self.segment_id
    }

    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    pub fn is_data(&self) -> bool {
        self.is_data
    }

    pub fn status(&self) -> BlockStatus {
        self.status
    }

    /// Payload, if fetched or reconstructed
    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Last recorded outcome text
    pub fn result(&self) -> &str {
        &self.result
    }

    /// Whether any fetch of this block succeeded in this pass
    pub fn is_fetch_successful(&self) -> bool {
        self.fetch_successful
    }

    /// Whether a fetch attempt completed
    pub fn is_fetch_done(&self) -> bool {
        matches!(self.status, BlockStatus::FetchDone { .. }) || self.fetch_successful
    }

    /// Whether an insert attempt completed
    pub fn is_insert_done(&self) -> bool {
        matches!(self.status, BlockStatus::InsertDone { .. })
    }

    /// Whether the last insert succeeded
    pub fn is_insert_successful(&self) -> bool {
        self.status == BlockStatus::InsertDone { success: true }
    }

    /// Nothing more to do for this block in this pass
    pub fn is_settled(&self) -> bool {
        self.fetch_successful || self.is_insert_done()
    }

    /// Mark a fetch as submitted
    pub fn mark_fetching(&mut self) {
        self.status = BlockStatus::Fetching;
    }

    /// Install reconstructed content
    pub fn set_payload(&mut self, payload: Bytes) {
        self.payload = Some(payload);
    }

    /// Release the payload buffer
    pub fn release(&mut self) -> Option<Bytes> {
        self.payload.take()
    }

    /// Apply a job report for this block
    pub fn apply(&mut self, report: &JobReport) {
        if let Some(Ok(payload)) = &report.prefetch {
            self.payload = Some(payload.clone());
            self.fetch_successful = true;
        }

        match &report.outcome {
            JobOutcome::Fetched(payload) => {
                self.payload = Some(payload.clone());
                self.fetch_successful = true;
                self.status = BlockStatus::FetchDone { success: true };
                self.result = "fetched".into();
            }
            JobOutcome::FetchFailed(reason) => {
                self.status = BlockStatus::FetchDone { success: false };
                self.result = format!("fetch failed: {}", reason);
            }
            JobOutcome::Inserted => {
                self.status = BlockStatus::InsertDone { success: true };
                self.result = "inserted".into();
            }
            JobOutcome::InsertFailed(reason) => {
                self.status = BlockStatus::InsertDone { success: false };
                self.result = format!("insert failed: {}", reason);
            }
            JobOutcome::TimedOut => {
                self.status = match report.kind {
                    JobKind::Fetch { .. } => BlockStatus::FetchDone { success: false },
                    JobKind::Insert { .. } => BlockStatus::InsertDone { success: false },
                };
                self.result = "timed out".into();
            }
            JobOutcome::Cancelled => {
                if self.status == BlockStatus::Fetching {
                    self.status = BlockStatus::Idle;
                }
                self.result = "cancelled".into();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InsertPriority;
    use std::time::Duration;

    fn report(block: &Block, kind: JobKind, outcome: JobOutcome) -> JobReport {
        JobReport {
            segment_id: block.segment_id(),
            block_id: block.block_id(),
            key: block.key().clone(),
            kind,
            prefetch: None,
            outcome,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_fetch_success_sets_payload() {
        let mut block = Block::new(ContentKey::new("CHK@a"), 1, 0, true);
        let r = report(
            &block,
            JobKind::Fetch { ignore_local_cache: true },
            JobOutcome::Fetched(Bytes::from_static(b"abc")),
        );
        block.apply(&r);
        assert!(block.is_fetch_successful());
        assert!(block.is_settled());
        assert_eq!(block.payload().unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_failed_fetch_keeps_buffer_empty() {
        let mut block = Block::new(ContentKey::new("CHK@a"), 1, 0, true);
        let r = report(
            &block,
            JobKind::Fetch { ignore_local_cache: true },
            JobOutcome::FetchFailed("not found".into()),
        );
        block.apply(&r);
        assert!(block.is_fetch_done());
        assert!(!block.is_settled());
        assert!(block.payload().is_none());
        assert!(block.result().contains("not found"));
    }

    #[test]
    fn test_insert_timeout_counts_as_attempt() {
        let mut block = Block::new(ContentKey::new("CHK@a"), 0, 0, true);
        let r = report(
            &block,
            JobKind::Insert { priority: InsertPriority::High },
            JobOutcome::TimedOut,
        );
        block.apply(&r);
        assert!(block.is_insert_done());
        assert!(!block.is_insert_successful());
    }

    #[test]
    fn test_cancelled_fetch_returns_to_idle() {
        let mut block = Block::new(ContentKey::new("CHK@a"), 0, 0, true);
        block.mark_fetching();
        let r = report(
            &block,
            JobKind::Fetch { ignore_local_cache: false },
            JobOutcome::Cancelled,
        );
        block.apply(&r);
        assert_eq!(block.status(), BlockStatus::Idle);
        assert!(!block.is_settled());
    }

    #[test]
    fn test_prefetch_recorded_on_insert() {
        let mut block = Block::new(ContentKey::new("CHK@a"), 0, 0, true);
        let mut r = report(
            &block,
            JobKind::Insert { priority: InsertPriority::High },
            JobOutcome::Inserted,
        );
        r.prefetch = Some(Ok(Bytes::from_static(b"root")));
        block.apply(&r);
        assert!(block.is_fetch_successful());
        assert!(block.is_insert_successful());
    }
}
