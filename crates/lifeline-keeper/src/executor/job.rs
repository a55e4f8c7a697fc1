//! Jobs and their reports

use std::time::Duration;

use bytes::Bytes;

use crate::client::InsertPriority;
use crate::key::ContentKey;
use crate::model::Block;

/// What a job does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Retrieve the block
    Fetch { ignore_local_cache: bool },
    /// Push the block back into the store
    Insert { priority: InsertPriority },
}

impl JobKind {
    fn label(&self) -> &'static str {
        match self {
            JobKind::Fetch { .. } => "fetch",
            JobKind::Insert { .. } => "insert",
        }
    }
}

/// A unit of work for the executor
#[derive(Debug, Clone)]
pub struct Job {
    pub segment_id: u32,
    pub block_id: u32,
    pub key: ContentKey,
    /// Content to insert; fetched first when absent
    pub payload: Option<Bytes>,
    pub kind: JobKind,
}

impl Job {
    /// Fetch a block
    pub fn fetch(block: &Block, ignore_local_cache: bool) -> Self {
        Self {
            segment_id: block.segment_id(),
            block_id: block.block_id(),
            key: block.key().clone(),
            payload: None,
            kind: JobKind::Fetch { ignore_local_cache },
        }
    }

    /// Insert a block with whatever payload it currently holds
    pub fn insert(block: &Block, priority: InsertPriority) -> Self {
        Self {
            segment_id: block.segment_id(),
            block_id: block.block_id(),
            key: block.key().clone(),
            payload: block.payload().cloned(),
            kind: JobKind::Insert { priority },
        }
    }
}

/// Result of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Fetched(Bytes),
    FetchFailed(String),
    Inserted,
    InsertFailed(String),
    /// Exceeded its lifetime ceiling
    TimedOut,
    /// Stopped by the stop signal before completing
    Cancelled,
}

impl JobOutcome {
    /// Whether the job achieved what it was submitted for
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Fetched(_) | JobOutcome::Inserted)
    }
}

/// Report sent back to the scheduler
#[derive(Debug, Clone)]
pub struct JobReport {
    pub segment_id: u32,
    pub block_id: u32,
    pub key: ContentKey,
    pub kind: JobKind,
    /// Fetch done by an insert job that had no payload
    pub prefetch: Option<Result<Bytes, String>>,
    pub outcome: JobOutcome,
    pub elapsed: Duration,
}

impl JobReport {
    pub(crate) fn cancelled(job: &Job) -> Self {
        Self {
            segment_id: job.segment_id,
            block_id: job.block_id,
            key: job.key.clone(),
            kind: job.kind,
            prefetch: None,
            outcome: JobOutcome::Cancelled,
            elapsed: Duration::ZERO,
        }
    }

    /// Report for a job whose task died without reporting
    pub(crate) fn lost(job: &Job, reason: String) -> Self {
        let outcome = match job.kind {
            JobKind::Fetch { .. } => JobOutcome::FetchFailed(reason),
            JobKind::Insert { .. } => JobOutcome::InsertFailed(reason),
        };
        Self {
            outcome,
            ..Self::cancelled(job)
        }
    }

    /// One journal line describing the outcome
    pub fn describe(&self) -> String {
        let what = self.kind.label();
        match &self.outcome {
            JobOutcome::Fetched(_) => format!("{} ok      {}", what, self.key),
            JobOutcome::Inserted => format!("{} ok     {}", what, self.key),
            JobOutcome::FetchFailed(reason) | JobOutcome::InsertFailed(reason) => {
                format!("{} failed  {}  ({})", what, self.key, reason)
            }
            JobOutcome::TimedOut => format!(
                "{} timed out after {}s  {}",
                what,
                self.elapsed.as_secs(),
                self.key
            ),
            JobOutcome::Cancelled => format!("{} cancelled  {}", what, self.key),
        }
    }
}
