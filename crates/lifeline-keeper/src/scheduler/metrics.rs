//! Engine metrics collection

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::executor::{JobKind, JobOutcome, JobReport};

/// Reinsertion engine metrics
pub struct EngineMetrics {
    /// Time when the engine started
    start_time: RwLock<Option<Instant>>,

    /// Document passes started
    passes_started: AtomicU64,

    /// Passes that reached the last segment
    passes_finished: AtomicU64,

    /// Passes ended by an error
    passes_failed: AtomicU64,

    /// Passes that ran out of time slot
    passes_yielded: AtomicU64,

    /// Segments whose sample met the tolerance
    segments_healthy: AtomicU64,

    /// Segments reconstructed and reinserted
    segments_healed: AtomicU64,

    /// Segments that could not be reconstructed
    segments_unhealable: AtomicU64,

    blocks_fetched: AtomicU64,
    blocks_fetch_failed: AtomicU64,
    blocks_inserted: AtomicU64,
    blocks_insert_failed: AtomicU64,

    /// Jobs that hit their lifetime ceiling
    jobs_timed_out: AtomicU64,

    /// Jobs stopped by the stop signal
    jobs_cancelled: AtomicU64,

    /// Bytes received by fetches
    bytes_fetched: AtomicU64,
}

impl EngineMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(None),
            passes_started: AtomicU64::new(0),
            passes_finished: AtomicU64::new(0),
            passes_failed: AtomicU64::new(0),
            passes_yielded: AtomicU64::new(0),
            segments_healthy: AtomicU64::new(0),
            segments_healed: AtomicU64::new(0),
            segments_unhealable: AtomicU64::new(0),
            blocks_fetched: AtomicU64::new(0),
            blocks_fetch_failed: AtomicU64::new(0),
            blocks_inserted: AtomicU64::new(0),
            blocks_insert_failed: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
            bytes_fetched: AtomicU64::new(0),
        }
    }

    /// Record engine start
    pub fn record_start(&self) {
        *self.start_time.write() = Some(Instant::now());
    }

    /// Record engine stop
    pub fn record_stop(&self) {
        *self.start_time.write() = None;
    }

    pub fn record_pass_start(&self) {
        self.passes_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pass_finished(&self) {
        self.passes_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pass_failed(&self) {
        self.passes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pass_yielded(&self) {
        self.passes_yielded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_healthy(&self) {
        self.segments_healthy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_healed(&self) {
        self.segments_healed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_segment_unhealable(&self) {
        self.segments_unhealable.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one job
    pub fn record_job(&self, report: &JobReport) {
        if let Some(prefetch) = &report.prefetch {
            match prefetch {
                Ok(payload) => self.record_fetch(payload.len()),
                Err(_) => {
                    self.blocks_fetch_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        let counter = match &report.outcome {
            JobOutcome::Fetched(payload) => {
                self.record_fetch(payload.len());
                return;
            }
            JobOutcome::FetchFailed(_) => &self.blocks_fetch_failed,
            JobOutcome::Inserted => &self.blocks_inserted,
            JobOutcome::InsertFailed(_) => &self.blocks_insert_failed,
            JobOutcome::TimedOut => {
                self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
                match report.kind {
                    JobKind::Fetch { .. } => &self.blocks_fetch_failed,
                    JobKind::Insert { .. } => &self.blocks_insert_failed,
                }
            }
            JobOutcome::Cancelled => &self.jobs_cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime
    pub fn uptime(&self) -> Option<Duration> {
        self.start_time.read().as_ref().map(|t: &Instant| t.elapsed())
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            uptime_secs: self.uptime().map(|d| d.as_secs()).unwrap_or(0),
            passes_started: self.passes_started.load(Ordering::Relaxed),
            passes_finished: self.passes_finished.load(Ordering::Relaxed),
            passes_failed: self.passes_failed.load(Ordering::Relaxed),
            passes_yielded: self.passes_yielded.load(Ordering::Relaxed),
            segments_healthy: self.segments_healthy.load(Ordering::Relaxed),
            segments_healed: self.segments_healed.load(Ordering::Relaxed),
            segments_unhealable: self.segments_unhealable.load(Ordering::Relaxed),
            blocks_fetched: self.blocks_fetched.load(Ordering::Relaxed),
            blocks_fetch_failed: self.blocks_fetch_failed.load(Ordering::Relaxed),
            blocks_inserted: self.blocks_inserted.load(Ordering::Relaxed),
            blocks_insert_failed: self.blocks_insert_failed.load(Ordering::Relaxed),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
        }
    }

    fn record_fetch(&self, bytes: usize) {
        self.blocks_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics snapshot for the engine
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub uptime_secs: u64,
    pub passes_started: u64,
    pub passes_finished: u64,
    pub passes_failed: u64,
    pub passes_yielded: u64,
    pub segments_healthy: u64,
    pub segments_healed: u64,
    pub segments_unhealable: u64,
    pub blocks_fetched: u64,
    pub blocks_fetch_failed: u64,
    pub blocks_inserted: u64,
    pub blocks_insert_failed: u64,
    pub jobs_timed_out: u64,
    pub jobs_cancelled: u64,
    pub bytes_fetched: u64,
}

impl EngineStats {
    /// Share of fetches that succeeded
    pub fn fetch_success_rate(&self) -> f64 {
        let total = self.blocks_fetched + self.blocks_fetch_failed;
        if total == 0 {
            return 1.0;
        }
        self.blocks_fetched as f64 / total as f64
    }

    /// Share of inserts that succeeded
    pub fn insert_success_rate(&self) -> f64 {
        let total = self.blocks_inserted + self.blocks_insert_failed;
        if total == 0 {
            return 1.0;
        }
        self.blocks_inserted as f64 / total as f64
    }

    /// Format as human-readable string
    pub fn summary(&self) -> String {
        format!(
            "Engine Stats:\n\
             - Uptime: {}s\n\
             - Passes: {} started, {} finished, {} yielded, {} failed\n\
             - Segments: {} healthy, {} healed, {} unhealable\n\
             - Fetches: {} ok, {} failed ({:.1}% success)\n\
             - Inserts: {} ok, {} failed ({:.1}% success)\n\
             - Jobs: {} timed out, {} cancelled",
            self.uptime_secs,
            self.passes_started,
            self.passes_finished,
            self.passes_yielded,
            self.passes_failed,
            self.segments_healthy,
            self.segments_healed,
            self.segments_unhealable,
            self.blocks_fetched,
            self.blocks_fetch_failed,
            self.fetch_success_rate() * 100.0,
            self.blocks_inserted,
            self.blocks_insert_failed,
            self.insert_success_rate() * 100.0,
            self.jobs_timed_out,
            self.jobs_cancelled,
        )
    }
}
