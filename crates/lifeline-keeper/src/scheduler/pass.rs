//! One pass over one document
//!
//! ```text
//!  resolve root ──▶ root check ──▶ manifest? ──no──▶ discover ──▶ save manifest
//!                                      │yes                          │
//!                                      ▼                             ▼
//!                          prepare cursor ◀───────────────────────────┘
//!                                      │
//!        ┌─────────────────────────────▼──────────────────────────────┐
//!        │ for segment in cursor+1..: sample ─▶ fetch rest ─▶ heal ─▶ │
//!        │   reinsert ─▶ record counters ─▶ advance cursor            │
//!        │ (top block reinserted alongside, awaited last)             │
//!        └─────────────────────────────┬──────────────────────────────┘
//!                                      ▼
//!                     cursor == max ─▶ monthly history
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lifeline_ec::SegmentCodec;
use lifeline_telemetry::DocumentJournal;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{EngineMetrics, EngineSettings, PassOutcome, PassPhase};
use crate::client::{ContentClient, EditionLookup, InsertPriority};
use crate::discovery::{BlockIndex, Walker};
use crate::error::{Error, Result};
use crate::executor::{BatchContext, Job, JobExecutor, JobKind, JobOutcome, JobReport};
use crate::healer::{heal_segment, sample_size, select_sample, verdict, Verdict};
use crate::key::{ContentKey, DocumentId};
use crate::model::Segment;
use crate::progress::{BlockCount, ProgressTracker, RootCache, SegmentCounters, StateLayout};
use crate::signal::{Heartbeat, StopSignal};

/// Permanent redirects followed before giving up on an edition lookup
const MAX_EDITION_REDIRECTS: usize = 8;

/// The root block is fetched again when its last check is older than this
const ROOT_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// How a segment ended
enum SegmentResult {
    Done { available: bool },
    Interrupted,
}

/// Segments finished so far while the top block is still in flight
struct CursorGate {
    top_pending: bool,
    /// Last segment of the contiguous run after the top block
    through: Option<u32>,
}

/// Collaborators of a pass
pub(crate) struct PassContext<'a> {
    pub settings: &'a EngineSettings,
    pub client: &'a Arc<dyn ContentClient>,
    pub codec: &'a dyn SegmentCodec,
    pub executor: &'a JobExecutor,
    pub tracker: &'a ProgressTracker,
    pub metrics: &'a EngineMetrics,
    pub phase: &'a RwLock<PassPhase>,
}

/// A single pass over a document
pub(crate) struct DocumentPass<'a> {
    ctx: PassContext<'a>,
    id: DocumentId,
    layout: StateLayout,
    journal: &'a DocumentJournal,
    stop: &'a StopSignal,
    heartbeat: &'a Heartbeat,
    rng: Mutex<StdRng>,
}

impl<'a> DocumentPass<'a> {
    pub fn new(
        ctx: PassContext<'a>,
        id: DocumentId,
        journal: &'a DocumentJournal,
        stop: &'a StopSignal,
        heartbeat: &'a Heartbeat,
    ) -> Self {
        let layout = StateLayout::new(&ctx.settings.state_dir);
        Self {
            ctx,
            id,
            layout,
            journal,
            stop,
            heartbeat,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Run the pass to completion, time-slot expiry or cancellation
    pub async fn run(self) -> Result<PassOutcome> {
        let started = Instant::now();
        let record = self.ctx.tracker.document(self.id)?;
        if record.block_count == BlockCount::Failed {
            self.journal.note(
                None,
                0,
                "discovery failed on an earlier pass, waiting for a manual retry",
            );
            return Ok(PassOutcome::Skipped);
        }

        self.set_phase(PassPhase::Discovering);
        let root = match self.resolve_root(&record.root).await {
            Ok(root) => root,
            Err(Error::Cancelled) => return Ok(PassOutcome::Cancelled),
            Err(e) => return Err(e),
        };
        if root != record.root {
            if let Some(other) = self.ctx.tracker.find_by_root(&root) {
                if other != self.id {
                    return self.drop_duplicate(&root, other);
                }
            }
            info!(document = %self.id, root = %root, "Root moved to a new edition");
            self.journal.note(None, 0, format!("new edition {}", root));
            self.ctx.tracker.set_root(self.id, root.clone())?;
            self.layout.manifests().remove(self.id)?;
        }

        let index = match self.load_manifest()? {
            Some(index) => {
                self.journal.note(None, 0, format!("using manifest with {} blocks", index.len()));
                self.check_root(&root).await?;
                index
            }
            None => match self.discover(&root).await {
                Ok(index) => index,
                Err(Error::Cancelled) => return Ok(PassOutcome::Cancelled),
                Err(e) => return Err(e),
            },
        };

        let Some(max_segment) = index.max_segment_id() else {
            self.journal.note(None, 0, "document has no reinsertable blocks");
            self.set_phase(PassPhase::Finished);
            return Ok(PassOutcome::Empty);
        };

        let start = self.ctx.tracker.prepare_pass(self.id, max_segment)?;
        self.journal.note(
            None,
            0,
            format!("reinsertion from segment {} of {}", start, max_segment + 1),
        );
        debug!(document = %self.id, start, max_segment, "Starting segment loop");

        let deadline = started + self.ctx.settings.engine.time_slot();
        if Instant::now() >= deadline {
            self.journal.note(None, 0, "time slot used up, yielding to the next document");
            return Ok(PassOutcome::Yielded);
        }

        // A lone top block is reinserted while the other segments run and
        // awaited last; the cursor waits for it.
        let entries = index.segment(start);
        let mut top = (start == 0 && entries.len() == 1).then(|| Segment::from_entries(0, &entries));
        let gate = Mutex::new(CursorGate {
            top_pending: top.is_some(),
            through: None,
        });
        let first = if top.is_some() { 1 } else { start };
        let top_insert = async {
            match top.as_mut() {
                Some(segment) => self.process_top(segment, &gate, max_segment).await,
                None => Ok(true),
            }
        };
        let (top_done, segments) = tokio::join!(
            top_insert,
            self.process_segments(&index, first, max_segment, deadline, &gate)
        );
        let top_done = top_done?;
        if let Some(outcome) = segments? {
            return Ok(outcome);
        }
        if !top_done && self.stop.is_stopped() {
            return Ok(PassOutcome::Cancelled);
        }

        self.set_phase(PassPhase::AwaitingCompletion);
        let record = self.ctx.tracker.document(self.id)?;
        if record.cursor != Some(max_segment) {
            self.journal.fail(
                None,
                0,
                format!("pass ended at cursor {:?} of {}", record.cursor, max_segment),
            );
            return Ok(PassOutcome::Incomplete);
        }

        let persistence = record.persistence_percent();
        self.ctx.tracker.record_history(self.id, persistence)?;
        self.journal.note(
            None,
            0,
            format!(
                "pass finished in {}s, persistence {}%",
                started.elapsed().as_secs(),
                persistence
            ),
        );
        self.set_phase(PassPhase::Finished);
        Ok(PassOutcome::Finished { persistence })
    }

    /// Segments from `first` upwards; `Some` when the loop ended the pass early
    async fn process_segments(
        &self,
        index: &BlockIndex,
        first: u32,
        max_segment: u32,
        deadline: Instant,
        gate: &Mutex<CursorGate>,
    ) -> Result<Option<PassOutcome>> {
        let mut segment_id = first;
        loop {
            if self.stop.is_stopped() {
                return Ok(Some(PassOutcome::Cancelled));
            }
            if Instant::now() >= deadline {
                self.journal.note(None, 0, "time slot used up, yielding to the next document");
                return Ok(Some(PassOutcome::Yielded));
            }
            let entries = index.segment(segment_id);
            if entries.is_empty() {
                return Ok(None);
            }

            self.set_phase(PassPhase::Reinserting {
                segment: segment_id,
            });
            let mut segment = Segment::from_entries(segment_id, &entries);
            let available = match self.process_segment(&mut segment).await? {
                SegmentResult::Done { available } => available,
                SegmentResult::Interrupted if self.stop.is_stopped() => {
                    self.journal.note(Some(segment_id), 0, "stopped, segment will be redone");
                    return Ok(Some(PassOutcome::Cancelled));
                }
                SegmentResult::Interrupted => {
                    self.journal.fail(Some(segment_id), 0, "segment left unfinished");
                    return Ok(Some(PassOutcome::Incomplete));
                }
            };
            if !segment.check_finished() {
                self.journal.fail(Some(segment_id), 0, "segment left unfinished");
                return Ok(Some(PassOutcome::Incomplete));
            }

            self.ctx
                .tracker
                .record_segment(self.id, segment_id, segment.counters(), available)?;
            let ready = {
                let mut gate = gate.lock();
                gate.through = Some(segment_id);
                !gate.top_pending
            };
            if ready {
                self.ctx
                    .tracker
                    .advance_cursor(self.id, segment_id, max_segment)?;
            }
            self.heartbeat.touch();
            segment_id += 1;
        }
    }

    /// Reinsert the top block; true once it is finished and recorded
    async fn process_top(
        &self,
        segment: &mut Segment,
        gate: &Mutex<CursorGate>,
        max_segment: u32,
    ) -> Result<bool> {
        let available = match self.process_single(segment).await {
            SegmentResult::Done { available } => available,
            SegmentResult::Interrupted => {
                self.journal.note(Some(0), 0, "top block interrupted, will be redone");
                return Ok(false);
            }
        };
        if !segment.check_finished() {
            self.journal.fail(Some(0), 0, "top block left unfinished");
            return Ok(false);
        }

        self.ctx
            .tracker
            .record_segment(self.id, 0, segment.counters(), available)?;
        let through = {
            let mut gate = gate.lock();
            gate.top_pending = false;
            gate.through
        };
        self.ctx
            .tracker
            .advance_cursor(self.id, through.unwrap_or(0), max_segment)?;
        self.heartbeat.touch();
        Ok(true)
    }

    // =========================================================================
    // Root and discovery
    // =========================================================================

    /// Follow a mutable reference to its newest edition
    async fn resolve_root(&self, root: &ContentKey) -> Result<ContentKey> {
        let client = self.ctx.client;
        let mut current = client.normalize_key(root);
        for _ in 0..MAX_EDITION_REDIRECTS {
            if !client.is_mutable(&current) {
                return Ok(current);
            }
            let lookup = tokio::select! {
                lookup = client.resolve_latest_edition(&current) => lookup?,
                _ = self.stop.stopped() => return Err(Error::Cancelled),
            };
            match lookup {
                EditionLookup::Latest(latest) => return Ok(client.normalize_key(&latest)),
                EditionLookup::PermanentRedirect(target) => {
                    self.journal
                        .progress(None, 0, format!("{} moved to {}", current, target));
                    current = client.normalize_key(&target);
                }
            }
            self.heartbeat.touch();
        }
        Err(Error::RedirectLoop(root.clone()))
    }

    fn drop_duplicate(&self, root: &ContentKey, other: DocumentId) -> Result<PassOutcome> {
        warn!(document = %self.id, duplicate_of = %other, root = %root, "Dropping duplicate document");
        self.ctx.tracker.remove_document(self.id)?;
        self.layout.manifests().remove(self.id)?;
        RootCache::new(self.layout.roots_dir()).remove(self.id)?;
        Ok(PassOutcome::Dropped { duplicate_of: other })
    }

    /// Cached manifest, when it matches the persisted block count
    fn load_manifest(&self) -> Result<Option<BlockIndex>> {
        let record = self.ctx.tracker.document(self.id)?;
        let BlockCount::Known(blocks) = record.block_count else {
            return Ok(None);
        };
        match self.layout.manifests().load(self.id) {
            Ok(Some(index)) if index.len() == blocks => Ok(Some(index)),
            Ok(Some(index)) => {
                warn!(
                    document = %self.id,
                    manifest = index.len(),
                    expected = blocks,
                    "Manifest does not match block count, rediscovering"
                );
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(document = %self.id, error = %e, "Manifest unreadable, rediscovering");
                Ok(None)
            }
        }
    }

    async fn discover(&self, root: &ContentKey) -> Result<BlockIndex> {
        let walker = Walker::new(
            self.ctx.client.as_ref(),
            self.journal,
            self.stop,
            self.heartbeat,
        );
        let discovery = match walker.walk(root).await {
            Ok(discovery) => discovery,
            Err(e @ Error::RootUnavailable { .. }) => {
                warn!(document = %self.id, error = %e, "Discovery failed permanently");
                self.ctx.tracker.set_block_count(self.id, BlockCount::Failed)?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let index = discovery.index;
        if discovery.complete {
            self.layout.manifests().save(self.id, &index)?;
        } else {
            // Not cached, so the next pass walks the tree again.
            self.layout.manifests().remove(self.id)?;
            self.journal
                .note(None, 0, "some metadata could not be read, manifest not cached");
        }
        self.ctx
            .tracker
            .set_block_count(self.id, BlockCount::Known(index.len()))?;
        if let Some(payload) = &discovery.root_payload {
            RootCache::new(self.layout.roots_dir()).store(self.id, payload)?;
        }
        self.ctx.tracker.mark_root_checked(self.id, Utc::now())?;
        info!(
            document = %self.id,
            blocks = index.len(),
            segments = index.segment_count(),
            "Discovery finished"
        );
        Ok(index)
    }

    /// Fetch the root block once a day; reinsert the cached copy when it is gone
    async fn check_root(&self, root: &ContentKey) -> Result<()> {
        let client = self.ctx.client;
        if !client.is_content_addressed(root) {
            return Ok(());
        }
        let record = self.ctx.tracker.document(self.id)?;
        let due = record.root_checked_at.map_or(true, |at| {
            (Utc::now() - at).to_std().unwrap_or(Duration::ZERO) > ROOT_CHECK_INTERVAL
        });
        if !due {
            return Ok(());
        }

        let fetch = root_job(root, None, JobKind::Fetch {
            ignore_local_cache: true,
        });
        let reports = self.run_jobs(vec![fetch]).await;
        match reports.first().map(|report| &report.outcome) {
            Some(JobOutcome::Fetched(_)) => {}
            Some(JobOutcome::Cancelled) | None => return Ok(()),
            Some(_) => {
                let cache = RootCache::new(self.layout.roots_dir());
                match cache.load(self.id)? {
                    Some(payload) => {
                        self.journal.note(None, 0, "root block missing, reinserting cached copy");
                        let insert = root_job(root, Some(payload), JobKind::Insert {
                            priority: InsertPriority::High,
                        });
                        let reports = self.run_jobs(vec![insert]).await;
                        if reports.iter().any(|report| report.outcome == JobOutcome::Cancelled) {
                            return Ok(());
                        }
                    }
                    None => self.journal.fail(None, 0, "root block missing and not cached"),
                }
            }
        }
        self.ctx.tracker.mark_root_checked(self.id, Utc::now())
    }

    // =========================================================================
    // Segments
    // =========================================================================

    async fn process_segment(&self, segment: &mut Segment) -> Result<SegmentResult> {
        if segment.size() == 1 {
            return Ok(self.process_single(segment).await);
        }

        let tolerance = self.ctx.settings.engine.tolerance();
        let block_size = self.ctx.settings.engine.block_size;
        let size = segment.size();
        let count = sample_size(self.ctx.settings.engine.sample_size, size);
        let picked = select_sample(&mut *self.rng.lock(), size, count);
        self.journal.progress(
            Some(segment.id()),
            0,
            format!("checking {} of {} blocks", picked.len(), size),
        );

        let jobs = fetch_jobs(segment, |position| picked.binary_search(&position).is_ok());
        if !self.fetch(segment, jobs).await {
            return Ok(SegmentResult::Interrupted);
        }
        let tally = segment.fetch_tally();
        if verdict(tally.rate(), tolerance) == Verdict::Healthy {
            return Ok(self.confirm(segment, tally.rate(), "approximated"));
        }
        self.journal.note(
            Some(segment.id()),
            0,
            format!(
                "availability {:.0}% (approximated) below tolerance, fetching all blocks",
                tally.rate() * 100.0
            ),
        );

        let jobs = fetch_jobs(segment, |_| true);
        if !self.fetch(segment, jobs).await {
            return Ok(SegmentResult::Interrupted);
        }
        let tally = segment.fetch_tally();
        if verdict(tally.rate(), tolerance) == Verdict::Healthy {
            return Ok(self.confirm(segment, tally.rate(), "exact"));
        }
        let counters = SegmentCounters {
            success: tally.success,
            failed: tally.failed,
        };
        segment.set_counters(counters);
        self.journal.note(
            Some(segment.id()),
            0,
            format!("availability {:.0}% (exact), healing", tally.rate() * 100.0),
        );

        let client = self.ctx.client;
        match heal_segment(segment, self.ctx.codec, block_size, |key| client.payload_len(key)) {
            Ok(rebuilt) => {
                self.journal
                    .progress(Some(segment.id()), 0, format!("healed, {} blocks rebuilt", rebuilt));
            }
            Err(e @ Error::HealingImpossible { .. }) => {
                self.journal.fail(Some(segment.id()), 0, format!("{}, not reinserting", e));
                segment.mark_healing_impossible();
                self.ctx.metrics.record_segment_unhealable();
                return Ok(SegmentResult::Done { available: false });
            }
            Err(e) => return Err(e),
        }
        self.heartbeat.touch();

        let jobs: Vec<Job> = segment
            .blocks()
            .iter()
            .filter(|block| !block.is_fetch_successful())
            .map(|block| Job::insert(block, InsertPriority::Normal))
            .collect();
        let reports = self.run_jobs(jobs).await;
        segment.apply(&reports);
        if interrupted(&reports) {
            return Ok(SegmentResult::Interrupted);
        }
        self.ctx.metrics.record_segment_healed();
        Ok(SegmentResult::Done { available: true })
    }

    /// A lone block is fetched through its insert job and always reinserted
    async fn process_single(&self, segment: &mut Segment) -> SegmentResult {
        let Some(block) = segment.blocks().first() else {
            return SegmentResult::Interrupted;
        };
        let job = Job::insert(block, InsertPriority::High);
        let reports = self.run_jobs(vec![job]).await;
        segment.apply(&reports);
        if interrupted(&reports) {
            return SegmentResult::Interrupted;
        }

        let Some(block) = segment.blocks().first() else {
            return SegmentResult::Interrupted;
        };
        let fetched = block.is_fetch_successful();
        let available = block.is_insert_successful();
        segment.set_counters(SegmentCounters {
            success: u32::from(fetched),
            failed: u32::from(!fetched),
        });
        if available {
            self.journal.progress(Some(segment.id()), 0, "single block reinserted");
        } else {
            self.journal.fail(Some(segment.id()), 0, "single block reinsertion failed");
        }
        SegmentResult::Done { available }
    }

    fn confirm(&self, segment: &mut Segment, rate: f64, how: &str) -> SegmentResult {
        segment.confirm_persistence(rate);
        self.ctx.metrics.record_segment_healthy();
        self.journal.note(
            Some(segment.id()),
            0,
            format!("availability {:.0}% ({}), ok", rate * 100.0, how),
        );
        SegmentResult::Done { available: true }
    }

    /// Run fetch jobs and apply them; false when the batch was cut short
    async fn fetch(&self, segment: &mut Segment, jobs: Vec<Job>) -> bool {
        let reports = self.run_jobs(jobs).await;
        segment.apply(&reports);
        !interrupted(&reports)
    }

    async fn run_jobs(&self, jobs: Vec<Job>) -> Vec<JobReport> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let batch = BatchContext {
            journal: self.journal,
            stop: self.stop,
            heartbeat: self.heartbeat,
        };
        self.ctx.executor.run_batch(jobs, &batch).await
    }

    fn set_phase(&self, phase: PassPhase) {
        *self.ctx.phase.write() = phase;
    }
}

/// Fetch jobs for the blocks at the selected positions that were not fetched yet
fn fetch_jobs(segment: &mut Segment, selected: impl Fn(usize) -> bool) -> Vec<Job> {
    segment
        .blocks_mut()
        .iter_mut()
        .enumerate()
        .filter(|(position, block)| selected(*position) && !block.is_fetch_done())
        .map(|(_, block)| {
            block.mark_fetching();
            Job::fetch(block, true)
        })
        .collect()
}

fn root_job(root: &ContentKey, payload: Option<bytes::Bytes>, kind: JobKind) -> Job {
    Job {
        segment_id: 0,
        block_id: 0,
        key: root.clone(),
        payload,
        kind,
    }
}

/// Cancelled jobs leave their blocks unfinished
fn interrupted(reports: &[JobReport]) -> bool {
    reports
        .iter()
        .any(|report| report.outcome == JobOutcome::Cancelled)
}
