//! Reinsertion scheduler
//!
//! Processes one document at a time, round-robin over the registry:
//!
//! ```text
//!   ┌────────────┐   ┌─────────────────────────┐   ┌────────────────┐
//!   │ next doc   │──▶│ Discovering             │──▶│ record outcome │
//!   │ (wraps)    │   │ Reinserting(segment)    │   │ metrics, log   │
//!   └─────▲──────┘   │ AwaitingCompletion      │   └───────┬────────┘
//!         │          │ Finished                │           │
//!         │          └─────────────────────────┘           │
//!         └────────────────────────────────────────────────┘
//! ```
//!
//! Each pass gets its own child stop signal. A watchdog fires that signal
//! when the pass stops making progress for longer than the idle threshold.

mod metrics;
mod pass;

pub use metrics::{EngineMetrics, EngineStats};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lifeline_config::{Config, EngineConfig};
use lifeline_ec::{ReedSolomonCodec, SegmentCodec};
use lifeline_telemetry::DocumentJournal;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::client::ContentClient;
use crate::error::{Error, Result};
use crate::executor::{ExecutorConfig, JobExecutor};
use crate::key::DocumentId;
use crate::progress::{ProgressTracker, StateLayout};
use crate::signal::{stop_channel, Heartbeat, StopHandle, StopSignal, Watchdog};
use pass::{DocumentPass, PassContext};

/// How often the watchdog looks at the heartbeat
const WATCHDOG_PERIOD: Duration = Duration::from_secs(1);

/// Settings the engine needs from the configuration
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub engine: EngineConfig,
    pub state_dir: PathBuf,
    pub journal_verbosity: u8,
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            engine: config.engine.clone(),
            state_dir: config.storage.state_dir.clone(),
            journal_verbosity: config.logging.journal_verbosity,
        }
    }
}

/// How a document pass ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every segment was processed
    Finished { persistence: u8 },
    /// The time slot ran out; the next pass resumes after the cursor
    Yielded,
    /// Discovery failed on an earlier pass; nothing was done
    Skipped,
    /// The document has no reinsertable blocks
    Empty,
    /// The root resolved to a document that is already tracked
    Dropped { duplicate_of: DocumentId },
    /// The stop signal fired
    Cancelled,
    /// A segment could not be brought to completion
    Incomplete,
}

/// Where the current pass is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassPhase {
    #[default]
    Idle,
    Discovering,
    Reinserting { segment: u32 },
    AwaitingCompletion,
    Finished,
}

/// The reinsertion engine
pub struct ReinsertionEngine {
    settings: EngineSettings,
    client: Arc<dyn ContentClient>,
    codec: Arc<dyn SegmentCodec>,
    tracker: Arc<ProgressTracker>,
    executor: JobExecutor,
    metrics: Arc<EngineMetrics>,
    phase: RwLock<PassPhase>,
    current: RwLock<Option<DocumentId>>,
}

impl ReinsertionEngine {
    /// Create an engine using the Reed-Solomon codec
    pub fn new(
        settings: EngineSettings,
        client: Arc<dyn ContentClient>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let executor = JobExecutor::new(
            client.clone(),
            ExecutorConfig::from(&settings.engine),
            metrics.clone(),
        );
        Self {
            settings,
            client,
            codec: Arc::new(ReedSolomonCodec::new()),
            tracker,
            executor,
            metrics,
            phase: RwLock::new(PassPhase::Idle),
            current: RwLock::new(None),
        }
    }

    /// Replace the erasure codec
    pub fn with_codec(mut self, codec: Arc<dyn SegmentCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn tracker(&self) -> &Arc<ProgressTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    /// Phase of the running pass
    pub fn phase(&self) -> PassPhase {
        *self.phase.read()
    }

    /// Document being processed
    pub fn current_document(&self) -> Option<DocumentId> {
        *self.current.read()
    }

    /// Run one pass over a document.
    ///
    /// Fails with [`Error::Stalled`] when the watchdog had to end the pass.
    pub async fn run_document(&self, id: DocumentId, stop: &StopSignal) -> Result<PassOutcome> {
        let layout = StateLayout::new(&self.settings.state_dir);
        let journal = DocumentJournal::open(layout.journal(id), self.settings.journal_verbosity)?;
        journal.clear()?;

        let (handle, signal) = stop.child();
        let heartbeat = Arc::new(Heartbeat::new());
        let watchdog = Watchdog::spawn(
            heartbeat.clone(),
            self.settings.engine.idle_threshold(),
            WATCHDOG_PERIOD,
            handle.clone(),
        );

        *self.current.write() = Some(id);
        self.metrics.record_pass_start();
        info!(document = %id, "Starting pass");

        let ctx = PassContext {
            settings: &self.settings,
            client: &self.client,
            codec: self.codec.as_ref(),
            executor: &self.executor,
            tracker: &self.tracker,
            metrics: &self.metrics,
            phase: &self.phase,
        };
        let result = DocumentPass::new(ctx, id, &journal, &signal, &heartbeat)
            .run()
            .await;

        let stalled = watchdog.finish().await;
        handle.stop();
        *self.phase.write() = PassPhase::Idle;
        *self.current.write() = None;

        let result = match (result, stalled) {
            (Ok(PassOutcome::Cancelled), Some(idle)) if !stop.is_stopped() => {
                Err(Error::Stalled { idle })
            }
            (result, _) => result,
        };
        self.record_outcome(id, &journal, &result);
        result
    }

    /// Round-robin over all documents until `stop` fires
    pub async fn run(&self, stop: StopSignal) {
        self.metrics.record_start();
        info!(
            power = self.settings.engine.power,
            state_dir = %self.settings.state_dir.display(),
            "Reinsertion engine started"
        );

        let mut previous: Option<DocumentId> = None;
        let mut idle_passes = 0usize;
        while !stop.is_stopped() {
            let Some(id) = self.next_document(previous) else {
                debug!("No documents registered");
                if !stop.sleep(self.settings.engine.idle_backoff()).await {
                    break;
                }
                continue;
            };
            if let Err(e) = self.tracker.set_active(Some(id)) {
                warn!(document = %id, error = %e, "Failed to persist active document");
            }

            let productive = match self.run_document(id, &stop).await {
                Ok(PassOutcome::Cancelled) if stop.is_stopped() => break,
                Ok(PassOutcome::Finished { .. } | PassOutcome::Yielded | PassOutcome::Incomplete) => true,
                Ok(_) => false,
                Err(_) => false,
            };
            previous = Some(id);

            idle_passes = if productive { 0 } else { idle_passes + 1 };
            if idle_passes >= self.tracker.document_ids().len().max(1) {
                idle_passes = 0;
                debug!("Nothing to do in a full round, backing off");
                if !stop.sleep(self.settings.engine.idle_backoff()).await {
                    break;
                }
            }
        }

        self.metrics.record_stop();
        info!("Reinsertion engine stopped");
    }

    // =========================================================================
    // Internal methods
    // =========================================================================

    /// Document after `previous` in registration order, wrapping around.
    /// Without a previous document the persisted active one is resumed.
    fn next_document(&self, previous: Option<DocumentId>) -> Option<DocumentId> {
        let ids = self.tracker.document_ids();
        let first = *ids.first()?;
        match previous {
            None => Some(self.tracker.active().filter(|id| ids.contains(id)).unwrap_or(first)),
            Some(previous) => Some(
                ids.iter()
                    .copied()
                    .find(|id| *id > previous)
                    .unwrap_or(first),
            ),
        }
    }

    fn record_outcome(&self, id: DocumentId, journal: &DocumentJournal, result: &Result<PassOutcome>) {
        match result {
            Ok(PassOutcome::Finished { persistence }) => {
                self.metrics.record_pass_finished();
                info!(document = %id, persistence, "Pass finished");
            }
            Ok(PassOutcome::Yielded) => {
                self.metrics.record_pass_yielded();
                info!(document = %id, "Pass yielded");
            }
            Ok(PassOutcome::Dropped { duplicate_of }) => {
                info!(document = %id, duplicate_of = %duplicate_of, "Duplicate document dropped");
            }
            Ok(outcome) => debug!(document = %id, ?outcome, "Pass ended"),
            Err(e) => {
                self.metrics.record_pass_failed();
                error!(document = %id, error = %e, "Pass failed");
                journal.fail(None, 0, format!("pass failed: {}", e));
            }
        }
    }
}

/// State of the engine behind an [`EngineHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Stopped,
    Running {
        document: Option<DocumentId>,
        phase: PassPhase,
    },
}

struct RunningEngine {
    engine: Arc<ReinsertionEngine>,
    stop: StopHandle,
    task: JoinHandle<()>,
}

/// Owner of the one running engine.
///
/// Starting a new engine stops the previous one and waits for it first.
#[derive(Default)]
pub struct EngineHandle {
    running: tokio::sync::Mutex<Option<RunningEngine>>,
}

impl EngineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `engine` in the background, replacing any running engine
    pub async fn start(&self, engine: Arc<ReinsertionEngine>) {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            Self::shutdown(previous).await;
        }
        let (stop, signal) = stop_channel();
        let task = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run(signal).await }
        });
        *running = Some(RunningEngine { engine, stop, task });
    }

    /// Stop the running engine and wait for it
    pub async fn stop(&self) {
        if let Some(previous) = self.running.lock().await.take() {
            Self::shutdown(previous).await;
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    pub async fn status(&self) -> EngineStatus {
        match self.running.lock().await.as_ref() {
            Some(running) if !running.task.is_finished() => EngineStatus::Running {
                document: running.engine.current_document(),
                phase: running.engine.phase(),
            },
            _ => EngineStatus::Stopped,
        }
    }

    async fn shutdown(running: RunningEngine) {
        running.stop.stop();
        if let Err(e) = running.task.await {
            error!(error = %e, "Engine task failed");
        }
    }
}
