//! Bounded-concurrency job executor
//!
//! Runs fetch and insert jobs with at most `power` in flight. Each job has
//! its own lifetime ceiling; jobs that exceed it, or that are running when
//! the stop signal fires, are aborted and given a grace period to wind down.
//!
//! ```text
//!  jobs ──▶ [ permit (power) ] ──▶ spawn ──▶ timeout(lifetime) ──▶ report
//!                                     │
//!                          stop ──────┴──▶ abort ──▶ grace wait ──▶ log
//! ```

mod job;

pub use job::{Job, JobKind, JobOutcome, JobReport};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use lifeline_config::EngineConfig;
use lifeline_telemetry::DocumentJournal;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};

use crate::client::ContentClient;
use crate::key::ContentKey;
use crate::scheduler::EngineMetrics;
use crate::signal::{Heartbeat, StopSignal};

/// Executor limits
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum concurrently running jobs
    pub power: usize,
    /// Lifetime ceiling of a single job
    pub job_lifetime: Duration,
    /// How long an aborted job is waited for
    pub cancel_grace: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ExecutorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            power: config.power.max(1),
            job_lifetime: config.job_lifetime(),
            cancel_grace: config.cancel_grace(),
        }
    }
}

/// Where a batch reports to
pub struct BatchContext<'a> {
    pub journal: &'a DocumentJournal,
    pub stop: &'a StopSignal,
    pub heartbeat: &'a Heartbeat,
}

/// Runs jobs against the content store under a concurrency cap
pub struct JobExecutor {
    client: Arc<dyn ContentClient>,
    config: ExecutorConfig,
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    metrics: Arc<EngineMetrics>,
}

enum Finish {
    Done(Result<(Option<Result<Bytes, String>>, JobOutcome), JoinError>),
    Expired,
    Stopped,
}

impl JobExecutor {
    /// Create a new executor
    pub fn new(client: Arc<dyn ContentClient>, config: ExecutorConfig, metrics: Arc<EngineMetrics>) -> Self {
        let power = config.power.max(1);
        Self {
            client,
            config,
            permits: Arc::new(Semaphore::new(power)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            metrics,
        }
    }

    /// Jobs currently running
    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of jobs seen running at once
    pub fn peak_active(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Run a batch and wait until every job reported.
    ///
    /// Jobs not yet started when the stop signal fires are reported as
    /// cancelled without running.
    pub async fn run_batch(&self, jobs: Vec<Job>, ctx: &BatchContext<'_>) -> Vec<JobReport> {
        let total = jobs.len();
        let step = (total / 8).max(1);
        let mut reports = Vec::with_capacity(total);
        let mut tasks: JoinSet<JobReport> = JoinSet::new();
        let mut pending = jobs.into_iter();
        let mut next = pending.next();
        let mut progress = BatchProgress::default();
        let mut outstanding = Outstanding::default();

        while next.is_some() || !tasks.is_empty() {
            tokio::select! {
                biased;
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok(report) => {
                            outstanding.finish(&report);
                            reports.push(self.record(report, ctx, &mut progress, total, step));
                        }
                        Err(e) => error!(error = %e, "Job task failed"),
                    }
                }
                _ = ctx.stop.stopped(), if next.is_some() => {
                    for job in next.take().into_iter().chain(pending.by_ref()) {
                        reports.push(JobReport::cancelled(&job));
                    }
                }
                permit = self.permits.clone().acquire_owned(), if next.is_some() => {
                    let Some(job) = next.take() else { continue };
                    next = pending.next();
                    let Ok(permit) = permit else {
                        reports.push(JobReport::cancelled(&job));
                        continue;
                    };
                    let client = self.client.clone();
                    let config = self.config.clone();
                    let stop = ctx.stop.clone();
                    let active = self.active.clone();
                    let peak = self.peak.clone();
                    outstanding.start(&job);
                    tasks.spawn(async move {
                        let _permit = permit;
                        run_job(client, job, config, stop, active, peak).await
                    });
                }
            }
        }

        for report in outstanding.lost() {
            reports.push(self.record(report, ctx, &mut progress, total, step));
        }
        reports
    }

    // =========================================================================
    // Internal methods
    // =========================================================================

    fn record(
        &self,
        report: JobReport,
        ctx: &BatchContext<'_>,
        progress: &mut BatchProgress,
        total: usize,
        step: usize,
    ) -> JobReport {
        ctx.heartbeat.touch();
        self.metrics.record_job(&report);

        let line = report.describe();
        if report.outcome.is_success() {
            ctx.journal.detail(Some(report.segment_id), 1, line);
        } else {
            ctx.journal.fail(Some(report.segment_id), 1, line);
        }

        progress.record(&report);
        if progress.done % step == 0 || progress.done == total {
            ctx.journal.progress(
                Some(report.segment_id),
                0,
                format!(
                    "{}/{} blocks {} ({}/{}, {:.0}%)",
                    progress.done,
                    total,
                    progress.verb,
                    progress.success,
                    progress.failed,
                    progress.percent()
                ),
            );
        }
        report
    }
}

/// Jobs handed to a task that has not reported yet
#[derive(Default)]
struct Outstanding {
    jobs: Vec<Job>,
}

impl Outstanding {
    fn start(&mut self, job: &Job) {
        self.jobs.push(Job {
            payload: None,
            ..job.clone()
        });
    }

    fn finish(&mut self, report: &JobReport) {
        if let Some(position) = self.jobs.iter().position(|job| {
            job.segment_id == report.segment_id && job.block_id == report.block_id && job.kind == report.kind
        }) {
            self.jobs.swap_remove(position);
        }
    }

    /// Failure reports for jobs whose task died, so no block stays in flight
    fn lost(self) -> Vec<JobReport> {
        self.jobs
            .iter()
            .map(|job| JobReport::lost(job, "job task failed".into()))
            .collect()
    }
}

#[derive(Default)]
struct BatchProgress {
    done: usize,
    success: usize,
    failed: usize,
    verb: &'static str,
}

impl BatchProgress {
    fn record(&mut self, report: &JobReport) {
        self.done += 1;
        self.verb = match report.kind {
            JobKind::Fetch { .. } => "fetched",
            JobKind::Insert { .. } => "inserted",
        };
        if report.outcome.is_success() {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }

    fn percent(&self) -> f64 {
        crate::healer::persistence_rate(self.success as u32, self.failed as u32) * 100.0
    }
}

async fn run_job(
    client: Arc<dyn ContentClient>,
    job: Job,
    config: ExecutorConfig,
    stop: StopSignal,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
) -> JobReport {
    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now, Ordering::SeqCst);
    let started = Instant::now();

    let mut report = JobReport::cancelled(&job);
    let key = job.key.clone();
    let kind = job.kind;

    let mut work = tokio::spawn(perform(client, job));
    let finish = tokio::select! {
        result = timeout(config.job_lifetime, &mut work) => match result {
            Ok(joined) => Finish::Done(joined),
            Err(_) => Finish::Expired,
        },
        _ = stop.stopped() => Finish::Stopped,
    };

    let (prefetch, outcome) = match finish {
        Finish::Done(Ok(done)) => done,
        Finish::Done(Err(e)) => (None, failure(kind, format!("job aborted: {}", e))),
        Finish::Expired => {
            debug!(key = %key, "Job exceeded its lifetime");
            reap(&key, work, config.cancel_grace).await;
            (None, JobOutcome::TimedOut)
        }
        Finish::Stopped => {
            reap(&key, work, config.cancel_grace).await;
            (None, JobOutcome::Cancelled)
        }
    };

    active.fetch_sub(1, Ordering::SeqCst);
    report.prefetch = prefetch;
    report.outcome = outcome;
    report.elapsed = started.elapsed();
    report
}

/// Abort a job and wait up to `grace` for it to wind down
async fn reap<T>(key: &ContentKey, work: JoinHandle<T>, grace: Duration) {
    work.abort();
    match timeout(grace, work).await {
        Ok(_) => debug!(key = %key, "Cancelled job stopped"),
        Err(_) => warn!(
            key = %key,
            grace_secs = grace.as_secs(),
            "Cancelled job still running after grace period"
        ),
    }
}

fn failure(kind: JobKind, reason: String) -> JobOutcome {
    match kind {
        JobKind::Fetch { .. } => JobOutcome::FetchFailed(reason),
        JobKind::Insert { .. } => JobOutcome::InsertFailed(reason),
    }
}

async fn perform(client: Arc<dyn ContentClient>, job: Job) -> (Option<Result<Bytes, String>>, JobOutcome) {
    match job.kind {
        JobKind::Fetch { ignore_local_cache } => match client.fetch(&job.key, ignore_local_cache).await {
            Ok(payload) => (None, JobOutcome::Fetched(payload)),
            Err(e) => (None, JobOutcome::FetchFailed(e.to_string())),
        },
        JobKind::Insert { priority } => {
            let (payload, prefetch) = match job.payload {
                Some(payload) => (payload, None),
                None => match client.fetch(&job.key, false).await {
                    Ok(payload) => (payload.clone(), Some(Ok(payload))),
                    Err(e) => {
                        return (
                            Some(Err(e.to_string())),
                            JobOutcome::InsertFailed(format!("fetch before insert failed: {}", e)),
                        )
                    }
                },
            };
            let outcome = match client.insert(&job.key, payload, priority).await {
                Ok(returned) if returned == job.key => JobOutcome::Inserted,
                Ok(returned) => JobOutcome::InsertFailed(format!("store returned {}", returned)),
                Err(e) => JobOutcome::InsertFailed(e.to_string()),
            };
            (prefetch, outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InsertPriority;
    use crate::memory::MemoryNetwork;
    use crate::signal::stop_channel;

    fn job(key: &ContentKey, kind: JobKind, payload: Option<Bytes>) -> Job {
        Job {
            segment_id: 1,
            block_id: 0,
            key: key.clone(),
            payload,
            kind,
        }
    }

    fn executor(network: Arc<MemoryNetwork>, config: ExecutorConfig) -> JobExecutor {
        JobExecutor::new(network, config, Arc::new(EngineMetrics::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_never_exceeds_power() {
        let network = Arc::new(MemoryNetwork::new());
        network.set_latency(Duration::from_millis(50));
        let keys: Vec<_> = (0..20).map(|i| network.publish_text(&format!("b{i}"))).collect();
        let exec = executor(
            network.clone(),
            ExecutorConfig {
                power: 3,
                ..ExecutorConfig::default()
            },
        );

        let journal = DocumentJournal::discard();
        let stop = StopSignal::never();
        let heartbeat = Heartbeat::new();
        let ctx = BatchContext {
            journal: &journal,
            stop: &stop,
            heartbeat: &heartbeat,
        };
        let jobs = keys
            .iter()
            .map(|k| job(k, JobKind::Fetch { ignore_local_cache: true }, None))
            .collect();
        let reports = exec.run_batch(jobs, &ctx).await;

        assert_eq!(reports.len(), 20);
        assert!(reports.iter().all(|r| r.outcome.is_success()));
        assert_eq!(exec.peak_active(), 3);
        assert!(network.peak_concurrency() <= 3);
        assert_eq!(exec.active_jobs(), 0);
    }

    #[test]
    fn test_job_without_report_becomes_failure() {
        let network = MemoryNetwork::new();
        let a = network.publish_text("a");
        let b = network.publish_text("b");
        let fetch = job(&a, JobKind::Fetch { ignore_local_cache: true }, None);
        let mut insert = job(
            &b,
            JobKind::Insert {
                priority: InsertPriority::High,
            },
            Some(Bytes::from("b")),
        );
        insert.block_id = 1;

        let mut outstanding = Outstanding::default();
        outstanding.start(&fetch);
        outstanding.start(&insert);
        outstanding.finish(&JobReport::cancelled(&fetch));

        let lost = outstanding.lost();
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].key, b);
        assert_eq!(lost[0].outcome, JobOutcome::InsertFailed("job task failed".into()));
    }

    #[tokio::test]
    async fn test_insert_key_mismatch_is_failure() {
        let network = Arc::new(MemoryNetwork::new());
        let key = network.publish_text("payload");
        network.override_insert(&key, ContentKey::new("CHK@elsewhere"));
        let exec = executor(network.clone(), ExecutorConfig::default());

        let journal = DocumentJournal::in_memory(0);
        let stop = StopSignal::never();
        let heartbeat = Heartbeat::new();
        let ctx = BatchContext {
            journal: &journal,
            stop: &stop,
            heartbeat: &heartbeat,
        };
        let insert = job(
            &key,
            JobKind::Insert {
                priority: InsertPriority::Normal,
            },
            Some(Bytes::from("payload")),
        );
        let reports = exec.run_batch(vec![insert], &ctx).await;

        assert!(matches!(reports[0].outcome, JobOutcome::InsertFailed(_)));
        assert!(journal.lines()[0].contains("!!"));
    }

    #[tokio::test]
    async fn test_insert_without_payload_fetches_first() {
        let network = Arc::new(MemoryNetwork::new());
        let key = network.publish_text("root block");
        let exec = executor(network.clone(), ExecutorConfig::default());

        let journal = DocumentJournal::discard();
        let stop = StopSignal::never();
        let heartbeat = Heartbeat::new();
        let ctx = BatchContext {
            journal: &journal,
            stop: &stop,
            heartbeat: &heartbeat,
        };
        let insert = job(
            &key,
            JobKind::Insert {
                priority: InsertPriority::High,
            },
            None,
        );
        let reports = exec.run_batch(vec![insert], &ctx).await;

        assert_eq!(reports[0].outcome, JobOutcome::Inserted);
        assert!(matches!(reports[0].prefetch, Some(Ok(_))));
        assert_eq!(network.fetch_count(&key), 1);
        assert_eq!(network.inserts(), vec![(key, InsertPriority::High)]);
    }

    #[tokio::test]
    async fn test_insert_prefetch_failure() {
        let network = Arc::new(MemoryNetwork::new());
        let key = MemoryNetwork::key_for(b"lost");
        let exec = executor(network.clone(), ExecutorConfig::default());

        let journal = DocumentJournal::discard();
        let stop = StopSignal::never();
        let heartbeat = Heartbeat::new();
        let ctx = BatchContext {
            journal: &journal,
            stop: &stop,
            heartbeat: &heartbeat,
        };
        let insert = job(
            &key,
            JobKind::Insert {
                priority: InsertPriority::High,
            },
            None,
        );
        let reports = exec.run_batch(vec![insert], &ctx).await;

        assert!(matches!(reports[0].outcome, JobOutcome::InsertFailed(_)));
        assert!(network.inserts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_job_times_out() {
        let network = Arc::new(MemoryNetwork::new());
        let key = network.publish_text("slow");
        network.stall(&key);
        let exec = executor(
            network.clone(),
            ExecutorConfig {
                power: 2,
                job_lifetime: Duration::from_secs(30),
                cancel_grace: Duration::from_secs(5),
            },
        );

        let journal = DocumentJournal::discard();
        let stop = StopSignal::never();
        let heartbeat = Heartbeat::new();
        let ctx = BatchContext {
            journal: &journal,
            stop: &stop,
            heartbeat: &heartbeat,
        };
        let reports = exec
            .run_batch(
                vec![job(&key, JobKind::Fetch { ignore_local_cache: true }, None)],
                &ctx,
            )
            .await;

        assert_eq!(reports[0].outcome, JobOutcome::TimedOut);
        assert!(reports[0].elapsed >= Duration::from_secs(30));
        assert_eq!(exec.active_jobs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_running_and_queued_jobs() {
        let network = Arc::new(MemoryNetwork::new());
        let keys: Vec<_> = (0..4).map(|i| network.publish_text(&format!("s{i}"))).collect();
        for key in &keys {
            network.stall(key);
        }
        let exec = Arc::new(executor(
            network.clone(),
            ExecutorConfig {
                power: 2,
                ..ExecutorConfig::default()
            },
        ));

        let (handle, stop) = stop_channel();
        let jobs: Vec<_> = keys
            .iter()
            .map(|k| job(k, JobKind::Fetch { ignore_local_cache: true }, None))
            .collect();

        let runner = {
            let exec = exec.clone();
            tokio::spawn(async move {
                let journal = DocumentJournal::discard();
                let heartbeat = Heartbeat::new();
                let ctx = BatchContext {
                    journal: &journal,
                    stop: &stop,
                    heartbeat: &heartbeat,
                };
                exec.run_batch(jobs, &ctx).await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        let reports = runner.await.unwrap();

        assert_eq!(reports.len(), 4);
        assert!(reports.iter().all(|r| r.outcome == JobOutcome::Cancelled));
    }
}
