//! End-to-end passes against the in-memory content network

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lifeline_config::EngineConfig;
use lifeline_keeper::memory::MemoryNetwork;
use lifeline_keeper::{
    stop_channel, BlockCount, ContentKey, ContentNode, DocumentId, EditionLookup, EngineSettings,
    Error, InsertPriority, JsonStateStore, PassOutcome, PassPhase, ProgressTracker,
    ReinsertionEngine, SegmentCounters, Splitfile, SplitfileSegment, StateLayout, StopSignal,
};
use lifeline_telemetry::DocumentJournal;
use tempfile::TempDir;

const BLOCK: usize = 64;

struct Harness {
    _dir: TempDir,
    state_dir: PathBuf,
    network: Arc<MemoryNetwork>,
    engine: ReinsertionEngine,
}

fn settings(state_dir: PathBuf) -> EngineSettings {
    let engine = EngineConfig {
        power: 4,
        tolerance_percent: 70,
        block_size: BLOCK,
        ..EngineConfig::default()
    };
    EngineSettings {
        engine,
        state_dir,
        journal_verbosity: 2,
    }
}

impl Harness {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(configure: impl FnOnce(&mut EngineSettings)) -> Self {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        let mut settings = settings(state_dir.clone());
        configure(&mut settings);
        let network = Arc::new(MemoryNetwork::new());
        let engine = build_engine(settings, network.clone());
        Self {
            _dir: dir,
            state_dir,
            network,
            engine,
        }
    }

    /// Drop the engine and tracker and load them again from disk
    fn restart(self) -> Self {
        let engine = build_engine(settings(self.state_dir.clone()), self.network.clone());
        Self { engine, ..self }
    }

    fn tracker(&self) -> &Arc<ProgressTracker> {
        self.engine.tracker()
    }

    fn layout(&self) -> StateLayout {
        StateLayout::new(&self.state_dir)
    }

    fn add(&self, root: &ContentKey) -> DocumentId {
        self.tracker().add_document(root.clone()).unwrap()
    }

    async fn pass(&self, id: DocumentId) -> lifeline_keeper::Result<PassOutcome> {
        self.engine.run_document(id, &StopSignal::never()).await
    }

    fn journal(&self, id: DocumentId) -> String {
        DocumentJournal::read(self.layout().journal(id)).unwrap()
    }

    /// Publish a root whose metadata is a splitfile over `segments`
    fn publish_document(&self, name: &str, segments: Vec<SplitfileSegment>) -> ContentKey {
        let root = self.network.publish_text(name);
        self.network
            .set_node(&root, ContentNode::Splitfile(Splitfile::simple(segments)));
        root
    }

    fn fetches(&self, keys: &[ContentKey]) -> usize {
        keys.iter().map(|key| self.network.fetch_count(key)).sum()
    }
}

fn build_engine(settings: EngineSettings, network: Arc<MemoryNetwork>) -> ReinsertionEngine {
    let store = Arc::new(JsonStateStore::new(StateLayout::new(&settings.state_dir).state_file()));
    let tracker = Arc::new(ProgressTracker::open(store).unwrap());
    ReinsertionEngine::new(settings, network, tracker)
}

fn keys(segment: &SplitfileSegment) -> Vec<ContentKey> {
    segment.keys().map(|(key, _)| key.clone()).collect()
}

#[tokio::test]
async fn test_healthy_document_only_reinserts_root() {
    let h = Harness::new();
    let first = h.network.publish_segment(4, 2, BLOCK, 1);
    let second = h.network.publish_segment(4, 2, BLOCK, 2);
    let root = h.publish_document("healthy site", vec![first, second]);
    let id = h.add(&root);

    let outcome = h.pass(id).await.unwrap();
    assert_eq!(outcome, PassOutcome::Finished { persistence: 100 });
    assert_eq!(h.network.inserts(), vec![(root, InsertPriority::High)]);

    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.block_count, BlockCount::Known(13));
    assert_eq!(record.cursor, Some(2));
    assert_eq!(record.availability, vec![true, true, true]);
    assert_eq!(record.history.entries().len(), 1);
    assert_eq!(record.history.entries()[0].persistence, 100);
    assert!(h.layout().manifests().path(id).exists());

    let stats = h.engine.metrics().stats();
    assert_eq!(stats.passes_finished, 1);
    assert_eq!(stats.segments_healthy, 2);
}

#[tokio::test]
async fn test_degraded_segment_is_healed_and_reinserted() {
    let h = Harness::new();
    let degraded = h.network.publish_segment(2, 4, BLOCK, 1);
    let healthy = h.network.publish_segment(4, 2, BLOCK, 2);
    let lost = vec![
        degraded.data[0].clone(),
        degraded.data[1].clone(),
        degraded.check[0].clone(),
        degraded.check[1].clone(),
    ];
    for key in &lost {
        h.network.remove(key);
    }
    let root = h.publish_document("degraded site", vec![degraded, healthy]);
    let id = h.add(&root);

    let outcome = h.pass(id).await.unwrap();
    // 1 root + 2 surviving + 6 healthy out of 13 blocks
    assert_eq!(outcome, PassOutcome::Finished { persistence: 69 });

    for key in &lost {
        assert!(h.network.contains(key), "{} was not restored", key);
    }
    let inserted: Vec<_> = h.network.inserts();
    for key in &lost {
        assert!(inserted.contains(&(key.clone(), InsertPriority::Normal)));
    }

    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.counters[1], SegmentCounters { success: 2, failed: 4 });
    assert_eq!(record.availability, vec![true, true, true]);
    assert_eq!(h.engine.metrics().stats().segments_healed, 1);
    assert!(h.journal(id).contains("healed, 4 blocks rebuilt"));
}

#[tokio::test]
async fn test_unhealable_segment_is_flagged_and_pass_continues() {
    let h = Harness::new();
    let broken = h.network.publish_segment(2, 4, BLOCK, 1);
    let healthy = h.network.publish_segment(4, 2, BLOCK, 2);
    let lost: Vec<ContentKey> = keys(&broken).into_iter().take(5).collect();
    for key in &lost {
        h.network.remove(key);
    }
    let root = h.publish_document("broken site", vec![broken, healthy]);
    let id = h.add(&root);

    let outcome = h.pass(id).await.unwrap();
    assert_eq!(outcome, PassOutcome::Finished { persistence: 61 });

    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.availability, vec![true, false, true]);
    assert_eq!(record.counters[1], SegmentCounters { success: 1, failed: 5 });
    assert!(lost.iter().all(|key| !h.network.contains(key)));
    assert_eq!(h.engine.metrics().stats().segments_unhealable, 1);

    let journal = h.journal(id);
    assert!(journal.contains("cannot be healed"));
    assert!(journal.contains("!!"));
}

#[tokio::test]
async fn test_resume_after_crash_skips_finished_segments() {
    let h = Harness::new();
    let segments: Vec<SplitfileSegment> = (1..=9)
        .map(|seed| h.network.publish_segment(2, 1, BLOCK, seed))
        .collect();
    let root = h.publish_document("large site", segments.clone());
    let id = h.add(&root);
    assert_eq!(
        h.pass(id).await.unwrap(),
        PassOutcome::Finished { persistence: 100 }
    );

    // State a pass interrupted after segment 4 leaves behind
    let tracker = h.tracker();
    assert_eq!(tracker.prepare_pass(id, 9).unwrap(), 0);
    tracker
        .record_segment(id, 0, SegmentCounters { success: 1, failed: 0 }, true)
        .unwrap();
    for segment in 1..=4 {
        tracker
            .record_segment(id, segment, SegmentCounters { success: 3, failed: 0 }, true)
            .unwrap();
    }
    tracker.advance_cursor(id, 4, 9).unwrap();

    let h = h.restart();
    let node_fetches = h.network.node_fetches();
    let root_fetches = h.network.fetch_count(&root);
    let before: Vec<usize> = segments.iter().map(|s| h.fetches(&keys(s))).collect();

    let outcome = h.pass(id).await.unwrap();
    assert_eq!(outcome, PassOutcome::Finished { persistence: 100 });
    assert_eq!(h.network.node_fetches(), node_fetches);
    assert_eq!(h.network.fetch_count(&root), root_fetches);

    for (position, segment) in segments.iter().enumerate() {
        let fetched = h.fetches(&keys(segment)) - before[position];
        // splitfile segment n is segment n + 1 of the document
        if position < 4 {
            assert_eq!(fetched, 0, "segment {} was reprocessed", position + 1);
        } else {
            assert_eq!(fetched, 2, "segment {} was not sampled", position + 1);
        }
    }
    assert_eq!(h.tracker().document(id).unwrap().cursor, Some(9));
}

#[tokio::test]
async fn test_unreadable_nested_metadata_does_not_fail_the_document() {
    let h = Harness::new();
    let healthy = h.network.publish_segment(4, 2, BLOCK, 11);
    let nested_block = h.network.publish_text("nested splitfile without metadata");
    let root = h.network.publish_text("site with a broken sub-manifest");
    h.network.set_node(
        &root,
        ContentNode::Manifest {
            entries: vec![
                (
                    "index.html".into(),
                    ContentNode::Splitfile(Splitfile::simple(vec![healthy.clone()])),
                ),
                (
                    "big.bin".into(),
                    ContentNode::Splitfile(Splitfile::nested(vec![SplitfileSegment::new(
                        vec![nested_block.clone()],
                        vec![],
                    )])),
                ),
            ],
        },
    );
    let id = h.add(&root);

    let outcome = h.pass(id).await.unwrap();
    assert_eq!(outcome, PassOutcome::Finished { persistence: 100 });
    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.block_count, BlockCount::Known(8));
    assert_eq!(record.availability, vec![true, true, true]);
    assert!(h.fetches(&keys(&healthy)) > 0);
    assert!(h.journal(id).contains("nested metadata cannot be fetched"));

    // the partial manifest is not cached, so the next pass walks again
    assert!(!h.layout().manifests().path(id).exists());
    let node_fetches = h.network.node_fetches();
    h.pass(id).await.unwrap();
    assert!(h.network.node_fetches() > node_fetches);
    assert_ne!(h.tracker().document(id).unwrap().block_count, BlockCount::Failed);
}

#[tokio::test]
async fn test_failed_sample_with_healthy_full_fetch_is_not_healed() {
    let h = Harness::with(|settings| settings.engine.tolerance_percent = 50);
    // one data and one check block each: the sample is a single block, and
    // a sample that hits the lost data block forces a full fetch
    let segments: Vec<SplitfileSegment> = (0..24)
        .map(|seed| h.network.publish_segment(1, 1, BLOCK, 100 + seed))
        .collect();
    let lost: Vec<ContentKey> = segments.iter().map(|s| s.data[0].clone()).collect();
    for key in &lost {
        h.network.remove(key);
    }
    let root = h.publish_document("half lost site", segments);
    let id = h.add(&root);

    let outcome = h.pass(id).await.unwrap();
    assert!(matches!(outcome, PassOutcome::Finished { .. }));
    assert_eq!(h.network.inserts(), vec![(root, InsertPriority::High)]);
    assert!(lost.iter().all(|key| !h.network.contains(key)));

    let stats = h.engine.metrics().stats();
    assert_eq!(stats.segments_healthy, 24);
    assert_eq!(stats.segments_healed, 0);
    let record = h.tracker().document(id).unwrap();
    assert!(record.availability.iter().all(|available| *available));

    let journal = h.journal(id);
    assert!(journal.contains("below tolerance, fetching all blocks"));
    assert!(journal.contains("availability 50% (exact), ok"));
    assert!(!journal.contains("healing"));
}

#[tokio::test(start_paused = true)]
async fn test_top_block_is_awaited_last() {
    let h = Harness::new();
    let degraded = h.network.publish_segment(2, 4, BLOCK, 12);
    let healthy = h.network.publish_segment(4, 2, BLOCK, 13);
    let lost = vec![
        degraded.data[0].clone(),
        degraded.data[1].clone(),
        degraded.check[0].clone(),
        degraded.check[1].clone(),
    ];
    for key in &lost {
        h.network.remove(key);
    }
    let root = h.publish_document("slow root", vec![degraded, healthy]);
    h.network.set_delay(&root, Duration::from_secs(5));
    let id = h.add(&root);

    let outcome = h.pass(id).await.unwrap();
    assert!(matches!(outcome, PassOutcome::Finished { .. }));

    let inserts = h.network.inserts();
    assert_eq!(inserts.len(), 5);
    assert_eq!(inserts.last(), Some(&(root, InsertPriority::High)));
    for key in &lost {
        assert!(inserts[..4].contains(&(key.clone(), InsertPriority::Normal)));
    }
    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.cursor, Some(2));
    assert_eq!(record.availability, vec![true, true, true]);
}

#[tokio::test]
async fn test_second_pass_reuses_manifest() {
    let h = Harness::new();
    let segment = h.network.publish_segment(4, 2, BLOCK, 3);
    let root = h.publish_document("stable site", vec![segment]);
    let id = h.add(&root);

    h.pass(id).await.unwrap();
    let node_fetches = h.network.node_fetches();
    let outcome = h.pass(id).await.unwrap();

    assert_eq!(outcome, PassOutcome::Finished { persistence: 100 });
    assert_eq!(h.network.node_fetches(), node_fetches);
    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.cursor, Some(1));
    assert_eq!(record.history.entries().len(), 1);
}

#[tokio::test]
async fn test_edition_resolving_to_tracked_root_is_dropped() {
    let h = Harness::new();
    let segment = h.network.publish_segment(4, 2, BLOCK, 4);
    let root = h.publish_document("shared site", vec![segment]);
    let original = h.add(&root);

    let alias = ContentKey::new("USK@alias/site/1");
    h.network
        .set_edition(&alias, EditionLookup::Latest(root.clone()));
    let duplicate = h.add(&alias);

    let outcome = h.pass(duplicate).await.unwrap();
    assert_eq!(
        outcome,
        PassOutcome::Dropped {
            duplicate_of: original
        }
    );
    let ids: Vec<DocumentId> = h.tracker().documents().iter().map(|doc| doc.id).collect();
    assert_eq!(ids, vec![original]);
}

#[tokio::test]
async fn test_permanent_redirects_are_followed() {
    let h = Harness::new();
    let old = ContentKey::new("USK@old/site/1");
    let moved = ContentKey::new("USK@new/site/3");
    let latest = ContentKey::new("USK@new/site/4");
    h.network
        .set_edition(&old, EditionLookup::PermanentRedirect(moved.clone()));
    h.network
        .set_edition(&moved, EditionLookup::Latest(latest.clone()));
    let segment = h.network.publish_segment(4, 2, BLOCK, 5);
    h.network
        .set_node(&latest, ContentNode::Splitfile(Splitfile::simple(vec![segment])));
    let id = h.add(&old);

    let outcome = h.pass(id).await.unwrap();
    assert_eq!(outcome, PassOutcome::Finished { persistence: 100 });
    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.root, latest);
    // the mutable root itself is not a block
    assert_eq!(record.block_count, BlockCount::Known(6));
}

#[tokio::test]
async fn test_redirect_loop_fails_the_pass() {
    let h = Harness::new();
    let a = ContentKey::new("USK@a/site/1");
    let b = ContentKey::new("USK@b/site/1");
    h.network
        .set_edition(&a, EditionLookup::PermanentRedirect(b.clone()));
    h.network.set_edition(&b, EditionLookup::PermanentRedirect(a.clone()));
    let id = h.add(&a);

    assert!(matches!(h.pass(id).await, Err(Error::RedirectLoop(_))));
    assert_eq!(h.engine.metrics().stats().passes_failed, 1);
    assert_eq!(
        h.tracker().document(id).unwrap().block_count,
        BlockCount::Unknown
    );
}

#[tokio::test]
async fn test_unreachable_root_waits_for_manual_retry() {
    let h = Harness::new();
    let payload = b"published later".to_vec();
    let root = MemoryNetwork::key_for(&payload);
    let id = h.add(&root);

    assert!(matches!(
        h.pass(id).await,
        Err(Error::RootUnavailable { .. })
    ));
    assert_eq!(
        h.tracker().document(id).unwrap().block_count,
        BlockCount::Failed
    );

    h.network.publish(payload);
    assert_eq!(h.pass(id).await.unwrap(), PassOutcome::Skipped);

    h.tracker().retrigger(id).unwrap();
    let outcome = h.pass(id).await.unwrap();
    assert_eq!(outcome, PassOutcome::Finished { persistence: 100 });
    assert_eq!(
        h.tracker().document(id).unwrap().block_count,
        BlockCount::Known(1)
    );
}

#[tokio::test]
async fn test_insert_returning_other_key_is_a_failure() {
    let h = Harness::new();
    let root = h.network.publish_text("single block document");
    h.network
        .override_insert(&root, ContentKey::new("CHK@somewhere-else,1"));
    let id = h.add(&root);

    let outcome = h.pass(id).await.unwrap();
    // the block was fetchable, so it still counts as available
    assert_eq!(outcome, PassOutcome::Finished { persistence: 100 });
    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.availability, vec![false]);
    assert_eq!(h.engine.metrics().stats().blocks_insert_failed, 1);
    assert!(h.journal(id).contains("store returned CHK@somewhere-else,1"));
}

#[tokio::test]
async fn test_zero_time_slot_yields_before_first_segment() {
    let h = Harness::with(|settings| settings.engine.time_slot_secs = 0);
    let segment = h.network.publish_segment(4, 2, BLOCK, 6);
    let root = h.publish_document("slow site", vec![segment]);
    let id = h.add(&root);

    assert_eq!(h.pass(id).await.unwrap(), PassOutcome::Yielded);
    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.block_count, BlockCount::Known(7));
    assert_eq!(record.cursor, None);
    assert_eq!(h.engine.metrics().stats().passes_yielded, 1);
}

#[tokio::test]
async fn test_stop_leaves_current_segment_for_next_pass() {
    let h = Harness::new();
    let stuck = h.network.publish_segment(4, 2, BLOCK, 7);
    for key in keys(&stuck) {
        h.network.stall(&key);
    }
    let root = h.publish_document("stuck site", vec![stuck]);
    let id = h.add(&root);

    let (handle, signal) = stop_channel();
    let stopper = async {
        while h.engine.phase() != (PassPhase::Reinserting { segment: 1 }) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();
    };
    let (outcome, ()) = tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(h.engine.run_document(id, &signal), stopper)
    })
    .await
    .unwrap();

    assert_eq!(outcome.unwrap(), PassOutcome::Cancelled);
    let record = h.tracker().document(id).unwrap();
    assert_eq!(record.cursor, Some(0));
    assert_eq!(record.counters[1], SegmentCounters::default());
    assert!(!record.availability[1]);
    assert!(h.engine.metrics().stats().jobs_cancelled >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_ends_a_silent_pass() {
    let h = Harness::with(|settings| {
        settings.engine.idle_threshold_secs = 5;
        settings.engine.job_lifetime_secs = 1000;
    });
    let stuck = h.network.publish_segment(4, 2, BLOCK, 8);
    for key in keys(&stuck) {
        h.network.stall(&key);
    }
    let root = h.publish_document("silent site", vec![stuck]);
    let id = h.add(&root);

    match h.pass(id).await {
        Err(Error::Stalled { idle }) => assert!(idle > Duration::from_secs(5)),
        other => panic!("expected a stall, got {:?}", other),
    }
    assert_eq!(h.tracker().document(id).unwrap().cursor, Some(0));
}

#[tokio::test]
async fn test_engine_round_robins_documents() {
    let h = Harness::new();
    let first_segment = h.network.publish_segment(2, 1, BLOCK, 9);
    let second_segment = h.network.publish_segment(2, 1, BLOCK, 10);
    let first = h.publish_document("first site", vec![first_segment]);
    let second = h.publish_document("second site", vec![second_segment]);
    let a = h.add(&first);
    let b = h.add(&second);

    let (handle, signal) = stop_channel();
    let stopper = async {
        loop {
            let done = h
                .tracker()
                .documents()
                .iter()
                .all(|doc| !doc.history.is_empty());
            if done {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.stop();
    };
    tokio::time::timeout(Duration::from_secs(10), async {
        tokio::join!(h.engine.run(signal), stopper)
    })
    .await
    .unwrap();

    assert!(h.engine.metrics().stats().passes_finished >= 2);
    let active = h.tracker().active();
    assert!(active == Some(a) || active == Some(b));
}
