//! In-process content network
//!
//! A [`ContentClient`] backed by hash maps. Keys of published data are
//! derived from the payload, so an insert of wrong content comes back under
//! a different key exactly like a real content-addressed store. Used by the
//! test suites and for dry runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lifeline_ec::{ReedSolomonCodec, SegmentCodec};
use parking_lot::Mutex;

use crate::client::{ArchiveKind, ClientError, ContentClient, EditionLookup, InsertPriority};
use crate::discovery::{ContentNode, Splitfile, SplitfileSegment};
use crate::key::ContentKey;

const CONTENT_PREFIX: &str = "CHK@";
const MUTABLE_PREFIX: &str = "USK@";

#[derive(Default)]
struct NetworkState {
    blocks: HashMap<ContentKey, Bytes>,
    nodes: HashMap<ContentKey, ContentNode>,
    archive_nodes: HashMap<(ContentKey, String), ContentNode>,
    nested: HashMap<ContentKey, ContentNode>,
    editions: HashMap<ContentKey, EditionLookup>,
    insert_overrides: HashMap<ContentKey, ContentKey>,
    rejected: HashSet<ContentKey>,
    stalled: HashSet<ContentKey>,
    delays: HashMap<ContentKey, Duration>,
    fetches: HashMap<ContentKey, usize>,
    inserts: Vec<(ContentKey, InsertPriority)>,
    node_fetches: usize,
}

/// In-memory content network
#[derive(Default)]
pub struct MemoryNetwork {
    state: Mutex<NetworkState>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

struct InFlight<'a> {
    network: &'a MemoryNetwork,
}

impl<'a> InFlight<'a> {
    fn enter(network: &'a MemoryNetwork) -> Self {
        let now = network.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        network.peak.fetch_max(now, Ordering::SeqCst);
        Self { network }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.network.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryNetwork {
    /// Empty network
    pub fn new() -> Self {
        Self::default()
    }

    /// Content key derived from a payload (FNV-1a, 64 bit)
    pub fn key_for(payload: &[u8]) -> ContentKey {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in payload {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        ContentKey::new(format!("{}{:016x},{}", CONTENT_PREFIX, hash, payload.len()))
    }

    /// Delay applied to every store operation
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Publish a payload; returns its key
    pub fn publish(&self, payload: impl Into<Bytes>) -> ContentKey {
        let payload = payload.into();
        let key = Self::key_for(&payload);
        self.state.lock().blocks.insert(key.clone(), payload);
        key
    }

    /// Publish a text payload
    pub fn publish_text(&self, text: &str) -> ContentKey {
        self.publish(Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Publish an erasure-coded segment of `data` + `check` blocks of
    /// `block_size` bytes each; `seed` varies the content.
    ///
    /// # Panics
    ///
    /// When the codec rejects the geometry (no data blocks, an odd block
    /// size, or more blocks than the codec supports).
    pub fn publish_segment(
        &self,
        data: usize,
        check: usize,
        block_size: usize,
        seed: u8,
    ) -> SplitfileSegment {
        self.publish_short_segment(data, check, block_size, block_size, seed)
    }

    /// Like [`publish_segment`](Self::publish_segment), but the last data
    /// block only holds `tail` bytes. Check blocks cover it zero-padded.
    pub fn publish_short_segment(
        &self,
        data: usize,
        check: usize,
        block_size: usize,
        tail: usize,
        seed: u8,
    ) -> SplitfileSegment {
        let data_blocks: Vec<Vec<u8>> = (0..data)
            .map(|i| {
                (0..block_size)
                    .map(|j| (i as u8).wrapping_mul(31) ^ (j as u8).wrapping_mul(7) ^ seed)
                    .enumerate()
                    .map(|(j, byte)| if i + 1 == data && j >= tail { 0 } else { byte })
                    .collect()
            })
            .collect();
        let mut check_blocks = vec![vec![0u8; block_size]; check];
        if check > 0 {
            ReedSolomonCodec::new()
                .encode(&data_blocks, &mut check_blocks, &vec![false; check], block_size)
                .expect("valid geometry");
        }
        let last = data.saturating_sub(1);
        SplitfileSegment::new(
            data_blocks
                .into_iter()
                .enumerate()
                .map(|(i, mut block)| {
                    if i == last {
                        block.truncate(tail);
                    }
                    self.publish(block)
                })
                .collect(),
            check_blocks.into_iter().map(|b| self.publish(b)).collect(),
        )
    }

    /// Make a key unavailable
    pub fn remove(&self, key: &ContentKey) -> Option<Bytes> {
        self.state.lock().blocks.remove(key)
    }

    /// Whether a key is currently retrievable
    pub fn contains(&self, key: &ContentKey) -> bool {
        self.state.lock().blocks.contains_key(key)
    }

    /// Attach decoded metadata to a key
    pub fn set_node(&self, key: &ContentKey, node: ContentNode) {
        self.state.lock().nodes.insert(key.clone(), node);
    }

    /// Attach a sub-manifest inside an archive container
    pub fn set_archive_node(&self, container: &ContentKey, internal_name: &str, node: ContentNode) {
        self.state
            .lock()
            .archive_nodes
            .insert((container.clone(), internal_name.to_string()), node);
    }

    /// Metadata carried by a nested splitfile, addressed by its first data key
    pub fn set_nested(&self, first_data_key: &ContentKey, node: ContentNode) {
        self.state.lock().nested.insert(first_data_key.clone(), node);
    }

    /// Answer for edition lookups of `reference`
    pub fn set_edition(&self, reference: &ContentKey, lookup: EditionLookup) {
        self.state.lock().editions.insert(reference.clone(), lookup);
    }

    /// Inserts of `key` report `returned` instead of the derived key
    pub fn override_insert(&self, key: &ContentKey, returned: ContentKey) {
        self.state.lock().insert_overrides.insert(key.clone(), returned);
    }

    /// Inserts of `key` are refused
    pub fn reject_inserts(&self, key: &ContentKey) {
        self.state.lock().rejected.insert(key.clone());
    }

    /// Extra delay for every operation on `key`
    pub fn set_delay(&self, key: &ContentKey, delay: Duration) {
        self.state.lock().delays.insert(key.clone(), delay);
    }

    /// Operations on `key` never complete
    pub fn stall(&self, key: &ContentKey) {
        self.state.lock().stalled.insert(key.clone());
    }

    /// Number of data fetches of `key`
    pub fn fetch_count(&self, key: &ContentKey) -> usize {
        self.state.lock().fetches.get(key).copied().unwrap_or(0)
    }

    /// Number of metadata fetches
    pub fn node_fetches(&self) -> usize {
        self.state.lock().node_fetches
    }

    /// Keys passed to `insert`, in call order
    pub fn inserts(&self) -> Vec<(ContentKey, InsertPriority)> {
        self.state.lock().inserts.clone()
    }

    /// Highest number of concurrent operations seen
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn delay(&self, key: &ContentKey) {
        let (stalled, extra) = {
            let state = self.state.lock();
            (state.stalled.contains(key), state.delays.get(key).copied())
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        let latency = *self.latency.lock() + extra.unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ContentClient for MemoryNetwork {
    async fn fetch(&self, key: &ContentKey, _ignore_local_cache: bool) -> Result<Bytes, ClientError> {
        let _guard = InFlight::enter(self);
        self.delay(key).await;
        let mut state = self.state.lock();
        *state.fetches.entry(key.clone()).or_default() += 1;
        state
            .blocks
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(key.clone()))
    }

    async fn insert(
        &self,
        key: &ContentKey,
        payload: Bytes,
        priority: InsertPriority,
    ) -> Result<ContentKey, ClientError> {
        let _guard = InFlight::enter(self);
        self.delay(key).await;
        let mut state = self.state.lock();
        state.inserts.push((key.clone(), priority));
        if state.rejected.contains(key) {
            return Err(ClientError::Rejected(format!("{} refused", key)));
        }
        let derived = Self::key_for(&payload);
        state.blocks.insert(derived.clone(), payload);
        Ok(state.insert_overrides.get(key).cloned().unwrap_or(derived))
    }

    async fn resolve_latest_edition(&self, reference: &ContentKey) -> Result<EditionLookup, ClientError> {
        Ok(self
            .state
            .lock()
            .editions
            .get(reference)
            .cloned()
            .unwrap_or_else(|| EditionLookup::Latest(reference.clone())))
    }

    async fn fetch_node(&self, key: &ContentKey) -> Result<Option<ContentNode>, ClientError> {
        self.delay(key).await;
        let mut state = self.state.lock();
        state.node_fetches += 1;
        match state.nodes.get(key) {
            Some(node) => Ok(Some(node.clone())),
            None if state.blocks.contains_key(key) => Ok(None),
            None => Err(ClientError::NotFound(key.clone())),
        }
    }

    async fn fetch_archive_node(
        &self,
        container: &ContentKey,
        _kind: ArchiveKind,
        internal_name: &str,
    ) -> Result<Option<ContentNode>, ClientError> {
        let state = self.state.lock();
        Ok(state
            .archive_nodes
            .get(&(container.clone(), internal_name.to_string()))
            .cloned())
    }

    async fn fetch_and_decode_splitfile_descriptor(
        &self,
        splitfile: &Splitfile,
    ) -> Result<ContentNode, ClientError> {
        let first = splitfile
            .segments
            .first()
            .and_then(|segment| segment.data.first())
            .ok_or_else(|| ClientError::Decode("splitfile has no data blocks".into()))?;
        self.delay(first).await;
        self.state
            .lock()
            .nested
            .get(first)
            .cloned()
            .ok_or_else(|| ClientError::Decode(format!("no metadata behind {}", first)))
    }

    fn normalize_key(&self, reference: &ContentKey) -> ContentKey {
        reference.canonical()
    }

    fn is_content_addressed(&self, reference: &ContentKey) -> bool {
        reference.as_str().starts_with(CONTENT_PREFIX)
    }

    fn is_mutable(&self, reference: &ContentKey) -> bool {
        reference.as_str().starts_with(MUTABLE_PREFIX)
    }

    fn payload_len(&self, key: &ContentKey) -> Option<usize> {
        key.as_str()
            .strip_prefix(CONTENT_PREFIX)?
            .rsplit_once(',')?
            .1
            .parse()
            .ok()
    }
}
