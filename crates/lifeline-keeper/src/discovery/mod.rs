//! Content discovery
//!
//! Walks a document's reference tree depth first and enumerates every
//! immutable block, assigning segment ids in discovery order.
//!
//! ```text
//!  root ──▶ manifest ──┬─▶ "index.html"  splitfile ──▶ seg 1, seg 2 …
//!                      ├─▶ "img/"        archive manifest ──▶ …
//!                      └─▶ "other"       redirect ──▶ next root (queued)
//! ```
//!
//! Only content-addressed keys become blocks. Mutable references are
//! followed but not registered. Re-observed keys are ignored.

mod manifest;
mod node;

pub use manifest::{BlockEntry, BlockIndex, ManifestStore};
pub use node::{ContentNode, Splitfile, SplitfileSegment};

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use lifeline_telemetry::DocumentJournal;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::client::ContentClient;
use crate::error::{Error, Result};
use crate::key::ContentKey;
use crate::signal::{Heartbeat, StopSignal};

/// How often a pending splitfile decode re-checks the stop signal
const DESCRIPTOR_POLL: Duration = Duration::from_millis(100);

/// Outcome of a walk
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Every registered block
    pub index: BlockIndex,
    /// Raw payload of the root key, when it could be fetched as data
    pub root_payload: Option<Bytes>,
    /// False when some sub-tree below the root could not be read
    pub complete: bool,
}

/// Hands out segment ids on first use so ids stay contiguous
#[derive(Debug, Default)]
struct SegmentAllocator {
    next: u32,
    current: Option<u32>,
    open_new: bool,
}

impl SegmentAllocator {
    /// The next registered block starts a new segment
    fn begin(&mut self) {
        self.open_new = true;
    }

    fn assign(&mut self) -> u32 {
        match self.current {
            Some(id) if !self.open_new => id,
            _ => {
                let id = self.next;
                self.next += 1;
                self.current = Some(id);
                self.open_new = false;
                id
            }
        }
    }
}

struct Visit {
    node: ContentNode,
    container: ContentKey,
    name: Option<String>,
    depth: usize,
}

/// Depth-first walker over one document
pub struct Walker<'a> {
    client: &'a dyn ContentClient,
    journal: &'a DocumentJournal,
    stop: &'a StopSignal,
    heartbeat: &'a Heartbeat,
    index: BlockIndex,
    segments: SegmentAllocator,
    roots: VecDeque<ContentKey>,
    seen_roots: HashSet<ContentKey>,
    complete: bool,
}

impl<'a> Walker<'a> {
    /// Create a walker
    pub fn new(
        client: &'a dyn ContentClient,
        journal: &'a DocumentJournal,
        stop: &'a StopSignal,
        heartbeat: &'a Heartbeat,
    ) -> Self {
        Self {
            client,
            journal,
            stop,
            heartbeat,
            index: BlockIndex::new(),
            segments: SegmentAllocator::default(),
            roots: VecDeque::new(),
            seen_roots: HashSet::new(),
            complete: true,
        }
    }

    /// Enumerate all blocks reachable from `root`.
    ///
    /// Fails with [`Error::RootUnavailable`] only when `root` itself cannot
    /// be fetched. Anything below it (sub-manifests, nested splitfiles,
    /// redirect targets) is best effort: the failure is journaled, that
    /// sub-tree is skipped and the result is marked incomplete.
    pub async fn walk(mut self, root: &ContentKey) -> Result<Discovery> {
        let root = self.client.normalize_key(root);
        self.journal.note(None, 0, format!("discovering {}", root));

        // The root may hold plain data, so a failed metadata decode is not fatal.
        let root_payload = match self.until_stopped(self.client.fetch(&root, false)).await? {
            Ok(payload) => Some(payload),
            Err(e) if self.client.is_content_addressed(&root) => {
                self.journal.fail(None, 0, format!("root fetch failed: {}", e));
                return Err(Error::RootUnavailable {
                    key: root,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                debug!(root = %root, error = %e, "Mutable root has no direct payload");
                None
            }
        };
        self.heartbeat.touch();

        self.seen_roots.insert(root.clone());
        let node = match self.fetch_root_node(&root).await {
            Ok(node) => node,
            Err(Error::Client(e)) => {
                self.journal.fail(None, 0, format!("root metadata unavailable: {}", e));
                return Err(Error::RootUnavailable {
                    key: root,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        self.walk_tree(&root, node).await?;

        while let Some(next) = self.roots.pop_front() {
            match self.fetch_root_node(&next).await {
                Ok(node) => self.walk_tree(&next, node).await?,
                Err(Error::Client(e)) => {
                    warn!(root = %next, error = %e, "Redirect target unavailable");
                    self.skip_subtree(0, format!("redirect target {} unavailable: {}", next, e));
                }
                Err(e) => return Err(e),
            }
        }

        self.journal.note(
            None,
            0,
            format!(
                "discovery finished: {} blocks in {} segments{}",
                self.index.len(),
                self.index.segment_count(),
                if self.complete { "" } else { " (incomplete)" }
            ),
        );
        Ok(Discovery {
            index: self.index,
            root_payload,
            complete: self.complete,
        })
    }

    // =========================================================================
    // Internal methods
    // =========================================================================

    async fn fetch_root_node(&mut self, root: &ContentKey) -> Result<Option<ContentNode>> {
        self.check_stop()?;
        self.journal.progress(None, 0, format!("root {}", root));
        self.register_single(root, 0);

        let node = self.until_stopped(self.client.fetch_node(root)).await??;
        self.heartbeat.touch();
        Ok(node)
    }

    async fn walk_tree(&mut self, root: &ContentKey, node: Option<ContentNode>) -> Result<()> {
        let Some(node) = node else {
            self.journal.detail(None, 1, "plain data, no metadata");
            return Ok(());
        };

        let mut stack = vec![Visit {
            node,
            container: root.clone(),
            name: None,
            depth: 1,
        }];
        while let Some(visit) = stack.pop() {
            self.check_stop()?;
            self.visit(visit, &mut stack).await?;
        }
        Ok(())
    }

    /// Journal an unreadable sub-tree and carry on without it
    fn skip_subtree(&mut self, depth: usize, message: String) {
        self.journal.fail(None, depth, message);
        self.complete = false;
    }

    async fn visit(&mut self, visit: Visit, stack: &mut Vec<Visit>) -> Result<()> {
        let Visit {
            node,
            container,
            name,
            depth,
        } = visit;
        let label = name.as_deref().unwrap_or("<default>");
        self.journal
            .detail(None, depth, format!("{} ({})", label, node.kind()));

        match node {
            ContentNode::Manifest { entries } => {
                for (child_name, child) in entries.into_iter().rev() {
                    stack.push(Visit {
                        node: child,
                        container: container.clone(),
                        name: Some(child_name),
                        depth: depth + 1,
                    });
                }
            }
            ContentNode::ArchiveManifest {
                kind,
                internal_name,
            } => {
                let inner = self
                    .until_stopped(self.client.fetch_archive_node(&container, kind, &internal_name))
                    .await?;
                self.heartbeat.touch();
                match inner {
                    Ok(Some(inner)) => stack.push(Visit {
                        node: inner,
                        container,
                        name,
                        depth,
                    }),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            container = %container,
                            entry = %internal_name,
                            error = %e,
                            "Archive manifest unavailable"
                        );
                        self.skip_subtree(
                            depth,
                            format!("{} in {} unavailable: {}", internal_name, container, e),
                        );
                    }
                }
            }
            ContentNode::ArchiveInternal { name: entry } => {
                self.journal
                    .detail(None, depth + 1, format!("stored in container as {}", entry));
            }
            ContentNode::Redirect { target } => {
                let target = self.client.normalize_key(&target);
                self.register_single(&target, depth + 1);
                if self.seen_roots.insert(target.clone()) {
                    self.roots.push_back(target);
                }
            }
            ContentNode::Splitfile(splitfile) => {
                for segment in &splitfile.segments {
                    self.segments.begin();
                    for (position, (key, is_data)) in segment.keys().enumerate() {
                        self.register(key, position as u32, is_data, depth + 1);
                    }
                }
                if splitfile.nested {
                    match self.decode_nested(&splitfile).await {
                        Ok(inner) => stack.push(Visit {
                            node: inner,
                            container,
                            name,
                            depth: depth + 1,
                        }),
                        Err(Error::Client(e)) => {
                            warn!(container = %container, error = %e, "Nested metadata cannot be fetched");
                            self.skip_subtree(
                                depth + 1,
                                format!("nested metadata cannot be fetched: {}", e),
                            );
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }

    async fn decode_nested(&self, splitfile: &Splitfile) -> Result<ContentNode> {
        let decode = self.client.fetch_and_decode_splitfile_descriptor(splitfile);
        tokio::pin!(decode);
        let mut ticker = interval(DESCRIPTOR_POLL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                result = &mut decode => {
                    self.heartbeat.touch();
                    return result.map_err(Error::from);
                }
                _ = ticker.tick() => self.check_stop()?,
            }
        }
    }

    fn register_single(&mut self, key: &ContentKey, depth: usize) {
        self.segments.begin();
        self.register(key, 0, true, depth);
    }

    fn register(&mut self, key: &ContentKey, block_id: u32, is_data: bool, depth: usize) {
        let key = self.client.normalize_key(key);
        if !self.client.is_content_addressed(&key) {
            self.journal
                .detail(None, depth, format!("{} is mutable, not reinsertable", key));
            return;
        }
        if self.index.contains(&key) {
            self.journal.detail(None, depth, format!("{} already known", key));
            return;
        }
        let segment_id = self.segments.assign();
        self.journal.detail(
            Some(segment_id),
            depth,
            format!("block {} {}", block_id, key),
        );
        self.index.insert(BlockEntry {
            key,
            segment_id,
            block_id,
            is_data,
        });
    }

    /// Await a store call unless the stop signal fires first
    async fn until_stopped<T>(&self, call: impl Future<Output = T>) -> Result<T> {
        tokio::select! {
            value = call => Ok(value),
            _ = self.stop.stopped() => Err(Error::Cancelled),
        }
    }

    fn check_stop(&self) -> Result<()> {
        if self.stop.is_stopped() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}
