//! Single owner of persisted document state

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::record::{BlockCount, DocumentRecord, SegmentCounters};
use super::store::{PersistedState, StateStore};
use crate::error::{Error, Result};
use crate::key::{ContentKey, DocumentId};

/// Registry and progress of all documents.
///
/// Each write is applied to a copy of the state, saved, and only then made
/// visible, so a failed save leaves the previous state in place.
pub struct ProgressTracker {
    store: Arc<dyn StateStore>,
    state: Mutex<PersistedState>,
}

impl ProgressTracker {
    /// Load the tracker from `store`
    pub fn open(store: Arc<dyn StateStore>) -> Result<Self> {
        let state = store.load()?;
        debug!(documents = state.documents.len(), "Loaded progress state");
        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Register a document under the canonical form of `root`; rejects a
    /// root that is already tracked
    pub fn add_document(&self, root: ContentKey) -> Result<DocumentId> {
        let root = root.canonical();
        let id = self.update(|state| {
            if state.documents.iter().any(|doc| doc.root.canonical() == root) {
                return Err(Error::DuplicateDocument(root.clone()));
            }
            let id = DocumentId(state.next_id);
            state.next_id += 1;
            state.documents.push(DocumentRecord::new(id, root.clone()));
            Ok(id)
        })?;
        info!(document = %id, root = %root, "Document added");
        Ok(id)
    }

    /// Unregister a document and return its last record
    pub fn remove_document(&self, id: DocumentId) -> Result<DocumentRecord> {
        let record = self.update(|state| {
            let position = state
                .documents
                .iter()
                .position(|doc| doc.id == id)
                .ok_or(Error::DocumentNotFound(id))?;
            if state.active == Some(id) {
                state.active = None;
            }
            Ok(state.documents.remove(position))
        })?;
        info!(document = %id, "Document removed");
        Ok(record)
    }

    /// Id of the document tracking `root`
    pub fn find_by_root(&self, root: &ContentKey) -> Option<DocumentId> {
        let root = root.canonical();
        self.state
            .lock()
            .documents
            .iter()
            .find(|doc| doc.root.canonical() == root)
            .map(|doc| doc.id)
    }

    pub fn document(&self, id: DocumentId) -> Result<DocumentRecord> {
        self.state
            .lock()
            .documents
            .iter()
            .find(|doc| doc.id == id)
            .cloned()
            .ok_or(Error::DocumentNotFound(id))
    }

    /// All documents in registration order
    pub fn documents(&self) -> Vec<DocumentRecord> {
        self.state.lock().documents.clone()
    }

    pub fn document_ids(&self) -> Vec<DocumentId> {
        self.state.lock().documents.iter().map(|doc| doc.id).collect()
    }

    /// Remember which document the engine is working on
    pub fn set_active(&self, id: Option<DocumentId>) -> Result<()> {
        self.update(|state| {
            state.active = id;
            Ok(())
        })
    }

    pub fn active(&self) -> Option<DocumentId> {
        self.state.lock().active
    }

    /// Forget discovery results so the next pass rediscovers the document.
    ///
    /// This is the only way out of [`BlockCount::Failed`].
    pub fn retrigger(&self, id: DocumentId) -> Result<()> {
        self.modify(id, |doc| {
            doc.invalidate();
            Ok(())
        })?;
        info!(document = %id, "Discovery re-triggered");
        Ok(())
    }

    pub fn clear_history(&self, id: DocumentId) -> Result<()> {
        self.modify(id, |doc| {
            doc.history.clear();
            Ok(())
        })
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Replace the root and drop everything learnt from the old one
    pub fn set_root(&self, id: DocumentId, root: ContentKey) -> Result<()> {
        self.modify(id, |doc| {
            if doc.root != root {
                doc.root = root;
                doc.invalidate();
            }
            Ok(())
        })
    }

    pub fn set_block_count(&self, id: DocumentId, count: BlockCount) -> Result<()> {
        self.modify(id, |doc| {
            doc.block_count = count;
            Ok(())
        })
    }

    pub fn mark_root_checked(&self, id: DocumentId, at: DateTime<Utc>) -> Result<()> {
        self.modify(id, |doc| {
            doc.root_checked_at = Some(at);
            Ok(())
        })
    }

    // =========================================================================
    // Pass bookkeeping
    // =========================================================================

    /// Prepare counters for a pass over segments `0..=max_segment`.
    ///
    /// A cursor already at (or past) `max_segment` means the previous pass
    /// completed, so everything is reset. Otherwise the pass resumes after
    /// the cursor and only unfinished segments are zeroed. Returns the first
    /// segment to process.
    pub fn prepare_pass(&self, id: DocumentId, max_segment: u32) -> Result<u32> {
        let segments = max_segment as usize + 1;
        self.modify(id, |doc| {
            let resume = match doc.cursor {
                Some(cursor) if cursor >= max_segment => None,
                other => other,
            };
            let start = resume.map_or(0, |cursor| cursor + 1);
            doc.cursor = resume;
            doc.counters.resize(segments, SegmentCounters::default());
            doc.availability.resize(segments, false);
            for segment in start as usize..segments {
                doc.counters[segment] = SegmentCounters::default();
                doc.availability[segment] = false;
            }
            Ok(start)
        })
    }

    /// Store the outcome of one segment
    pub fn record_segment(
        &self,
        id: DocumentId,
        segment: u32,
        counters: SegmentCounters,
        available: bool,
    ) -> Result<()> {
        let index = segment as usize;
        self.modify(id, |doc| {
            if index >= doc.counters.len() {
                doc.counters.resize(index + 1, SegmentCounters::default());
            }
            if index >= doc.availability.len() {
                doc.availability.resize(index + 1, false);
            }
            doc.counters[index] = counters;
            doc.availability[index] = available;
            Ok(())
        })
    }

    /// Move the cursor forward to `cursor`.
    ///
    /// The cursor never moves backwards and never passes `max_segment`.
    pub fn advance_cursor(&self, id: DocumentId, cursor: u32, max_segment: u32) -> Result<Option<u32>> {
        if cursor > max_segment {
            return Err(Error::InvalidState(format!(
                "cursor {} beyond last segment {}",
                cursor, max_segment
            )));
        }
        self.modify(id, |doc| {
            if doc.cursor.map_or(true, |current| cursor > current) {
                doc.cursor = Some(cursor);
            }
            Ok(doc.cursor)
        })
    }

    /// Record this month's persistence, keeping the monthly minimum
    pub fn record_history(&self, id: DocumentId, persistence: u8) -> Result<()> {
        self.modify(id, |doc| {
            doc.history.record_now(persistence);
            Ok(())
        })
    }

    // =========================================================================
    // Internal methods
    // =========================================================================

    fn modify<T>(&self, id: DocumentId, f: impl FnOnce(&mut DocumentRecord) -> Result<T>) -> Result<T> {
        self.update(|state| {
            let doc = state
                .documents
                .iter_mut()
                .find(|doc| doc.id == id)
                .ok_or(Error::DocumentNotFound(id))?;
            f(doc)
        })
    }

    fn update<T>(&self, f: impl FnOnce(&mut PersistedState) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let value = f(&mut next)?;
        self.store.save(&next)?;
        *state = next;
        Ok(value)
    }
}
