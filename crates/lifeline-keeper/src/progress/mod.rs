//! Durable per-document progress
//!
//! All persisted document state (registry, block counts, cursors, segment
//! counters, availability and history) is owned by [`ProgressTracker`] and
//! mutated under a single lock. Every mutation is saved before it returns.

mod history;
mod layout;
mod record;
mod root_cache;
mod store;
mod tracker;

pub use history::{HistoryEntry, PersistenceHistory};
pub use layout::StateLayout;
pub use record::{BlockCount, DocumentRecord, DocumentStats, SegmentCounters};
pub use root_cache::RootCache;
pub use store::{JsonStateStore, MemoryStateStore, PersistedState, StateStore};
pub use tracker::ProgressTracker;
