//! Lifeline keeper: keeps documents alive in a decaying content-addressed store
//!
//! A document is a tree of references whose leaves are immutable blocks
//! grouped into erasure-coded segments. The keeper periodically walks each
//! document, samples every segment for availability, heals segments that
//! fell below tolerance and reinserts the blocks that went missing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Reinsertion Engine                       │
//! │  round-robin over documents, one document at a time      │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌──────────────┐   ┌───────────────┐   │
//! │  │ Discovery  │──▶│  per-segment │──▶│ Job Executor  │   │
//! │  │  (walker / │   │ sample, heal │   │ (power-bound  │   │
//! │  │  manifest) │   │  reinsert    │   │ fetch/insert) │   │
//! │  └────────────┘   └──────┬───────┘   └───────┬───────┘   │
//! │                          │                   │           │
//! │                   ┌──────▼───────────────────▼───────┐   │
//! │                   │ Progress Tracker (cursor, stats) │   │
//! │                   └──────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod healer;
pub mod key;
pub mod memory;
pub mod model;
pub mod progress;
pub mod scheduler;
pub mod signal;

pub use client::{ArchiveKind, ClientError, ContentClient, EditionLookup, InsertPriority};
pub use discovery::{BlockEntry, BlockIndex, ContentNode, ManifestStore, Splitfile, SplitfileSegment};
pub use error::{Error, Result};
pub use executor::{Job, JobExecutor, JobKind, JobOutcome, JobReport};
pub use key::{ContentKey, DocumentId};
pub use model::{Block, BlockStatus, Segment};
pub use progress::{
    BlockCount, DocumentRecord, DocumentStats, JsonStateStore, MemoryStateStore,
    PersistenceHistory, ProgressTracker, RootCache, SegmentCounters, StateLayout, StateStore,
};
pub use scheduler::{
    EngineHandle, EngineMetrics, EngineSettings, EngineStats, EngineStatus, PassOutcome,
    PassPhase, ReinsertionEngine,
};
pub use signal::{stop_channel, Heartbeat, StopHandle, StopSignal};
