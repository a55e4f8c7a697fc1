//! In-memory block and segment model
//!
//! Rebuilt every pass from the manifest; only document-level progress
//! survives a restart.

mod block;
mod segment;

pub use block::{Block, BlockStatus};
pub use segment::{FetchTally, Segment};
