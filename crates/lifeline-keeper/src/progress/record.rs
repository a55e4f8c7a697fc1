//! Persisted per-document record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::history::PersistenceHistory;
use crate::key::{ContentKey, DocumentId};

/// Discovery status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "blocks", rename_all = "snake_case")]
pub enum BlockCount {
    /// Not discovered yet
    Unknown,
    /// Root could not be fetched; waits for a manual retry
    Failed,
    /// Discovered this many blocks (possibly zero)
    Known(usize),
}

impl BlockCount {
    /// Block count if known
    pub fn known(&self) -> Option<usize> {
        match self {
            BlockCount::Known(count) => Some(*count),
            _ => None,
        }
    }
}

/// Fetch/insert successes and failures of one segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentCounters {
    pub success: u32,
    pub failed: u32,
}

/// Everything persisted about a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub root: ContentKey,
    pub block_count: BlockCount,
    /// Highest segment finished in the current pass, `None` before the first
    pub cursor: Option<u32>,
    #[serde(default)]
    pub counters: Vec<SegmentCounters>,
    /// Availability per segment, stored as a string of `0`/`1`
    #[serde(default, with = "bitmap")]
    pub availability: Vec<bool>,
    #[serde(default)]
    pub history: PersistenceHistory,
    /// Last time the root block was checked
    #[serde(default)]
    pub root_checked_at: Option<DateTime<Utc>>,
}

/// Summary numbers for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentStats {
    pub blocks: Option<usize>,
    pub available: u32,
    pub missing: u32,
    pub persistence_percent: f64,
    pub segments: usize,
    pub available_segments: usize,
    pub segment_availability_percent: f64,
}

impl DocumentRecord {
    /// Fresh, undiscovered document
    pub fn new(id: DocumentId, root: ContentKey) -> Self {
        Self {
            id,
            root,
            block_count: BlockCount::Unknown,
            cursor: None,
            counters: Vec::new(),
            availability: Vec::new(),
            history: PersistenceHistory::new(),
            root_checked_at: None,
        }
    }

    /// Forget everything learnt about the current root
    pub fn invalidate(&mut self) {
        self.block_count = BlockCount::Unknown;
        self.cursor = None;
        self.counters.clear();
        self.availability.clear();
        self.root_checked_at = None;
    }

    /// Sum of successes over all segments
    pub fn total_success(&self) -> u32 {
        self.counters.iter().map(|c| c.success).sum()
    }

    /// Sum of failures over all segments
    pub fn total_failed(&self) -> u32 {
        self.counters.iter().map(|c| c.failed).sum()
    }

    /// Available blocks as a percentage of all blocks, capped at 100
    pub fn persistence_percent(&self) -> u8 {
        match self.block_count {
            BlockCount::Known(blocks) if blocks > 0 => {
                let percent = u64::from(self.total_success()) * 100 / blocks as u64;
                percent.min(100) as u8
            }
            _ => 0,
        }
    }

    /// Reporting summary
    pub fn stats(&self) -> DocumentStats {
        let available = self.total_success();
        let missing = self.total_failed();
        let segments = self.availability.len();
        let available_segments = self.availability.iter().filter(|a| **a).count();
        let percent = |part: f64, whole: f64| if whole > 0.0 { part * 100.0 / whole } else { 0.0 };
        DocumentStats {
            blocks: self.block_count.known(),
            available,
            missing,
            persistence_percent: percent(
                f64::from(available),
                self.block_count.known().unwrap_or(0) as f64,
            ),
            segments,
            available_segments,
            segment_availability_percent: percent(available_segments as f64, segments as f64),
        }
    }
}

mod bitmap {
    use super::*;

    pub fn serialize<S: Serializer>(bits: &[bool], serializer: S) -> Result<S::Ok, S::Error> {
        let text: String = bits.iter().map(|bit| if *bit { '1' } else { '0' }).collect();
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<bool>, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.chars()
            .map(|c| match c {
                '1' => Ok(true),
                '0' => Ok(false),
                other => Err(serde::de::Error::custom(format!(
                    "unexpected bitmap character {other:?}"
                ))),
            })
            .collect()
    }
}
