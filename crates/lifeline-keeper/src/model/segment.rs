//! Erasure-coded group of blocks

use crate::discovery::BlockEntry;
use crate::executor::JobReport;
use crate::model::Block;
use crate::progress::SegmentCounters;

/// Fetch results over a segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchTally {
    pub success: u32,
    pub failed: u32,
}

impl FetchTally {
    /// `success / (success + failed)`, 0 without attempts
    pub fn rate(&self) -> f64 {
        crate::healer::persistence_rate(self.success, self.failed)
    }

    /// Number of attempts
    pub fn attempts(&self) -> u32 {
        self.success + self.failed
    }
}

/// A segment of a document.
///
/// Data blocks come before check blocks and `size == data_count +
/// check_count` always holds. Once finished, the blocks are dropped but the
/// size stays available.
#[derive(Debug)]
pub struct Segment {
    id: u32,
    size: usize,
    data_count: usize,
    check_count: usize,
    complete: bool,
    blocks: Option<Vec<Block>>,
    counters: SegmentCounters,
    persistence_confirmed: bool,
    healing_impossible: bool,
}

impl Segment {
    /// Build a segment from its blocks
    pub fn new(id: u32, mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|block| (!block.is_data(), block.block_id()));
        let data_count = blocks.iter().filter(|block| block.is_data()).count();
        let check_count = blocks.len() - data_count;
        // Positions must be 0..size in order, or a duplicate took one away.
        let complete = blocks
            .iter()
            .enumerate()
            .all(|(position, block)| block.block_id() as usize == position);
        Self {
            id,
            size: blocks.len(),
            data_count,
            check_count,
            complete,
            blocks: Some(blocks),
            counters: SegmentCounters::default(),
            persistence_confirmed: false,
            healing_impossible: false,
        }
    }

    /// Build a segment from manifest entries
    pub fn from_entries(id: u32, entries: &[BlockEntry]) -> Self {
        Self::new(id, entries.iter().map(Block::from_entry).collect())
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of blocks, also after release
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn data_count(&self) -> usize {
        self.data_count
    }

    pub fn check_count(&self) -> usize {
        self.check_count
    }

    /// Whether every declared position is present
    pub fn has_complete_geometry(&self) -> bool {
        self.complete
    }

    /// Blocks; empty once released
    pub fn blocks(&self) -> &[Block] {
        self.blocks.as_deref().unwrap_or(&[])
    }

    /// Mutable blocks; empty once released
    pub fn blocks_mut(&mut self) -> &mut [Block] {
        self.blocks.as_deref_mut().unwrap_or(&mut [])
    }

    /// Data blocks
    pub fn data_blocks(&self) -> &[Block] {
        let blocks = self.blocks();
        &blocks[..self.data_count.min(blocks.len())]
    }

    /// Check blocks
    pub fn check_blocks(&self) -> &[Block] {
        let blocks = self.blocks();
        &blocks[self.data_count.min(blocks.len())..]
    }

    pub fn counters(&self) -> SegmentCounters {
        self.counters
    }

    pub fn persistence_confirmed(&self) -> bool {
        self.persistence_confirmed
    }

    pub fn healing_impossible(&self) -> bool {
        self.healing_impossible
    }

    /// Apply job reports to the matching blocks
    pub fn apply(&mut self, reports: &[JobReport]) {
        for report in reports {
            if report.segment_id != self.id {
                continue;
            }
            if let Some(block) = self
                .blocks_mut()
                .iter_mut()
                .find(|block| block.block_id() == report.block_id && *block.key() == report.key)
            {
                block.apply(report);
            }
        }
    }

    /// Fetch results of all blocks whose fetch completed
    pub fn fetch_tally(&self) -> FetchTally {
        let mut tally = FetchTally::default();
        for block in self.blocks() {
            if block.is_fetch_successful() {
                tally.success += 1;
            } else if block.is_fetch_done() {
                tally.failed += 1;
            }
        }
        tally
    }

    /// Record a healthy sample: counters are extrapolated from `rate`
    pub fn confirm_persistence(&mut self, rate: f64) {
        let success = ((rate * self.size as f64).round() as u32).min(self.size as u32);
        self.counters = SegmentCounters {
            success,
            failed: self.size as u32 - success,
        };
        self.persistence_confirmed = true;
    }

    /// Segment cannot be reconstructed; terminal for this pass
    pub fn mark_healing_impossible(&mut self) {
        self.healing_impossible = true;
    }

    /// Overwrite the counters
    pub fn set_counters(&mut self, counters: SegmentCounters) {
        self.counters = counters;
    }

    /// Whether the segment needs no further work in this pass
    pub fn is_finished(&self) -> bool {
        let Some(blocks) = &self.blocks else {
            return true;
        };
        if self.persistence_confirmed || self.healing_impossible {
            return true;
        }
        if self.size == 1 {
            return blocks[0].is_insert_done();
        }
        blocks.iter().all(Block::is_settled)
    }

    /// Whether the blocks were released
    pub fn is_released(&self) -> bool {
        self.blocks.is_none()
    }

    /// Check for completion and release all buffers once finished
    pub fn check_finished(&mut self) -> bool {
        if !self.is_finished() {
            return false;
        }
        if let Some(mut blocks) = self.blocks.take() {
            for block in &mut blocks {
                block.release();
            }
        }
        true
    }
}
