//! Segment geometry

use crate::{Error, Result};

/// Shape of an erasure-coded segment.
///
/// With `data` = k and `check` = m, any k of the k+m blocks are enough to
/// rebuild the data blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentGeometry {
    data: usize,
    check: usize,
}

impl SegmentGeometry {
    /// Maximum total block count supported by the codec
    pub const MAX_BLOCKS: usize = 32768;

    /// Create a new geometry
    ///
    /// # Constraints
    /// * `data` >= 1
    /// * `data + check` <= [`Self::MAX_BLOCKS`]
    pub fn new(data: usize, check: usize) -> Result<Self> {
        if data == 0 {
            return Err(Error::InvalidGeometry(
                "a segment needs at least one data block".into(),
            ));
        }

        let total = data + check;
        if total > Self::MAX_BLOCKS {
            return Err(Error::InvalidGeometry(format!(
                "total blocks ({}) exceeds maximum of {}",
                total,
                Self::MAX_BLOCKS
            )));
        }

        Ok(Self { data, check })
    }

    /// Number of data blocks
    pub fn data(&self) -> usize {
        self.data
    }

    /// Number of check blocks
    pub fn check(&self) -> usize {
        self.check
    }

    /// Total number of blocks
    pub fn total(&self) -> usize {
        self.data + self.check
    }

    /// Whether `available` blocks are enough to rebuild the data set
    pub fn is_recoverable(&self, available: usize) -> bool {
        available >= self.data
    }
}
