//! Codec trait

use crate::Result;

/// Erasure codec operating on a single segment.
///
/// Buffers are fixed-size (`block_size` bytes each). Buffers flagged as
/// absent hold placeholder content and are overwritten on success.
/// Implementations must leave buffers untouched when they return an error.
pub trait SegmentCodec: Send + Sync {
    /// Rebuild every absent data buffer from the present data and check
    /// buffers.
    fn decode(
        &self,
        data: &mut [Vec<u8>],
        check: &mut [Vec<u8>],
        data_present: &[bool],
        check_present: &[bool],
        block_size: usize,
    ) -> Result<()>;

    /// Regenerate every absent check buffer from a complete data set.
    fn encode(
        &self,
        data: &[Vec<u8>],
        check: &mut [Vec<u8>],
        check_present: &[bool],
        block_size: usize,
    ) -> Result<()>;
}
