//! Segment healing
//!
//! Rebuilds missing blocks of a degraded segment from the ones that are
//! still retrievable:
//!
//! ```text
//!  fetched ─┐                 ┌─ decode: missing data ◀─ present data+check
//!  missing ─┴▶ fixed buffers ─┤
//!           (zero-filled)     └─ encode: missing check ◀─ full data set
//! ```
//!
//! Buffers are written back into the blocks only after both steps
//! succeed. A rebuilt block whose key records a shorter payload is cut
//! back to that length, so its reinsert lands on the same key.

mod sampler;

pub use sampler::{persistence_rate, sample_size, select_sample, verdict, Verdict};

use bytes::Bytes;
use lifeline_ec::SegmentCodec;

use crate::error::{Error, Result};
use crate::key::ContentKey;
use crate::model::{Block, Segment};

/// Buffer for one block: its payload padded to `block_size`, or zeros
fn block_buffer(block: &Block, block_size: usize) -> Result<(Vec<u8>, bool)> {
    match block.payload() {
        Some(payload) if block.is_fetch_successful() => {
            if payload.len() > block_size {
                return Err(Error::HealingImpossible {
                    segment: block.segment_id(),
                    reason: format!(
                        "block {} is {} bytes, larger than {}",
                        block.block_id(),
                        payload.len(),
                        block_size
                    ),
                });
            }
            let mut buffer = payload.to_vec();
            buffer.resize(block_size, 0);
            Ok((buffer, true))
        }
        _ => Ok((vec![0u8; block_size], false)),
    }
}

/// Reconstruct every block of `segment` that was not fetched.
///
/// `payload_len` gives the unpadded length a key stands for, when known.
/// Returns the number of blocks whose content was rebuilt.
pub fn heal_segment(
    segment: &mut Segment,
    codec: &dyn SegmentCodec,
    block_size: usize,
    payload_len: impl Fn(&ContentKey) -> Option<usize>,
) -> Result<usize> {
    if !segment.has_complete_geometry() {
        return Err(Error::HealingImpossible {
            segment: segment.id(),
            reason: "block positions missing from the segment".into(),
        });
    }

    let mut data = Vec::with_capacity(segment.data_count());
    let mut data_present = Vec::with_capacity(segment.data_count());
    for block in segment.data_blocks() {
        let (buffer, present) = block_buffer(block, block_size)?;
        data.push(buffer);
        data_present.push(present);
    }

    let mut check = Vec::with_capacity(segment.check_count());
    let mut check_present = Vec::with_capacity(segment.check_count());
    for block in segment.check_blocks() {
        let (buffer, present) = block_buffer(block, block_size)?;
        check.push(buffer);
        check_present.push(present);
    }

    let segment_id = segment.id();
    let to_healing_error = |e: lifeline_ec::Error| Error::HealingImpossible {
        segment: segment_id,
        reason: e.to_string(),
    };
    codec
        .decode(&mut data, &mut check, &data_present, &check_present, block_size)
        .map_err(to_healing_error)?;
    codec
        .encode(&data, &mut check, &check_present, block_size)
        .map_err(to_healing_error)?;

    let mut rebuilt = 0;
    let buffers = data.into_iter().chain(check);
    for (block, mut buffer) in segment.blocks_mut().iter_mut().zip(buffers) {
        if block.is_fetch_successful() {
            continue;
        }
        if let Some(len) = payload_len(block.key()) {
            buffer.truncate(len);
        }
        block.set_payload(Bytes::from(buffer));
        rebuilt += 1;
    }
    Ok(rebuilt)
}
