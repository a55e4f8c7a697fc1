//! Reed-Solomon segment codec

use crate::{Error, Result, SegmentCodec, SegmentGeometry};
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};

/// [`SegmentCodec`] backed by `reed-solomon-simd`.
///
/// Check block `i` of a segment is recovery shard `i` of the Reed-Solomon
/// code over the segment's data blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReedSolomonCodec;

impl ReedSolomonCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

fn validate_buffers(buffers: &[Vec<u8>], flags: &[bool], block_size: usize) -> Result<()> {
    if buffers.len() != flags.len() {
        return Err(Error::PresenceMismatch {
            buffers: buffers.len(),
            flags: flags.len(),
        });
    }
    for buffer in buffers {
        if buffer.len() != block_size {
            return Err(Error::BlockSizeMismatch {
                expected: block_size,
                actual: buffer.len(),
            });
        }
    }
    Ok(())
}

fn validate_block_size(block_size: usize) -> Result<()> {
    if block_size == 0 || block_size % 2 != 0 {
        return Err(Error::InvalidBlockSize(block_size));
    }
    Ok(())
}

impl SegmentCodec for ReedSolomonCodec {
    fn decode(
        &self,
        data: &mut [Vec<u8>],
        check: &mut [Vec<u8>],
        data_present: &[bool],
        check_present: &[bool],
        block_size: usize,
    ) -> Result<()> {
        validate_block_size(block_size)?;
        validate_buffers(data, data_present, block_size)?;
        validate_buffers(check, check_present, block_size)?;
        let geometry = SegmentGeometry::new(data.len(), check.len())?;

        if data_present.iter().all(|present| *present) {
            return Ok(());
        }

        let available = data_present
            .iter()
            .chain(check_present.iter())
            .filter(|present| **present)
            .count();
        if !geometry.is_recoverable(available) || geometry.check() == 0 {
            return Err(Error::TooManyMissing {
                needed: geometry.data(),
                available,
            });
        }

        let mut decoder = ReedSolomonDecoder::new(geometry.data(), geometry.check(), block_size)
            .map_err(|e| Error::Codec(format!("Failed to create decoder: {}", e)))?;

        for (i, buffer) in data.iter().enumerate() {
            if data_present[i] {
                decoder
                    .add_original_shard(i, buffer)
                    .map_err(|e| Error::Codec(format!("Failed to add data block {}: {}", i, e)))?;
            }
        }
        for (i, buffer) in check.iter().enumerate() {
            if check_present[i] {
                decoder
                    .add_recovery_shard(i, buffer)
                    .map_err(|e| Error::Codec(format!("Failed to add check block {}: {}", i, e)))?;
            }
        }

        let restored = decoder
            .decode()
            .map_err(|e| Error::Codec(format!("Decoding failed: {}", e)))?;

        // Collect first so nothing is written unless every block came back.
        let mut rebuilt = Vec::new();
        for (i, present) in data_present.iter().enumerate() {
            if *present {
                continue;
            }
            let block = restored
                .restored_original(i)
                .ok_or_else(|| Error::Codec(format!("data block {} was not restored", i)))?;
            rebuilt.push((i, block.to_vec()));
        }
        for (i, block) in rebuilt {
            data[i] = block;
        }

        Ok(())
    }

    fn encode(
        &self,
        data: &[Vec<u8>],
        check: &mut [Vec<u8>],
        check_present: &[bool],
        block_size: usize,
    ) -> Result<()> {
        validate_block_size(block_size)?;
        if check.len() != check_present.len() {
            return Err(Error::PresenceMismatch {
                buffers: check.len(),
                flags: check_present.len(),
            });
        }
        let geometry = SegmentGeometry::new(data.len(), check.len())?;
        if geometry.check() == 0 || check_present.iter().all(|present| *present) {
            return Ok(());
        }
        for buffer in data.iter().chain(check.iter()) {
            if buffer.len() != block_size {
                return Err(Error::BlockSizeMismatch {
                    expected: block_size,
                    actual: buffer.len(),
                });
            }
        }

        let mut encoder = ReedSolomonEncoder::new(geometry.data(), geometry.check(), block_size)
            .map_err(|e| Error::Codec(format!("Failed to create encoder: {}", e)))?;

        for (i, buffer) in data.iter().enumerate() {
            encoder
                .add_original_shard(buffer)
                .map_err(|e| Error::Codec(format!("Failed to add data block {}: {}", i, e)))?;
        }

        let result = encoder
            .encode()
            .map_err(|e| Error::Codec(format!("Encoding failed: {}", e)))?;

        let recovery: Vec<Vec<u8>> = result.recovery_iter().map(|block| block.to_vec()).collect();
        if recovery.len() != check.len() {
            return Err(Error::Codec(format!(
                "expected {} check blocks, encoder produced {}",
                check.len(),
                recovery.len()
            )));
        }

        for (i, block) in recovery.into_iter().enumerate() {
            if !check_present[i] {
                check[i] = block;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK: usize = 64;

    fn data_blocks(count: usize) -> Vec<Vec<u8>> {
        (0..count)
            .map(|i| (0..BLOCK).map(|j| (i * 31 + j * 7) as u8).collect())
            .collect()
    }

    fn encoded(data: &[Vec<u8>], check_count: usize) -> Vec<Vec<u8>> {
        let codec = ReedSolomonCodec::new();
        let mut check = vec![vec![0u8; BLOCK]; check_count];
        let present = vec![false; check_count];
        codec.encode(data, &mut check, &present, BLOCK).unwrap();
        check
    }

    #[test]
    fn test_decode_two_missing_data_blocks() {
        let codec = ReedSolomonCodec::new();
        let original = data_blocks(4);
        let mut check = encoded(&original, 2);

        let mut data = original.clone();
        data[1] = vec![0u8; BLOCK];
        data[3] = vec![0u8; BLOCK];
        let data_present = [true, false, true, false];
        let check_present = [true, true];

        codec
            .decode(&mut data, &mut check, &data_present, &check_present, BLOCK)
            .unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_decode_below_minimum_leaves_buffers() {
        let codec = ReedSolomonCodec::new();
        let original = data_blocks(4);
        let mut check = encoded(&original, 2);

        let mut data = original.clone();
        for i in 0..3 {
            data[i] = vec![0u8; BLOCK];
        }
        let data_present = [false, false, false, true];
        let check_present = [true, true];

        let err = codec
            .decode(&mut data, &mut check, &data_present, &check_present, BLOCK)
            .unwrap_err();
        assert!(matches!(err, Error::TooManyMissing { needed: 4, available: 3 }));
        assert!(data[..3].iter().all(|block| block.iter().all(|b| *b == 0)));
    }

    #[test]
    fn test_encode_fills_only_missing_check_blocks() {
        let codec = ReedSolomonCodec::new();
        let data = data_blocks(3);
        let full = encoded(&data, 3);

        let marker = vec![0xAAu8; BLOCK];
        let mut check = vec![marker.clone(), vec![0u8; BLOCK], vec![0u8; BLOCK]];
        codec
            .encode(&data, &mut check, &[true, false, false], BLOCK)
            .unwrap();

        assert_eq!(check[0], marker);
        assert_eq!(check[1], full[1]);
        assert_eq!(check[2], full[2]);
    }

    #[test]
    fn test_decode_from_check_blocks_after_regeneration() {
        let codec = ReedSolomonCodec::new();
        let original = data_blocks(2);
        let mut check = encoded(&original, 2);

        let mut data = vec![vec![0u8; BLOCK]; 2];
        codec
            .decode(&mut data, &mut check, &[false, false], &[true, true], BLOCK)
            .unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_rejects_odd_block_size() {
        let codec = ReedSolomonCodec::new();
        let mut data = vec![vec![0u8; 3]];
        let mut check = vec![vec![0u8; 3]];
        assert!(matches!(
            codec.decode(&mut data, &mut check, &[false], &[true], 3),
            Err(Error::InvalidBlockSize(3))
        ));
    }

    #[test]
    fn test_no_check_blocks() {
        let codec = ReedSolomonCodec::new();
        let mut data = data_blocks(2);
        let mut check: Vec<Vec<u8>> = Vec::new();

        assert!(codec.decode(&mut data, &mut check, &[true, true], &[], BLOCK).is_ok());
        assert!(codec.encode(&data, &mut check, &[], BLOCK).is_ok());
        assert!(codec.decode(&mut data, &mut check, &[true, false], &[], BLOCK).is_err());
    }
}
