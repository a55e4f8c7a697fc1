//! Error types for segment codec operations

use thiserror::Error;

/// Result type for codec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding or encoding a segment
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid segment geometry
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Block size is not usable by the codec
    #[error("Invalid block size {0}: must be non-zero and even")]
    InvalidBlockSize(usize),

    /// Too many blocks are missing for recovery
    #[error("Too many missing blocks: need {needed}, have {available}")]
    TooManyMissing {
        /// Number of blocks needed for recovery
        needed: usize,
        /// Number of blocks available
        available: usize,
    },

    /// A buffer does not have the expected block size
    #[error("Block size mismatch: expected {expected}, got {actual}")]
    BlockSizeMismatch {
        /// Expected block size
        expected: usize,
        /// Actual buffer length
        actual: usize,
    },

    /// Presence flags do not line up with the buffers
    #[error("Presence flag count mismatch: {buffers} buffers, {flags} flags")]
    PresenceMismatch {
        /// Number of buffers
        buffers: usize,
        /// Number of presence flags
        flags: usize,
    },

    /// Internal encoding/decoding error
    #[error("Codec error: {0}")]
    Codec(String),
}
