//! Error types for the keeper

use std::time::Duration;

use thiserror::Error;

use crate::client::ClientError;
use crate::key::{ContentKey, DocumentId};

/// Result type for keeper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Keeper errors
#[derive(Debug, Error)]
pub enum Error {
    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed manifest line
    #[error("Manifest line {line}: {message}")]
    Manifest {
        /// 1-based line number
        line: usize,
        /// What was wrong
        message: String,
    },

    /// Content store failure outside a per-block job
    #[error("Content store error: {0}")]
    Client(#[from] ClientError),

    /// Codec failure
    #[error("Codec error: {0}")]
    Codec(#[from] lifeline_ec::Error),

    /// Journal or logging failure
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] lifeline_telemetry::TelemetryError),

    /// The document is not registered
    #[error("Document {0} not found")]
    DocumentNotFound(DocumentId),

    /// A document with the same root is already registered
    #[error("Document with root {0} is already registered")]
    DuplicateDocument(ContentKey),

    /// The document root cannot be fetched
    #[error("Root {key} unavailable: {reason}")]
    RootUnavailable {
        /// Root key
        key: ContentKey,
        /// Fetch failure
        reason: String,
    },

    /// Edition lookup kept redirecting
    #[error("Too many permanent redirects starting at {0}")]
    RedirectLoop(ContentKey),

    /// Segment cannot be reconstructed
    #[error("Segment {segment} cannot be healed: {reason}")]
    HealingImpossible {
        /// Segment id
        segment: u32,
        /// Why
        reason: String,
    },

    /// Stop signal observed
    #[error("Operation cancelled")]
    Cancelled,

    /// Watchdog terminated an idle pass
    #[error("No progress for {idle:?}")]
    Stalled {
        /// Idle time when the watchdog fired
        idle: Duration,
    },

    /// Internal invariant violated
    #[error("Invalid state: {0}")]
    InvalidState(String),
}
