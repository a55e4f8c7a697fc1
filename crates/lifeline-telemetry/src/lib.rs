//! Telemetry for the lifeline engine
//!
//! - [`logging`]: process-wide `tracing` subscriber setup
//! - [`journal`]: the human-readable per-document journal

pub mod journal;
pub mod logging;

pub use journal::{DocumentJournal, JournalEntry};
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};

use thiserror::Error;

/// Telemetry error types
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Subscriber setup or parsing failure
    #[error("Logging error: {0}")]
    Logging(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;
