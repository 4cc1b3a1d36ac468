//! Error types for histbflash.

use std::io;
use thiserror::Error;

/// Result type for histbflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for histbflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Invalid fastboot image.
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Frame shorter than the minimum wire size.
    #[error("Malformed frame: {0} bytes, need at least 5")]
    MalformedFrame(usize),

    /// CRC over a received frame did not come out zero.
    #[error("CRC mismatch: residual {residual:#06x}")]
    ChecksumMismatch {
        /// CRC residual over the full frame (zero means intact).
        residual: u16,
    },

    /// No qualifying response within the allotted retries.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Structurally valid traffic that violates the protocol's invariants.
    ///
    /// Wrong leading marker, wrong result length, or an out-of-turn frame
    /// arriving while the previous one is unconsumed. Never retried; the
    /// link is considered desynchronized and the run must abort.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Invalid regbin file.
    #[error("Invalid regbin: {0}")]
    InvalidRegbin(String),

    /// Configuration error (ambiguous serial port, bad arguments).
    #[error("Configuration error: {0}")]
    Config(String),
}
