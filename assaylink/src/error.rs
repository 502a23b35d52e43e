//! Error types for assaylink.

use std::io;
use thiserror::Error;

/// Result type for assaylink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for assaylink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Payload does not fit the one-byte length field.
    #[error("Payload too large: {len} bytes (limit {limit})")]
    PayloadTooLarge {
        /// Actual payload length.
        len: usize,
        /// Maximum encodable payload length.
        limit: usize,
    },

    /// Malformed or unverifiable frame bytes.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Transport has been closed or its workers have terminated.
    #[error("Transport is closed")]
    Closed,

    /// Firmware transfer aborted.
    #[error("Firmware upgrade aborted at chunk {chunk}/{total}: {reason}")]
    Upgrade {
        /// Index of the chunk that failed (0-based).
        chunk: usize,
        /// Total number of planned chunks.
        total: usize,
        /// Why the transfer stopped.
        reason: String,
    },
}
