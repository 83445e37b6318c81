//! Error types for cmdcache

use std::io;
use thiserror::Error;

/// Result type for cmdcache operations
pub type Result<T> = std::result::Result<T, CmdcacheError>;

/// Errors that can occur in cmdcache
#[derive(Debug, Error)]
pub enum CmdcacheError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid cache entry format
    #[error("Invalid entry format: {0}")]
    InvalidFormat(String),

    /// Record checksum mismatch
    #[error("Entry corrupted at offset {offset}: expected CRC {expected:#x}, got {actual:#x}")]
    CorruptedData {
        /// Offset of the record header in the decompressed stream
        offset: u64,
        /// CRC32 stored in the record header
        expected: u32,
        /// CRC32 computed over the decoded record
        actual: u32,
    },

    /// Stream ended in the middle of a record
    #[error("Entry truncated at offset {offset}")]
    Truncated {
        /// Offset at which the stream ran out
        offset: u64,
    },

    /// Record payload too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// The child process could not be started
    #[error("failed to start '{program}': {source}")]
    Spawn {
        /// Program that failed to launch
        program: String,
        /// Underlying launch error
        #[source]
        source: io::Error,
    },

    /// Nothing to execute
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Capture pipeline failed before the exit status was recorded
    #[error("Capture failed: {0}")]
    Capture(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CmdcacheError {
    /// Whether this error came out of the record decoder rather than the
    /// filesystem or the process layer.
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFormat(_)
                | Self::CorruptedData { .. }
                | Self::Truncated { .. }
                | Self::DataTooLarge { .. }
        ) || matches!(
            self,
            // flate2 reports bad gzip headers and corrupt deflate data this way
            Self::Io(e) if matches!(e.kind(), io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput)
        )
    }

    /// Whether a spawn failure was caused by a missing program
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
