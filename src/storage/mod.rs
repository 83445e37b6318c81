//! Binary record format for cache entries
//!
//! The codec knows nothing about compression or files; it encodes into any
//! [`std::io::Write`] and decodes from any [`std::io::Read`].

mod format;
mod reader;
mod writer;

pub use format::{
    record_crc, FileHeader, RecordHeader, FILE_HEADER_SIZE, FILE_MAGIC, FILE_VERSION,
    PAYLOAD_SIZE_MAX, RECORD_HEADER_SIZE,
};
pub use reader::RecordReader;
pub use writer::RecordWriter;

use crate::Result;

/// Validate stream magic and version
///
/// # Errors
///
/// Returns error if magic or version is invalid
pub fn validate_header(header: &FileHeader) -> Result<()> {
    if header.magic != FILE_MAGIC {
        return Err(crate::CmdcacheError::InvalidFormat(format!(
            "Invalid magic bytes: expected {:?}, got {:?}",
            FILE_MAGIC, header.magic
        )));
    }

    if header.version() != FILE_VERSION {
        return Err(crate::CmdcacheError::InvalidFormat(format!(
            "Unsupported version: {}, expected {}",
            header.version(),
            FILE_VERSION
        )));
    }

    Ok(())
}
