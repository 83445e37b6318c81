//! Streaming record encoder

use std::io::Write;

use bytemuck::bytes_of;

use super::format::{FileHeader, RecordHeader, PAYLOAD_SIZE_MAX};
use crate::record::Record;
use crate::{CmdcacheError, Result};

/// Incremental encoder writing records into any byte sink
///
/// Each record is written as soon as it is appended; nothing is buffered
/// beyond what the sink itself buffers.
pub struct RecordWriter<W: Write> {
    sink: W,
    records_written: u64,
}

impl<W: Write> RecordWriter<W> {
    /// Start a new record stream, writing the file header
    ///
    /// # Errors
    ///
    /// Returns error if the header cannot be written
    pub fn new(mut sink: W) -> Result<Self> {
        sink.write_all(bytes_of(&FileHeader::default()))?;

        Ok(Self {
            sink,
            records_written: 0,
        })
    }

    /// Encode one record
    ///
    /// # Errors
    ///
    /// Returns error if the payload is oversized or the sink fails
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if record.payload.len() > PAYLOAD_SIZE_MAX {
            return Err(CmdcacheError::DataTooLarge {
                size: record.payload.len(),
                limit: PAYLOAD_SIZE_MAX,
            });
        }

        let header = RecordHeader::new(record.tag.as_u8(), record.elapsed_millis, &record.payload);
        self.sink.write_all(bytes_of(&header))?;
        self.sink.write_all(&record.payload)?;
        self.records_written += 1;

        Ok(())
    }

    /// Number of records encoded so far
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush the underlying sink
    ///
    /// # Errors
    ///
    /// Returns error if flush fails
    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }

    /// Recover the sink
    pub fn into_inner(self) -> W {
        self.sink
    }
}
