//! Streaming record decoder

use std::io::{ErrorKind, Read};

use bytemuck::{bytes_of_mut, Zeroable};
use bytes::Bytes;

use super::format::{record_crc, FileHeader, RecordHeader, FILE_HEADER_SIZE, PAYLOAD_SIZE_MAX};
use crate::record::{Record, StreamTag};
use crate::{CmdcacheError, Result};

/// Incremental decoder over any byte source
///
/// [`RecordReader::next_record`] returns `Ok(None)` only when the source
/// ends exactly on a record boundary; anything else that stops decoding
/// is an error.
pub struct RecordReader<R: Read> {
    source: R,
    offset: u64,
    records_read: u64,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    /// Open a record stream, validating its file header
    ///
    /// # Errors
    ///
    /// Returns error if the header is missing, truncated or invalid
    pub fn open(source: R) -> Result<Self> {
        let mut reader = Self {
            source,
            offset: 0,
            records_read: 0,
            failed: false,
        };

        let mut header = FileHeader::zeroed();
        let filled = reader.read_full(bytes_of_mut(&mut header))?;
        if filled < FILE_HEADER_SIZE {
            return Err(CmdcacheError::InvalidFormat(format!(
                "File too small to contain header: {filled} bytes"
            )));
        }

        super::validate_header(&header)?;

        Ok(reader)
    }

    /// Decode the next record
    ///
    /// # Errors
    ///
    /// Returns error on truncation, checksum mismatch, unknown tag,
    /// oversized payload or I/O failure
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        let record_offset = self.offset;

        let mut header = RecordHeader::zeroed();
        let filled = self.read_full(bytes_of_mut(&mut header))?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < super::RECORD_HEADER_SIZE {
            return Err(CmdcacheError::Truncated {
                offset: self.offset,
            });
        }

        let tag = StreamTag::try_from(header.tag)?;

        let payload_len = header.payload_len();
        if payload_len > PAYLOAD_SIZE_MAX {
            return Err(CmdcacheError::DataTooLarge {
                size: payload_len,
                limit: PAYLOAD_SIZE_MAX,
            });
        }
        if tag == StreamTag::ExitStatus && payload_len != 1 {
            return Err(CmdcacheError::InvalidFormat(format!(
                "Exit status record must carry 1 byte, found {payload_len}"
            )));
        }

        let mut payload = vec![0u8; payload_len];
        if self.read_full(&mut payload)? < payload_len {
            return Err(CmdcacheError::Truncated {
                offset: self.offset,
            });
        }

        let elapsed_millis = header.elapsed_millis();
        let actual = record_crc(header.tag, elapsed_millis, &payload);
        if actual != header.crc() {
            return Err(CmdcacheError::CorruptedData {
                offset: record_offset,
                expected: header.crc(),
                actual,
            });
        }

        self.records_read += 1;

        Ok(Some(Record {
            elapsed_millis,
            tag,
            payload: Bytes::from(payload),
        }))
    }

    /// Number of records decoded so far
    #[must_use]
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Bytes consumed from the (decompressed) source
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Fill `buf` as far as the source allows, returning the byte count
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.source.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Err(CmdcacheError::Truncated {
                        offset: self.offset + filled as u64,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.offset += filled as u64;
        Ok(filled)
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RecordWriter;
    use proptest::prelude::*;

    fn encode(records: &[Record]) -> Vec<u8> {
        let mut writer = RecordWriter::new(Vec::new()).unwrap();
        for record in records {
            writer.write_record(record).unwrap();
        }
        writer.into_inner()
    }

    fn sample() -> Vec<Record> {
        vec![
            Record::output(StreamTag::StdOut, 0, &b"A"[..]),
            Record::output(StreamTag::StdErr, 250, &b"B"[..]),
            Record::output(StreamTag::StdOut, 1_000_000_000, &b"C\n"[..]),
            Record::exit_status(0),
        ]
    }

    #[test]
    fn test_roundtrip() {
        let records = sample();
        let bytes = encode(&records);

        let reader = RecordReader::open(&bytes[..]).unwrap();
        let decoded: Vec<Record> = reader.collect::<Result<_>>().unwrap();

        assert_eq!(decoded, records);
    }

    #[test]
    fn test_clean_end_of_stream() {
        let bytes = encode(&[Record::exit_status(3)]);
        let mut reader = RecordReader::open(&bytes[..]).unwrap();

        assert_eq!(reader.next_record().unwrap(), Some(Record::exit_status(3)));
        assert_eq!(reader.next_record().unwrap(), None);
        assert_eq!(reader.records_read(), 1);
    }

    #[test]
    fn test_exit_code_extremes() {
        for code in [0u8, 255] {
            let bytes = encode(&[Record::exit_status(code)]);
            let mut reader = RecordReader::open(&bytes[..]).unwrap();
            let record = reader.next_record().unwrap().unwrap();
            assert_eq!(record.exit_code(), Some(code));
        }
    }

    #[test]
    fn test_truncated_header() {
        let bytes = encode(&sample());
        let cut = &bytes[..bytes.len() - 10];

        let mut reader = RecordReader::open(cut).unwrap();
        let mut result = reader.next_record();
        while let Ok(Some(_)) = result {
            result = reader.next_record();
        }

        assert!(matches!(result, Err(CmdcacheError::Truncated { .. })));
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = encode(&[Record::output(StreamTag::StdOut, 0, &b"0123456789"[..])]);
        let cut = &bytes[..bytes.len() - 4];

        let mut reader = RecordReader::open(cut).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(CmdcacheError::Truncated { .. })
        ));
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = encode(&[Record::output(StreamTag::StdOut, 0, &b"hello"[..])]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;

        let mut reader = RecordReader::open(&bytes[..]).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(CmdcacheError::CorruptedData { offset: 8, .. })
        ));
    }

    #[test]
    fn test_unknown_tag() {
        let mut bytes = encode(&[Record::output(StreamTag::StdOut, 0, &b"x"[..])]);
        bytes[FILE_HEADER_SIZE + 12] = 9;

        let mut reader = RecordReader::open(&bytes[..]).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(CmdcacheError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = encode(&[]);
        bytes[0] = b'X';

        assert!(RecordReader::open(&bytes[..]).is_err());
        assert!(RecordReader::open(&bytes[..3]).is_err());
    }

    #[test]
    fn test_iterator_fuses_after_error() {
        let bytes = encode(&sample());
        let cut = &bytes[..bytes.len() - 1];

        let results: Vec<_> = RecordReader::open(cut).unwrap().collect();
        assert_eq!(results.len(), 4);
        assert!(results[..3].iter().all(|r| r.is_ok()));
        assert!(results[3].is_err());
    }

    fn arb_output() -> impl Strategy<Value = Record> {
        (
            prop_oneof![Just(StreamTag::StdOut), Just(StreamTag::StdErr)],
            0u32..=1_000_000_000,
            proptest::collection::vec(any::<u8>(), 0..512),
        )
            .prop_map(|(tag, elapsed, payload)| Record::output(tag, elapsed, payload))
    }

    proptest! {
        #[test]
        fn prop_sequence_roundtrip(
            outputs in proptest::collection::vec(arb_output(), 0..32),
            code in any::<u8>(),
        ) {
            let mut records = outputs;
            records.push(Record::exit_status(code));

            let bytes = encode(&records);
            let decoded: Vec<Record> = RecordReader::open(&bytes[..])
                .unwrap()
                .collect::<Result<_>>()
                .unwrap();

            prop_assert_eq!(decoded, records);
        }
    }
}
