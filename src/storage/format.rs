//! Binary format structures

use bytemuck::{Pod, Zeroable};
use crc32fast::Hasher;

/// File magic bytes: "CMTS"
pub const FILE_MAGIC: [u8; 4] = *b"CMTS";

/// Current format version
pub const FILE_VERSION: u16 = 1;

/// File header size
pub const FILE_HEADER_SIZE: usize = 8;

/// Record header size
pub const RECORD_HEADER_SIZE: usize = 16;

/// Largest payload a single record may carry
pub const PAYLOAD_SIZE_MAX: usize = 16 * 1024 * 1024;

/// Stream header, written once before the first record
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FileHeader {
    /// Magic bytes for format identification
    pub magic: [u8; 4],

    /// Format version (little-endian)
    pub version: u16,

    /// Feature flags (little-endian), currently zero
    pub flags: u16,
}

static_assertions::const_assert_eq!(std::mem::size_of::<FileHeader>(), FILE_HEADER_SIZE);

/// Per-record header, followed by `payload_len` payload bytes
///
/// Integer fields are stored little-endian regardless of host order.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct RecordHeader {
    /// Milliseconds since the producer's previous record
    pub elapsed_millis: u32,

    /// Payload length in bytes
    pub payload_len: u32,

    /// CRC32 over tag, elapsed time and payload
    pub crc: u32,

    /// Stream tag
    pub tag: u8,

    /// Reserved
    pub reserved: [u8; 3],
}

static_assertions::const_assert_eq!(std::mem::size_of::<RecordHeader>(), RECORD_HEADER_SIZE);

impl Default for FileHeader {
    fn default() -> Self {
        Self {
            magic: FILE_MAGIC,
            version: FILE_VERSION.to_le(),
            flags: 0,
        }
    }
}

impl FileHeader {
    /// Format version in host order
    #[must_use]
    pub fn version(&self) -> u16 {
        u16::from_le(self.version)
    }
}

impl RecordHeader {
    /// Build a header for the given record fields
    #[must_use]
    pub fn new(tag: u8, elapsed_millis: u32, payload: &[u8]) -> Self {
        Self {
            elapsed_millis: elapsed_millis.to_le(),
            payload_len: (payload.len() as u32).to_le(),
            crc: record_crc(tag, elapsed_millis, payload).to_le(),
            tag,
            reserved: [0; 3],
        }
    }

    /// Elapsed time in host order
    #[must_use]
    pub fn elapsed_millis(&self) -> u32 {
        u32::from_le(self.elapsed_millis)
    }

    /// Payload length in host order
    #[must_use]
    pub fn payload_len(&self) -> usize {
        u32::from_le(self.payload_len) as usize
    }

    /// Stored CRC in host order
    #[must_use]
    pub fn crc(&self) -> u32 {
        u32::from_le(self.crc)
    }
}

/// CRC32 covering everything a record carries
#[must_use]
pub fn record_crc(tag: u8, elapsed_millis: u32, payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[tag]);
    hasher.update(&elapsed_millis.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
