//! Captured record model

use std::fmt;
use std::time::Duration;

use bytes::Bytes;

use crate::CmdcacheError;

/// Logical stream a record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamTag {
    /// Child standard output
    StdOut = 1,
    /// Child standard error
    StdErr = 2,
    /// Terminal exit-status marker
    ExitStatus = 127,
}

impl StreamTag {
    /// Wire value of this tag
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for StreamTag {
    type Error = CmdcacheError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::StdOut),
            2 => Ok(Self::StdErr),
            127 => Ok(Self::ExitStatus),
            other => Err(CmdcacheError::InvalidFormat(format!(
                "Unknown stream tag: {other}"
            ))),
        }
    }
}

impl fmt::Display for StreamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StdOut => f.write_str("stdout"),
            Self::StdErr => f.write_str("stderr"),
            Self::ExitStatus => f.write_str("exit"),
        }
    }
}

/// Atomic unit of captured output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Milliseconds since the producer's previous emission
    pub elapsed_millis: u32,
    /// Stream this record belongs to
    pub tag: StreamTag,
    /// Raw bytes; a single exit-code byte for [`StreamTag::ExitStatus`]
    pub payload: Bytes,
}

impl Record {
    /// Output record for stdout or stderr
    pub fn output(tag: StreamTag, elapsed_millis: u32, payload: impl Into<Bytes>) -> Self {
        debug_assert!(tag != StreamTag::ExitStatus, "use Record::exit_status");
        Self {
            elapsed_millis,
            tag,
            payload: payload.into(),
        }
    }

    /// Terminal record carrying the process exit code
    #[must_use]
    pub fn exit_status(code: u8) -> Self {
        Self {
            elapsed_millis: 0,
            tag: StreamTag::ExitStatus,
            payload: Bytes::copy_from_slice(&[code]),
        }
    }

    /// Whether this record ends a captured sequence
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.tag == StreamTag::ExitStatus
    }

    /// Exit code if this is the terminal record
    #[must_use]
    pub fn exit_code(&self) -> Option<u8> {
        if self.is_terminal() {
            self.payload.first().copied()
        } else {
            None
        }
    }

    /// Recorded delay as a [`Duration`]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(u64::from(self.elapsed_millis))
    }
}

/// Convert a duration to whole milliseconds, saturating at `u32::MAX`
#[must_use]
pub fn saturating_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}
