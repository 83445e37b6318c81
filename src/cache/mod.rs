//! Compressed, content-addressed cache of captured executions

mod entry;
mod store;

pub use entry::EntryWriter;
pub use store::{CacheStore, EntryReader};

use std::path::PathBuf;
use std::time::Duration;

use crate::{CmdcacheError, Result};

/// Sentinel meaning "never expire"
pub const TTL_UNBOUNDED: i64 = -1;

/// Maximum age of a cache entry before it must be recaptured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// Entries never expire
    Unbounded,
    /// Entries older than this many seconds are stale
    Seconds(u64),
}

impl Ttl {
    /// Interpret a signed seconds value, `-1` meaning unbounded
    ///
    /// # Errors
    ///
    /// Returns error for negative values other than `-1`
    pub fn from_seconds(seconds: i64) -> Result<Self> {
        match seconds {
            TTL_UNBOUNDED => Ok(Self::Unbounded),
            s if s < 0 => Err(CmdcacheError::ConfigError(format!(
                "ttl must be >= 0 or {TTL_UNBOUNDED}, got {s}"
            ))),
            s => Ok(Self::Seconds(s.unsigned_abs())),
        }
    }

    /// Whether an entry of the given age in whole seconds is still fresh
    #[must_use]
    pub fn is_fresh(self, age_secs: u64) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Seconds(ttl) => age_secs <= ttl,
        }
    }
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Entry exists and may be replayed
    Fresh {
        /// Entry file
        path: PathBuf,
        /// Entry age
        age: Duration,
    },
    /// Entry exists but is older than the ttl
    Stale {
        /// Entry age
        age: Duration,
    },
    /// No entry for this key
    Absent,
}

impl Lookup {
    /// Whether the entry can be replayed
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }
}
