//! Cache store mapping keys to entry files

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::read::GzDecoder;
use flate2::Compression;
use tracing::{debug, info};

use super::{EntryWriter, Lookup, Ttl};
use crate::fingerprint::CacheKey;
use crate::storage::RecordReader;
use crate::Result;

/// Decoder over a decompressed entry file
pub type EntryReader = RecordReader<GzDecoder<BufReader<File>>>;

/// Owner of every entry file under the cache directory
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    compression: Compression,
}

impl CacheStore {
    /// Create a store rooted at `root` with the given gzip level (0-9)
    #[must_use]
    pub fn new(root: PathBuf, compression_level: u32) -> Self {
        Self {
            root,
            compression: Compression::new(compression_level),
        }
    }

    /// Cache directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of the published entry for `key`
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Check whether `key` has an entry young enough to replay
    ///
    /// # Errors
    ///
    /// Returns error if the entry exists but cannot be inspected
    pub fn lookup(&self, key: &CacheKey, ttl: Ttl) -> Result<Lookup> {
        self.lookup_at(key, ttl, SystemTime::now())
    }

    /// [`lookup`](Self::lookup) against an explicit current time
    ///
    /// # Errors
    ///
    /// Returns error if the entry exists but cannot be inspected
    pub fn lookup_at(&self, key: &CacheKey, ttl: Ttl, now: SystemTime) -> Result<Lookup> {
        let path = self.entry_path(key);

        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cache miss: {} (absent)", key);
                return Ok(Lookup::Absent);
            }
            Err(e) => return Err(e.into()),
        };

        // Modification times in the future count as age zero
        let age = now
            .duration_since(metadata.modified()?)
            .unwrap_or(Duration::ZERO);

        if ttl.is_fresh(age.as_secs()) {
            debug!("Cache hit: {} (age {}s)", key, age.as_secs());
            Ok(Lookup::Fresh { path, age })
        } else {
            debug!("Cache miss: {} (stale, age {}s)", key, age.as_secs());
            Ok(Lookup::Stale { age })
        }
    }

    /// Start capturing a new entry for `key`
    ///
    /// # Errors
    ///
    /// Returns error if the cache directory or temp file cannot be created
    pub fn begin_write(&self, key: &CacheKey) -> Result<EntryWriter> {
        fs::create_dir_all(&self.root)?;

        let temp_path = self
            .root
            .join(format!("{}.{}.tmp", key.file_name(), std::process::id()));

        EntryWriter::create(*key, temp_path, self.entry_path(key), self.compression)
    }

    /// Open the published entry for `key` for replay
    ///
    /// # Errors
    ///
    /// Returns error if the entry cannot be opened or its header is invalid
    pub fn open_read(&self, key: &CacheKey) -> Result<EntryReader> {
        let file = File::open(self.entry_path(key))?;
        RecordReader::open(GzDecoder::new(BufReader::new(file)))
    }

    /// Delete the published entry for `key`, returning whether one existed
    ///
    /// # Errors
    ///
    /// Returns error if the entry exists but cannot be removed
    pub fn discard(&self, key: &CacheKey) -> Result<bool> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => {
                info!("Discarded entry {}", key);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
