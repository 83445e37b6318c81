//! In-progress cache entry

use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, warn};

use crate::fingerprint::CacheKey;
use crate::record::Record;
use crate::storage::RecordWriter;
use crate::Result;

type Sink = GzEncoder<BufWriter<File>>;

/// Writer for a cache entry being captured
///
/// Records stream through gzip into a private temp file next to the
/// entry. Nothing is visible under the entry name until [`commit`]
/// renames the finished file into place. Dropping an uncommitted writer
/// removes the temp file.
///
/// [`commit`]: EntryWriter::commit
pub struct EntryWriter {
    key: CacheKey,
    temp_path: PathBuf,
    final_path: PathBuf,
    writer: Option<RecordWriter<Sink>>,
}

impl EntryWriter {
    pub(super) fn create(
        key: CacheKey,
        temp_path: PathBuf,
        final_path: PathBuf,
        compression: Compression,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut entry = Self {
            key,
            temp_path,
            final_path,
            writer: None,
        };

        // Assigned after construction so a header write failure still
        // cleans up the temp file through Drop.
        let sink = GzEncoder::new(BufWriter::new(file), compression);
        entry.writer = Some(RecordWriter::new(sink)?);

        debug!("Created entry {} at {}", key, entry.temp_path.display());
        Ok(entry)
    }

    /// Key this entry is being captured for
    #[must_use]
    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// Temp file currently receiving records
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Encode one record into the entry
    ///
    /// # Errors
    ///
    /// Returns error if encoding or the underlying write fails
    pub fn append(&mut self, record: &Record) -> Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_record(record),
            None => Err(crate::CmdcacheError::Capture(
                "entry already closed".to_string(),
            )),
        }
    }

    /// Number of records appended so far
    #[must_use]
    pub fn records_written(&self) -> u64 {
        self.writer
            .as_ref()
            .map_or(0, RecordWriter::records_written)
    }

    /// Finish compression, sync and publish the entry
    ///
    /// # Errors
    ///
    /// Returns error if flushing or renaming fails; the temp file is
    /// removed in that case
    pub fn commit(mut self) -> Result<PathBuf> {
        let Some(writer) = self.writer.take() else {
            return Err(crate::CmdcacheError::Capture(
                "entry already closed".to_string(),
            ));
        };

        let buffered = writer.into_inner().finish()?;
        let file = buffered.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.temp_path, &self.final_path)?;

        debug!("Committed entry {} to {}", self.key, self.final_path.display());
        Ok(self.final_path.clone())
    }

    /// Drop the entry without publishing it
    pub fn abandon(self) {
        debug!("Abandoning entry {}", self.key);
        drop(self);
    }
}

impl Drop for EntryWriter {
    fn drop(&mut self) {
        // Drop the encoder first so the file handle is closed before removal
        self.writer.take();

        match fs::remove_file(&self.temp_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove temp entry {}: {}",
                self.temp_path.display(),
                e
            ),
        }
    }
}
