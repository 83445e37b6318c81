//! Replay session re-emitting a cached record stream

use std::io::Read;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{DecodeMode, DECODE_AHEAD};
use crate::record::{Record, StreamTag};
use crate::storage::RecordReader;
use crate::Result;

/// Replay tunables
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Sleep each record's recorded delay before emitting it
    pub pace: bool,
    /// Treatment of undecodable records
    pub decode: DecodeMode,
}

/// Why a replay stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The exit-status record was reached
    ExitStatus,
    /// The stream ended cleanly without an exit-status record
    EndOfStream,
    /// A record could not be decoded (lenient mode only)
    Corrupt,
}

/// Result of a replay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Recorded exit code, 0 if none was reached
    pub exit_code: u8,
    /// Records decoded, including the exit status
    pub records: u64,
    /// How the stream ended
    pub termination: Termination,
}

/// Re-emits a cached execution to live output streams
pub struct ReplaySession {
    options: ReplayOptions,
}

impl ReplaySession {
    /// Create a replay session
    #[must_use]
    pub fn new(options: ReplayOptions) -> Self {
        Self { options }
    }

    /// Replay every record of `reader` onto `out`/`err`
    ///
    /// Decoding runs on a blocking worker since the reader does synchronous
    /// file and gzip I/O; records reach the async side through a bounded
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns error if writing to `out`/`err` fails, or on a decode error
    /// in [`DecodeMode::Strict`]
    pub async fn run<R, O, E>(
        &self,
        reader: RecordReader<R>,
        out: &mut O,
        err: &mut E,
    ) -> Result<ReplayOutcome>
    where
        R: Read + Send + 'static,
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let (tx, mut rx) = mpsc::channel(DECODE_AHEAD);
        tokio::task::spawn_blocking(move || decode(reader, &tx));

        let mut exit_code = 0u8;
        let mut records = 0u64;

        let termination = loop {
            // Decoder gone without a final item counts as end of stream
            let record = match rx.recv().await.unwrap_or(Ok(None)) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!("Entry ended without exit status");
                    break Termination::EndOfStream;
                }
                Err(e) => match self.options.decode {
                    DecodeMode::Lenient => {
                        warn!("Stopping replay at undecodable record: {}", e);
                        break Termination::Corrupt;
                    }
                    DecodeMode::Strict => return Err(e),
                },
            };
            records += 1;

            match record.tag {
                StreamTag::StdOut | StreamTag::StdErr => {
                    if self.options.pace && record.elapsed_millis > 0 {
                        tokio::time::sleep(record.elapsed()).await;
                    }

                    if record.tag == StreamTag::StdOut {
                        out.write_all(&record.payload).await?;
                        out.flush().await?;
                    } else {
                        err.write_all(&record.payload).await?;
                        err.flush().await?;
                    }
                }
                StreamTag::ExitStatus => {
                    exit_code = record.exit_code().unwrap_or(exit_code);
                    break Termination::ExitStatus;
                }
            }
        };

        out.flush().await?;
        err.flush().await?;

        Ok(ReplayOutcome {
            exit_code,
            records,
            termination,
        })
    }
}

/// Feed decoded records to `tx` up to and including the first terminal item
///
/// Stops early once the receiver is gone.
fn decode<R: Read>(mut reader: RecordReader<R>, tx: &mpsc::Sender<Result<Option<Record>>>) {
    loop {
        let item = reader.next_record();
        let last = !matches!(item, Ok(Some(ref record)) if !record.is_terminal());

        if let Err(ref e) = item {
            debug!("Decoder stopped after byte {}: {}", reader.offset(), e);
        }

        if tx.blocking_send(item).is_err() || last {
            return;
        }
    }
}
