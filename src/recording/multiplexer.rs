//! Stream multiplexer merging producer output into one record sequence

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::record::{saturating_millis, Record, StreamTag};
use crate::{CmdcacheError, Result};

/// How producers measure the elapsed time stamped on their records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ClockMode {
    /// Each producer measures from its own previous record
    #[default]
    PerStream,
    /// All producers measure from the previous record of any producer
    Shared,
}

enum Clock {
    Own(Instant),
    Shared(Arc<Mutex<Instant>>),
}

/// Single-consumer fan-in point for every producer of one capture
///
/// All records go through one bounded channel, so the consumer sees a
/// total order consistent with each producer's own order, and a slow
/// consumer back-pressures the producers instead of growing a buffer.
pub struct Multiplexer {
    tx: mpsc::Sender<Record>,
    clock_mode: ClockMode,
    shared_clock: Arc<Mutex<Instant>>,
}

impl Multiplexer {
    /// Create a multiplexer and the receiving end of its channel
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0
    #[must_use]
    pub fn new(clock_mode: ClockMode, capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        assert!(capacity > 0, "channel capacity must be > 0");

        let (tx, rx) = mpsc::channel(capacity);
        let mux = Self {
            tx,
            clock_mode,
            shared_clock: Arc::new(Mutex::new(Instant::now())),
        };

        (mux, rx)
    }

    /// New producer handle for one output stream
    #[must_use]
    pub fn producer(&self, tag: StreamTag) -> Producer {
        let clock = match self.clock_mode {
            ClockMode::PerStream => Clock::Own(Instant::now()),
            ClockMode::Shared => Clock::Shared(Arc::clone(&self.shared_clock)),
        };

        Producer {
            tag,
            clock,
            tx: Some(self.tx.clone()),
            tee_failed: false,
        }
    }

    /// Send the terminal exit-status record, closing this handle
    ///
    /// # Errors
    ///
    /// Returns error if the consumer is gone
    pub async fn terminate(self, exit_code: u8) -> Result<()> {
        self.tx
            .send(Record::exit_status(exit_code))
            .await
            .map_err(|_| CmdcacheError::Capture("consumer closed before exit status".to_string()))
    }
}

/// Write handle for one stream feeding a [`Multiplexer`]
pub struct Producer {
    tag: StreamTag,
    clock: Clock,
    tx: Option<mpsc::Sender<Record>>,
    tee_failed: bool,
}

impl Producer {
    /// Producer that only passes output through, recording nothing
    #[must_use]
    pub fn detached(tag: StreamTag) -> Self {
        Self {
            tag,
            clock: Clock::Own(Instant::now()),
            tx: None,
            tee_failed: false,
        }
    }

    /// Stream this producer writes
    #[must_use]
    pub fn tag(&self) -> StreamTag {
        self.tag
    }

    /// Whether records still reach the consumer
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.tx.is_some()
    }

    /// Stamp `chunk` and hand it to the consumer
    ///
    /// A closed channel means the capture was aborted; the producer then
    /// stops recording and later calls are no-ops.
    pub async fn emit(&mut self, chunk: Bytes) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };

        let sent = match &mut self.clock {
            Clock::Own(last) => {
                let now = Instant::now();
                let elapsed = saturating_millis(now.duration_since(*last));
                *last = now;
                tx.send(Record::output(self.tag, elapsed, chunk)).await
            }
            Clock::Shared(shared) => {
                // Held across the send so stamps follow channel order
                let mut last = shared.lock().await;
                let now = Instant::now();
                let elapsed = saturating_millis(now.duration_since(*last));
                *last = now;
                tx.send(Record::output(self.tag, elapsed, chunk)).await
            }
        };

        if sent.is_err() {
            debug!("Consumer gone, {} no longer recorded", self.tag);
            self.tx = None;
        }
    }

    /// Copy `source` to `tee` until end-of-file, recording every chunk
    ///
    /// Returns the number of bytes read from `source`.
    ///
    /// # Errors
    ///
    /// Returns error if reading `source` fails
    pub async fn pump<R, W>(mut self, mut source: R, tee: &mut W, buffer_size: usize) -> Result<u64>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut buf = vec![0u8; buffer_size.max(1)];
        let mut total = 0u64;

        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            total += n as u64;

            let chunk = Bytes::copy_from_slice(&buf[..n]);
            self.pass_through(tee, &chunk).await;
            self.emit(chunk).await;
        }

        Ok(total)
    }

    async fn pass_through<W>(&mut self, tee: &mut W, chunk: &[u8])
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        if self.tee_failed {
            return;
        }

        let result = match tee.write_all(chunk).await {
            Ok(()) => tee.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Live {} output failed, still capturing: {}", self.tag, e);
            self.tee_failed = true;
        }
    }
}
