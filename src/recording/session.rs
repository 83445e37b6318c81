//! Capture session: run a command and record its output into the cache

use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::multiplexer::{ClockMode, Multiplexer, Producer};
use crate::cache::{CacheStore, EntryWriter};
use crate::fingerprint::CacheKey;
use crate::record::{Record, StreamTag};
use crate::{CmdcacheError, Result};

/// Tunables for a capture
#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// Clock used to stamp records
    pub clock: ClockMode,
    /// Keep entries whose command exited non-zero
    pub keep_failures: bool,
    /// Bound of the producer → consumer channel
    pub channel_capacity: usize,
    /// Size of each pipe read
    pub read_buffer_size: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            clock: ClockMode::PerStream,
            keep_failures: false,
            channel_capacity: super::CHANNEL_CAPACITY,
            read_buffer_size: super::READ_BUFFER_SIZE,
        }
    }
}

/// Result of a completed capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// Exit code of the command
    pub exit_code: u8,
    /// Records encoded, including the exit status
    pub records: u64,
    /// Whether an entry was published for later replay
    pub stored: bool,
}

/// Runs one command while recording its output into a cache entry
pub struct CaptureSession<'a> {
    store: &'a CacheStore,
    options: CaptureOptions,
}

impl<'a> CaptureSession<'a> {
    /// Create a capture session writing through `store`
    #[must_use]
    pub fn new(store: &'a CacheStore, options: CaptureOptions) -> Self {
        Self { store, options }
    }

    /// Run `argv`, teeing its output to `out`/`err` and into `entry`
    ///
    /// The command's stdin is inherited. Output reaches `out`/`err` live
    /// while it is being recorded.
    ///
    /// # Errors
    ///
    /// Returns error if the command cannot be started (the entry is
    /// discarded) or cannot be waited on. Failures of the recording
    /// pipeline itself are logged and leave the command's exit code
    /// intact with `stored == false`.
    pub async fn capture<O, E>(
        &self,
        argv: &[String],
        entry: EntryWriter,
        out: &mut O,
        err: &mut E,
    ) -> Result<CaptureOutcome>
    where
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let key = entry.key();

        let mut child = match spawn(argv) {
            Ok(child) => child,
            Err(e) => {
                entry.abandon();
                self.discard(&key);
                return Err(e);
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        self.record(entry, child.wait(), stdout, stderr, out, err).await
    }

    /// Tee both pipes into `entry` while waiting for the process to exit
    async fn record<W, SO, SE, O, E>(
        &self,
        entry: EntryWriter,
        wait: W,
        stdout: Option<SO>,
        stderr: Option<SE>,
        out: &mut O,
        err: &mut E,
    ) -> Result<CaptureOutcome>
    where
        W: Future<Output = io::Result<ExitStatus>>,
        SO: AsyncRead + Unpin,
        SE: AsyncRead + Unpin,
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let key = entry.key();

        let (mux, rx) = Multiplexer::new(self.options.clock, self.options.channel_capacity);
        let consumer = tokio::task::spawn_blocking(move || drain(rx, entry));

        let out_producer = mux.producer(StreamTag::StdOut);
        let err_producer = mux.producer(StreamTag::StdErr);
        let buffer_size = self.options.read_buffer_size;

        let (status, out_read, err_read) = tokio::join!(
            wait,
            pump_optional(out_producer, stdout, out, buffer_size),
            pump_optional(err_producer, stderr, err, buffer_size),
        );
        let exit_code = exit_code_of(status?);

        let (out_bytes, err_bytes) = match (out_read, err_read) {
            (Ok(out_bytes), Ok(err_bytes)) => (out_bytes, err_bytes),
            (Err(e), _) | (_, Err(e)) => {
                error!("Capture of {} aborted, child output lost: {}", key, e);

                // Without an exit status the consumer gives up and drops the entry
                drop(mux);
                if let Ok(Ok((entry, _))) = consumer.await {
                    entry.abandon();
                }
                self.discard(&key);

                return Ok(CaptureOutcome {
                    exit_code,
                    records: 0,
                    stored: false,
                });
            }
        };

        debug!(
            "Command exited with {} ({} stdout bytes, {} stderr bytes)",
            exit_code, out_bytes, err_bytes
        );

        // Both legs are at EOF, so nothing can follow the exit status
        if let Err(e) = mux.terminate(exit_code).await {
            debug!("Exit status not recorded: {}", e);
        }

        let drained = match consumer.await {
            Ok(result) => result,
            Err(join_err) => Err(CmdcacheError::Capture(format!(
                "consumer task failed: {join_err}"
            ))),
        };

        let (entry, records) = match drained {
            Ok(done) => done,
            Err(e) => {
                error!("Capture of {} aborted: {}", key, e);
                self.discard(&key);
                return Ok(CaptureOutcome {
                    exit_code,
                    records: 0,
                    stored: false,
                });
            }
        };

        if exit_code != 0 && !self.options.keep_failures {
            info!("Not caching {}: exit code {}", key, exit_code);
            entry.abandon();
            self.discard(&key);
            return Ok(CaptureOutcome {
                exit_code,
                records,
                stored: false,
            });
        }

        let stored = match entry.commit() {
            Ok(path) => {
                info!("Cached {} ({} records) at {}", key, records, path.display());
                true
            }
            Err(e) => {
                error!("Failed to publish entry {}: {}", key, e);
                false
            }
        };

        Ok(CaptureOutcome {
            exit_code,
            records,
            stored,
        })
    }

    fn discard(&self, key: &CacheKey) {
        if let Err(e) = self.store.discard(key) {
            warn!("Failed to discard entry {}: {}", key, e);
        }
    }
}

/// Run `argv` with live output and no recording
///
/// # Errors
///
/// Returns error if the command cannot be started or waited on
pub async fn run_uncached<O, E>(
    argv: &[String],
    out: &mut O,
    err: &mut E,
    buffer_size: usize,
) -> Result<u8>
where
    O: AsyncWrite + Unpin + ?Sized,
    E: AsyncWrite + Unpin + ?Sized,
{
    let mut child = spawn(argv)?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let (status, out_read, err_read) = tokio::join!(
        child.wait(),
        pump_optional(Producer::detached(StreamTag::StdOut), stdout, out, buffer_size),
        pump_optional(Producer::detached(StreamTag::StdErr), stderr, err, buffer_size),
    );

    for read in [out_read, err_read] {
        if let Err(e) = read {
            warn!("Reading child output failed: {}", e);
        }
    }

    Ok(exit_code_of(status?))
}

/// Pull records off the channel into the entry until the exit status
///
/// Returning drops the receiver, which tells producers to stop recording.
fn drain(mut rx: mpsc::Receiver<Record>, mut entry: EntryWriter) -> Result<(EntryWriter, u64)> {
    while let Some(record) = rx.blocking_recv() {
        entry.append(&record)?;

        if record.is_terminal() {
            let records = entry.records_written();
            return Ok((entry, records));
        }
    }

    Err(CmdcacheError::Capture(
        "channel closed before exit status".to_string(),
    ))
}

async fn pump_optional<R, W>(
    producer: Producer,
    source: Option<R>,
    tee: &mut W,
    buffer_size: usize,
) -> Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + ?Sized,
{
    let Some(source) = source else {
        return Ok(0);
    };

    let tag = producer.tag();
    producer.pump(source, tee, buffer_size).await.map_err(|e| {
        CmdcacheError::Capture(format!("reading child {tag} failed: {e}"))
    })
}

fn spawn(argv: &[String]) -> Result<Child> {
    let Some((program, args)) = argv.split_first() else {
        return Err(CmdcacheError::InvalidCommand(
            "no command given".to_string(),
        ));
    };

    debug!("Spawning {:?}", argv);

    Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| CmdcacheError::Spawn {
            program: program.clone(),
            source,
        })
}

/// Exit code recorded for a finished process
///
/// Codes are truncated to 8 bits; a Unix process killed by a signal maps
/// to `128 + signal` like a shell reports it.
#[must_use]
pub fn exit_code_of(status: ExitStatus) -> u8 {
    if let Some(code) = status.code() {
        return u8::try_from(code & 0xff).unwrap_or(u8::MAX);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return u8::try_from(128 + signal).unwrap_or(u8::MAX);
        }
    }

    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Ttl;
    use tempfile::TempDir;

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(ToString::to_string).collect()
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_code_of() {
        use std::os::unix::process::ExitStatusExt;

        assert_eq!(exit_code_of(ExitStatus::from_raw(0)), 0);
        assert_eq!(exit_code_of(ExitStatus::from_raw(3 << 8)), 3);
        assert_eq!(exit_code_of(ExitStatus::from_raw(255 << 8)), 255);
        // Killed by SIGKILL
        assert_eq!(exit_code_of(ExitStatus::from_raw(9)), 137);
    }

    #[tokio::test]
    async fn test_empty_argv_rejected() {
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = run_uncached(&[], &mut out, &mut err, 1024).await;

        assert!(matches!(result, Err(CmdcacheError::InvalidCommand(_))));
    }

    #[tokio::test]
    async fn test_spawn_failure_discards_entry() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path().to_path_buf(), 6);
        let argv = argv(&["/nonexistent/cmdcache-test-binary"]);
        let key = CacheKey::from_argv(&argv);

        let entry = store.begin_write(&key).unwrap();
        let temp_path = entry.temp_path().to_path_buf();

        let session = CaptureSession::new(&store, CaptureOptions::default());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = session.capture(&argv, entry, &mut out, &mut err).await;

        assert!(matches!(result, Err(ref e) if e.is_not_found()));
        assert!(!temp_path.exists());
        assert_eq!(
            store.lookup(&key, Ttl::Unbounded).unwrap(),
            crate::cache::Lookup::Absent
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_capture_records_output() {
        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path().to_path_buf(), 6);
        let argv = argv(&["sh", "-c", "printf out; printf err >&2"]);
        let key = CacheKey::from_argv(&argv);

        let session = CaptureSession::new(&store, CaptureOptions::default());
        let entry = store.begin_write(&key).unwrap();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let outcome = session.capture(&argv, entry, &mut out, &mut err).await.unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stored);
        assert_eq!(out, b"out");
        assert_eq!(err, b"err");

        let records: Vec<Record> = store.open_read(&key).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(records.len() as u64, outcome.records);

        let last = records.last().unwrap();
        assert_eq!(last.exit_code(), Some(0));
        assert!(records[..records.len() - 1].iter().all(|r| !r.is_terminal()));
    }

    /// Pipe that yields some output and then fails
    struct BrokenPipe {
        sent: bool,
    }

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            if self.sent {
                return std::task::Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "pipe reset",
                )));
            }

            self.sent = true;
            buf.put_slice(b"partial");
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pipe_read_failure_discards_entry() {
        use std::os::unix::process::ExitStatusExt;

        let temp_dir = TempDir::new().unwrap();
        let store = CacheStore::new(temp_dir.path().to_path_buf(), 6);
        let key = CacheKey::from_argv(&["flaky"]);

        // An older published entry must not survive a lossy recapture
        let mut previous = store.begin_write(&key).unwrap();
        previous.append(&Record::exit_status(0)).unwrap();
        previous.commit().unwrap();

        let entry = store.begin_write(&key).unwrap();
        let temp_path = entry.temp_path().to_path_buf();

        let session = CaptureSession::new(&store, CaptureOptions::default());
        let mut out = Vec::new();
        let mut err = Vec::new();
        let outcome = session
            .record(
                entry,
                async { Ok(ExitStatus::from_raw(0)) },
                Some(BrokenPipe { sent: false }),
                Some(&b"warning"[..]),
                &mut out,
                &mut err,
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(!outcome.stored);
        assert_eq!(out, b"partial");
        assert_eq!(err, b"warning");
        assert!(!temp_path.exists());
        assert_eq!(
            store.lookup(&key, Ttl::Unbounded).unwrap(),
            crate::cache::Lookup::Absent
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_uncached_passes_output() {
        let argv = argv(&["sh", "-c", "echo plain; exit 4"]);
        let mut out = Vec::new();
        let mut err = Vec::new();

        let code = run_uncached(&argv, &mut out, &mut err, 1024).await.unwrap();

        assert_eq!(code, 4);
        assert_eq!(out, b"plain\n");
        assert!(err.is_empty());
    }
}
