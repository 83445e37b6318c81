//! Top-level flow: replay a fresh entry, or capture, or run uncached

use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Lookup};
use crate::config::Config;
use crate::fingerprint::CacheKey;
use crate::recording::{run_uncached, CaptureSession};
use crate::replay::ReplaySession;
use crate::{CmdcacheError, Result};

/// Where an execution's output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Served from a cache entry
    Replayed,
    /// Command ran and was recorded
    Captured,
    /// Command ran without touching the cache
    Passthrough,
}

/// Result of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    /// Exit code to hand back to the caller
    pub exit_code: u8,
    /// How the output was produced
    pub source: Source,
}

/// Runs commands through the cache
pub struct Executor {
    config: Config,
    store: CacheStore,
}

impl Executor {
    /// Create an executor from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store = CacheStore::new(config.cache_dir.clone(), config.limits.compression_level);
        Ok(Self { config, store })
    }

    /// The underlying cache store
    #[must_use]
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Execute `argv`, replaying from cache when possible
    ///
    /// Filesystem problems with the cache never fail the invocation; the
    /// command then runs uncached. A fresh entry that fails to decode is
    /// discarded and captured again.
    ///
    /// # Errors
    ///
    /// Returns error if the command cannot be started, or a strict replay
    /// hits a corrupt entry
    pub async fn execute<O, E>(&self, argv: &[String], out: &mut O, err: &mut E) -> Result<Execution>
    where
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        if argv.is_empty() {
            return Err(CmdcacheError::InvalidCommand(
                "no command given".to_string(),
            ));
        }

        let key = CacheKey::from_argv(argv);
        let ttl = self.config.ttl()?;
        debug!("Command {:?} has key {}", argv, key);

        match self.store.lookup(&key, ttl) {
            Ok(Lookup::Fresh { age, .. }) => {
                match self.store.open_read(&key) {
                    Ok(reader) => {
                        info!("Replaying {} (age {}s)", key, age.as_secs());
                        let outcome = ReplaySession::new(self.config.replay_options())
                            .run(reader, out, err)
                            .await?;

                        return Ok(Execution {
                            exit_code: outcome.exit_code,
                            source: Source::Replayed,
                        });
                    }
                    Err(e) if e.is_decode_error() => {
                        warn!("Undecodable entry {}, recapturing: {}", key, e);
                        if let Err(e) = self.store.discard(&key) {
                            warn!("Failed to discard entry {}: {}", key, e);
                        }
                    }
                    Err(e) => {
                        warn!("Cannot open entry {}, running uncached: {}", key, e);
                        return self.passthrough(argv, out, err).await;
                    }
                }
            }
            Ok(Lookup::Stale { age }) => {
                info!("Entry {} is stale (age {}s)", key, age.as_secs());
            }
            Ok(Lookup::Absent) => {}
            Err(e) => {
                warn!("Cache lookup failed, running uncached: {}", e);
                return self.passthrough(argv, out, err).await;
            }
        }

        let entry = match self.store.begin_write(&key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cannot create cache entry, running uncached: {}", e);
                return self.passthrough(argv, out, err).await;
            }
        };

        let outcome = CaptureSession::new(&self.store, self.config.capture_options())
            .capture(argv, entry, out, err)
            .await?;

        Ok(Execution {
            exit_code: outcome.exit_code,
            source: Source::Captured,
        })
    }

    async fn passthrough<O, E>(&self, argv: &[String], out: &mut O, err: &mut E) -> Result<Execution>
    where
        O: AsyncWrite + Unpin + ?Sized,
        E: AsyncWrite + Unpin + ?Sized,
    {
        let exit_code = run_uncached(argv, out, err, self.config.limits.read_buffer_size).await?;

        Ok(Execution {
            exit_code,
            source: Source::Passthrough,
        })
    }
}
