//! Configuration types for cmdcache

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cache::{Ttl, TTL_UNBOUNDED};
use crate::recording::{CaptureOptions, ClockMode, CHANNEL_CAPACITY, READ_BUFFER_SIZE};
use crate::replay::{DecodeMode, ReplayOptions};
use crate::{CmdcacheError, Result};

/// Name of the cache directory under the home directory
pub const CACHE_DIR_NAME: &str = ".cmdcache";

/// Name of the configuration file inside the cache directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding cache entries
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Maximum entry age in seconds, `-1` for no expiry
    #[serde(default = "default_ttl")]
    pub ttl_seconds: i64,
    /// Reproduce recorded timing on replay
    #[serde(default)]
    pub pace: bool,
    /// Keep entries of commands that exited non-zero
    #[serde(default)]
    pub keep_failures: bool,
    /// Treatment of corrupt entries on replay
    #[serde(default)]
    pub decode: DecodeMode,
    /// Record timing clock
    #[serde(default)]
    pub clock: ClockMode,
    /// Resource limits
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Resource limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Records buffered between producers and the encoder
    pub channel_capacity: usize,
    /// Bytes per pipe read
    pub read_buffer_size: usize,
    /// Gzip level, 0-9
    pub compression_level: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: CHANNEL_CAPACITY,
            read_buffer_size: READ_BUFFER_SIZE,
            compression_level: 6,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_DIR_NAME)
}

fn default_ttl() -> i64 {
    TTL_UNBOUNDED
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            ttl_seconds: default_ttl(),
            pace: false,
            keep_failures: false,
            decode: DecodeMode::default(),
            clock: ClockMode::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Config {
    /// Default location of the configuration file
    #[must_use]
    pub fn default_path() -> PathBuf {
        default_cache_dir().join(CONFIG_FILE_NAME)
    }

    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CmdcacheError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| CmdcacheError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default file if it exists, else defaults
    ///
    /// # Errors
    ///
    /// Returns error if a file is present but invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }

        let default_path = Self::default_path();
        if default_path.is_file() {
            Self::from_file(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        Ttl::from_seconds(self.ttl_seconds)?;

        if self.cache_dir.as_os_str().is_empty() {
            return Err(CmdcacheError::ConfigError(
                "cache_dir cannot be empty".to_string(),
            ));
        }

        if self.limits.channel_capacity == 0 {
            return Err(CmdcacheError::ConfigError(
                "channel_capacity must be > 0".to_string(),
            ));
        }

        if self.limits.read_buffer_size == 0 {
            return Err(CmdcacheError::ConfigError(
                "read_buffer_size must be > 0".to_string(),
            ));
        }

        if self.limits.compression_level > 9 {
            return Err(CmdcacheError::ConfigError(format!(
                "compression_level must be 0-9, got {}",
                self.limits.compression_level
            )));
        }

        Ok(())
    }

    /// Entry time-to-live
    ///
    /// # Errors
    ///
    /// Returns error if `ttl_seconds` is below `-1`
    pub fn ttl(&self) -> Result<Ttl> {
        Ttl::from_seconds(self.ttl_seconds)
    }

    /// Options for capture sessions
    #[must_use]
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            clock: self.clock,
            keep_failures: self.keep_failures,
            channel_capacity: self.limits.channel_capacity,
            read_buffer_size: self.limits.read_buffer_size,
        }
    }

    /// Options for replay sessions
    #[must_use]
    pub fn replay_options(&self) -> ReplayOptions {
        ReplayOptions {
            pace: self.pace,
            decode: self.decode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            cache_dir = "/tmp/cmdcache"
            ttl_seconds = 300
            pace = true
            decode = "strict"
            clock = "shared"

            [limits]
            channel_capacity = 8
            read_buffer_size = 4096
            compression_level = 1
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/cmdcache"));
        assert_eq!(config.ttl().unwrap(), Ttl::Seconds(300));
        assert!(config.pace);
        assert!(!config.keep_failures);
        assert_eq!(config.decode, DecodeMode::Strict);
        assert_eq!(config.clock, ClockMode::Shared);
        assert_eq!(config.limits.channel_capacity, 8);
    }

    #[test]
    fn test_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.ttl().unwrap(), Ttl::Unbounded);
        assert!(config.cache_dir.ends_with(CACHE_DIR_NAME));
        assert_eq!(config.decode, DecodeMode::Lenient);
        assert_eq!(config.clock, ClockMode::PerStream);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"keep_failures = true\nttl_seconds = -1\n").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert!(config.keep_failures);
        assert!(config.capture_options().keep_failures);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = Config::default();
        config.ttl_seconds = -5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.compression_level = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.limits.channel_capacity = 0;
        assert!(config.validate().is_err());
    }
}
