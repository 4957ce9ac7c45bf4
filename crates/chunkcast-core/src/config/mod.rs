//! Configuration management for Chunkcast.
//!
//! This module handles loading, saving, and validating configuration.
//! The core only reads these values; it never changes them on its own.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/chunkcast/config.toml` |
//! | macOS | `~/Library/Application Support/Chunkcast/config.toml` |
//! | Windows | `%APPDATA%\Chunkcast\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use chunkcast_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Data port: {}", config.network.data_port);
//! ```

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration struct for Chunkcast.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network settings
    pub network: NetworkConfig,
    /// Transfer settings
    pub transfer: TransferConfig,
    /// Loss simulation settings
    pub loss: LossConfig,
    /// Retransmission recovery settings
    pub recovery: RecoveryConfig,
}

/// Network configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Control channel port (UDP)
    pub control_port: u16,
    /// Data channel port (UDP)
    pub data_port: u16,
    /// Address data frames are broadcast to
    pub broadcast_address: Ipv4Addr,
    /// Address of the sharer, used by receivers for control requests
    pub server_address: Ipv4Addr,
    /// How long a receiver waits for a control response
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            control_port: crate::DEFAULT_CONTROL_PORT,
            data_port: crate::DEFAULT_DATA_PORT,
            broadcast_address: Ipv4Addr::BROADCAST,
            server_address: Ipv4Addr::LOCALHOST,
            request_timeout: Duration::from_secs(2),
        }
    }
}

/// Transfer configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Piece size in bytes
    pub chunk_size: usize,
    /// Maximum number of files the sharer can register
    pub max_files: usize,
    /// Directory received files are written to
    pub downloads_dir: PathBuf,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            max_files: crate::DEFAULT_MAX_FILES,
            downloads_dir: PathBuf::from("downloads"),
        }
    }
}

/// Loss simulation options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    /// Drop outgoing data frames on purpose
    pub simulate: bool,
    /// Probability of dropping each frame (0.0 - 1.0)
    pub probability: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            simulate: false,
            probability: 0.001,
        }
    }
}

impl LossConfig {
    /// Loss simulation switched off.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            simulate: false,
            probability: 0.0,
        }
    }

    /// Loss simulation with the given drop probability.
    #[must_use]
    pub const fn with_probability(probability: f64) -> Self {
        Self {
            simulate: true,
            probability,
        }
    }
}

/// Retransmission recovery options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Re-request missing pieces of stalled transfers
    pub enabled: bool,
    /// Idle time after which a transfer counts as stalled
    #[serde(with = "humantime_serde")]
    pub stall_threshold: Duration,
    /// Lower bound of the jittered check interval
    #[serde(with = "humantime_serde")]
    pub check_interval_min: Duration,
    /// Upper bound of the jittered check interval
    #[serde(with = "humantime_serde")]
    pub check_interval_max: Duration,
    /// Maximum indices per PARTS request
    pub batch_limit: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stall_threshold: Duration::from_millis(500),
            check_interval_min: Duration::from_millis(400),
            check_interval_max: Duration::from_millis(600),
            batch_limit: crate::DEFAULT_BATCH_LIMIT,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigError(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Check that values are usable by the protocol.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, reason: String| {
            Err(Error::InvalidConfig {
                key: key.to_string(),
                reason,
            })
        };

        if self.transfer.chunk_size == 0 {
            return invalid("transfer.chunk_size", "must be greater than zero".into());
        }
        if self.transfer.chunk_size + crate::protocol::FRAME_HEADER_SIZE > crate::MAX_DATAGRAM_SIZE
        {
            return invalid(
                "transfer.chunk_size",
                format!(
                    "frames must fit in one datagram ({} bytes)",
                    crate::MAX_DATAGRAM_SIZE
                ),
            );
        }
        if !(0.0..=1.0).contains(&self.loss.probability) {
            return invalid(
                "loss.probability",
                format!("{} is outside 0.0 - 1.0", self.loss.probability),
            );
        }
        if self.recovery.check_interval_min > self.recovery.check_interval_max {
            return invalid(
                "recovery.check_interval_min",
                "must not exceed recovery.check_interval_max".into(),
            );
        }
        if self.recovery.batch_limit == 0 {
            return invalid("recovery.batch_limit", "must be greater than zero".into());
        }
        let largest_request = crate::protocol::parts_request_size(self.recovery.batch_limit);
        if largest_request > crate::SAFE_DATAGRAM_SIZE {
            return invalid(
                "recovery.batch_limit",
                format!(
                    "a full batch encodes to {largest_request} bytes, more than {}",
                    crate::SAFE_DATAGRAM_SIZE
                ),
            );
        }
        Ok(())
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "chunkcast", "Chunkcast")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.strip_suffix("ms")
            .map(|millis| {
                millis
                    .parse()
                    .map(Duration::from_millis)
                    .map_err(serde::de::Error::custom)
            })
            .or_else(|| {
                s.strip_suffix('s').map(|secs| {
                    secs.parse()
                        .map(Duration::from_secs)
                        .map_err(serde::de::Error::custom)
                })
            })
            .or_else(|| {
                s.strip_suffix('m').map(|mins| {
                    mins.parse::<u64>()
                        .map(|m| Duration::from_secs(m * 60))
                        .map_err(serde::de::Error::custom)
                })
            })
            .unwrap_or_else(|| Err(serde::de::Error::custom("invalid duration format")))
    }
}
