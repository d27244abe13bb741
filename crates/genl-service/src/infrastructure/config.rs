//! TOML configuration for the genltest service.
//!
//! Every field has a default, so the service runs without a config file:
//!
//! ```toml
//! socket_path = "/tmp/genltest.sock"
//! trigger_path = "/tmp/genltest-ping.sock"
//! msg_max_len = 1024
//! queue_depth = 64
//! log_level = "info"
//! ```
//!
//! Fields missing from the file take their default via
//! `#[serde(default = "...")]`, so an older file keeps working when a field
//! is added.

use std::path::{Path, PathBuf};

use genl_core::family::genltest::MSG_MAX_LEN;
use genl_core::protocol::envelope::MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Unix socket clients connect to.
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    /// Unix socket whose writes are broadcast to the `mcgrp` group.
    #[serde(default = "default_trigger_path")]
    pub trigger_path: PathBuf,
    /// Bytes of a trigger write that are broadcast; the rest is dropped.
    #[serde(default = "default_msg_max_len")]
    pub msg_max_len: usize,
    /// Frames buffered per client session and for the family inbox.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_socket_path() -> PathBuf {
    std::env::temp_dir().join("genltest.sock")
}

fn default_trigger_path() -> PathBuf {
    std::env::temp_dir().join("genltest-ping.sock")
}

fn default_msg_max_len() -> usize {
    MSG_MAX_LEN
}

fn default_queue_depth() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            trigger_path: default_trigger_path(),
            msg_max_len: default_msg_max_len(),
            queue_depth: default_queue_depth(),
            log_level: default_log_level(),
        }
    }
}

impl ServiceConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero or oversized
    /// `msg_max_len`, a zero `queue_depth`, or identical socket paths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.msg_max_len == 0 || self.msg_max_len > MAX_FRAME_SIZE / 2 {
            return Err(ConfigError::Invalid(format!(
                "msg_max_len must be in 1..={}, got {}",
                MAX_FRAME_SIZE / 2,
                self.msg_max_len
            )));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue_depth must be at least 1".to_string()));
        }
        if self.socket_path == self.trigger_path {
            return Err(ConfigError::Invalid(format!(
                "socket_path and trigger_path are both {}",
                self.socket_path.display()
            )));
        }
        Ok(())
    }
}

/// Loads the config at `path`, returning `ServiceConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<ServiceConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: ServiceConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServiceConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &ServiceConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
