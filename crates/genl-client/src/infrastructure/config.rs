//! Client settings.
//!
//! The client takes no configuration file. Every field has a default, and
//! the binary overrides them from command-line flags or the environment.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// How long a session waits for the reply to its request.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Unix socket the service listens on.
    pub socket_path: PathBuf,
    pub reply_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: std::env::temp_dir().join("genltest.sock"),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero reply timeout or an
    /// empty socket path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reply_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "reply_timeout must be greater than zero".to_string(),
            ));
        }
        if self.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("socket_path is empty".to_string()));
        }
        Ok(())
    }
}
