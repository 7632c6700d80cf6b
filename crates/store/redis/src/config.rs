use std::time::Duration;

use leaselock_core::error::LockError;
use redis::{ConnectionInfo, IntoConnectionInfo};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

/// Configuration for a pooled Redis connection.
///
/// Deserializes from a TOML `[redis]` table; every field has a default.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis endpoint, either `host:port` or a `redis://` / `rediss://` URL.
    pub address: String,

    /// Password sent with `AUTH` when a connection is opened. Overrides any
    /// password embedded in `address`.
    pub password: Option<SecretString>,

    /// Idle connections kept in the pool after each reaping pass.
    pub max_idle: usize,

    /// Maximum number of open connections (the pool size).
    pub max_active: usize,

    /// Idle connections unused for longer than this are closed. `0` disables
    /// reaping.
    pub idle_timeout_secs: u64,

    /// How long to wait for a free connection or a new one to open.
    pub connection_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:6379"),
            password: None,
            max_idle: 8,
            max_active: 16,
            idle_timeout_secs: 300,
            connection_timeout_ms: 5000,
        }
    }
}

/// Invalid [`RedisConfig`] values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("redis address must not be empty")]
    EmptyAddress,

    #[error("max_active must be at least 1")]
    ZeroMaxActive,

    #[error("max_idle ({max_idle}) exceeds max_active ({max_active})")]
    IdleExceedsActive { max_idle: usize, max_active: usize },

    #[error("invalid redis address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

impl From<ConfigError> for LockError {
    fn from(err: ConfigError) -> Self {
        LockError::Connection(err.to_string())
    }
}

impl RedisConfig {
    /// Default configuration pointed at `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::new(password.into()));
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// The address as a connection URL. Bare `host:port` addresses get the
    /// `redis://` scheme. Pools are registered under this value.
    pub fn url(&self) -> String {
        let address = self.address.trim();
        if address.contains("://") {
            address.to_owned()
        } else {
            format!("redis://{address}")
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.address.trim().is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        if self.max_active == 0 {
            return Err(ConfigError::ZeroMaxActive);
        }
        if self.max_idle > self.max_active {
            return Err(ConfigError::IdleExceedsActive {
                max_idle: self.max_idle,
                max_active: self.max_active,
            });
        }
        Ok(())
    }

    /// Parsed connection parameters with the configured password applied.
    pub(crate) fn connection_info(&self) -> Result<ConnectionInfo, ConfigError> {
        let mut info = self
            .url()
            .as_str()
            .into_connection_info()
            .map_err(|e| ConfigError::InvalidAddress {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;

        if let Some(password) = &self.password {
            info.redis.password = Some(password.expose_secret().clone());
        }
        Ok(info)
    }
}
