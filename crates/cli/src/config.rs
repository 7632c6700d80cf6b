use std::path::Path;
use std::time::Duration;

use leaselock_core::ReleaseMode;
use leaselock_redis::RedisConfig;
use serde::Deserialize;

/// Top-level configuration, loaded from a TOML file.
///
/// ```toml
/// [redis]
/// address = "127.0.0.1:6379"
/// password = "secret"
/// max_idle = 8
/// max_active = 16
/// idle_timeout_secs = 300
///
/// [lock]
/// release_mode = "atomic"
/// default_lease_ms = 10000
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct LeaselockConfig {
    /// Redis connection and pool settings.
    #[serde(default)]
    pub redis: RedisConfig,
    /// Lock behavior.
    #[serde(default)]
    pub lock: LockConfig,
}

/// Lock behavior shared by all commands.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// `"atomic"` or `"two_step"`.
    pub release_mode: ReleaseMode,
    /// Lease used when a command does not pass `--lease-ms`.
    pub default_lease_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            release_mode: ReleaseMode::Atomic,
            default_lease_ms: 10_000,
        }
    }
}

impl LockConfig {
    /// `override_ms` if given, else the configured default lease.
    pub fn lease(&self, override_ms: Option<u64>) -> Duration {
        Duration::from_millis(override_ms.unwrap_or(self.default_lease_ms))
    }
}

impl LeaselockConfig {
    /// Load configuration from `path`, or use defaults if the file does not
    /// exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            Ok(toml::from_str("")?)
        }
    }
}
