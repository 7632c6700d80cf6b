use std::cell::Cell;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use deadpool_redis::{Config, Pool, Runtime};
use leaselock_core::error::LockError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::RedisConfig;

struct RegisteredPool {
    pool: Pool,
    reaper: Option<JoinHandle<()>>,
}

/// Owns one connection pool per Redis address.
///
/// Lock stores for the same address share a pool instead of each opening
/// their own. The first configuration registered for an address decides its
/// pool settings. Call [`shutdown`](Self::shutdown) (or drop the registry) to
/// close every pool and stop idle reaping.
#[derive(Default)]
pub struct PoolRegistry {
    pools: DashMap<String, RegisteredPool>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the pool for `config.address`, creating it on first use.
    ///
    /// Creating a pool does not open any connection. When called inside a
    /// tokio runtime and `idle_timeout_secs` is non-zero, a background task
    /// trims idle connections.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Connection`] if the configuration is invalid or
    /// the pool cannot be built.
    pub fn get_or_create(&self, config: &RedisConfig) -> Result<Pool, LockError> {
        config.validate()?;

        match self.pools.entry(config.url()) {
            Entry::Occupied(occupied) => Ok(occupied.get().pool.clone()),
            Entry::Vacant(vacant) => {
                let pool = build_pool(config)?;
                let reaper = spawn_reaper(pool.clone(), config.idle_timeout(), config.max_idle);
                info!(
                    address = %vacant.key(),
                    max_active = config.max_active,
                    max_idle = config.max_idle,
                    "created redis pool"
                );
                vacant.insert(RegisteredPool {
                    pool: pool.clone(),
                    reaper,
                });
                Ok(pool)
            }
        }
    }

    /// The registered pool for `address`, if any.
    pub fn get(&self, address: &str) -> Option<Pool> {
        let url = RedisConfig::new(address).url();
        self.pools.get(&url).map(|entry| entry.pool.clone())
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Close every pool and stop their reapers. Connections checked out at
    /// this point are dropped instead of returned.
    pub fn shutdown(&self) {
        let addresses: Vec<String> = self.pools.iter().map(|e| e.key().clone()).collect();
        for address in &addresses {
            if let Some((_, registered)) = self.pools.remove(address) {
                if let Some(reaper) = registered.reaper {
                    reaper.abort();
                }
                registered.pool.close();
            }
        }
        if !addresses.is_empty() {
            info!(count = addresses.len(), "closed redis pools");
        }
    }
}

impl Drop for PoolRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn build_pool(config: &RedisConfig) -> Result<Pool, LockError> {
    let info = config.connection_info()?;
    let timeout = config.connection_timeout();

    Config::from_connection_info(info)
        .builder()
        .map(|b| {
            b.max_size(config.max_active)
                .wait_timeout(Some(timeout))
                .create_timeout(Some(timeout))
                .runtime(Runtime::Tokio1)
                .build()
        })
        .map_err(|e| LockError::Connection(e.to_string()))?
        .map_err(|e| LockError::Connection(e.to_string()))
}

/// Periodically close connections idle for longer than `idle_timeout` and
/// keep at most `max_idle` of the rest.
fn spawn_reaper(pool: Pool, idle_timeout: Duration, max_idle: usize) -> Option<JoinHandle<()>> {
    if idle_timeout.is_zero() {
        return None;
    }
    let runtime = tokio::runtime::Handle::try_current().ok()?;

    Some(runtime.spawn(async move {
        let mut interval = tokio::time::interval(idle_timeout);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            if pool.is_closed() {
                break;
            }

            reap_idle(&pool, idle_timeout, max_idle);
        }
    }))
}

/// Run one reaping pass over the idle connections of `pool`.
fn reap_idle(pool: &Pool, idle_timeout: Duration, max_idle: usize) {
    let kept = Cell::new(0usize);
    pool.retain(|_, metrics| {
        let keep = keep_idle(metrics.last_used(), idle_timeout, kept.get(), max_idle);
        if keep {
            kept.set(kept.get() + 1);
        }
        keep
    });
    debug!(idle = pool.status().available, "reaped idle redis connections");
}

/// Whether an idle connection unused for `last_used` survives a reaping pass
/// in which `kept` connections were already kept.
fn keep_idle(last_used: Duration, idle_timeout: Duration, kept: usize, max_idle: usize) -> bool {
    last_used < idle_timeout && kept < max_idle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reuses_pool_for_same_address() {
        let registry = PoolRegistry::new();

        registry
            .get_or_create(&RedisConfig::new("localhost:6379"))
            .unwrap();
        registry
            .get_or_create(&RedisConfig::new("redis://localhost:6379"))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("localhost:6379").is_some());
    }

    #[tokio::test]
    async fn first_config_decides_pool_size() {
        let registry = PoolRegistry::new();
        let mut small = RedisConfig::new("localhost:6379");
        small.max_active = 2;
        small.max_idle = 1;
        let large = RedisConfig::new("localhost:6379");

        let first = registry.get_or_create(&small).unwrap();
        let second = registry.get_or_create(&large).unwrap();

        assert_eq!(first.status().max_size, 2);
        assert_eq!(second.status().max_size, 2);
    }

    #[tokio::test]
    async fn separate_pools_per_address() {
        let registry = PoolRegistry::new();
        registry
            .get_or_create(&RedisConfig::new("10.0.0.1:6379"))
            .unwrap();
        registry
            .get_or_create(&RedisConfig::new("10.0.0.2:6379"))
            .unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get("10.0.0.3:6379").is_none());
    }

    #[tokio::test]
    async fn invalid_config_registers_nothing() {
        let registry = PoolRegistry::new();
        let mut cfg = RedisConfig::new("localhost:6379");
        cfg.max_active = 0;

        let err = registry.get_or_create(&cfg).unwrap_err();
        assert!(matches!(err, LockError::Connection(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_closes_pools() {
        let registry = PoolRegistry::new();
        let pool = registry
            .get_or_create(&RedisConfig::new("localhost:6379"))
            .unwrap();

        registry.shutdown();

        assert!(registry.is_empty());
        assert!(pool.is_closed());
    }

    #[test]
    fn keep_idle_drops_connections_past_timeout() {
        let timeout = Duration::from_secs(300);
        assert!(keep_idle(Duration::from_secs(10), timeout, 0, 8));
        assert!(!keep_idle(Duration::from_secs(300), timeout, 0, 8));
        assert!(!keep_idle(Duration::from_secs(301), timeout, 0, 8));
    }

    #[test]
    fn keep_idle_caps_at_max_idle() {
        let timeout = Duration::from_secs(300);
        let fresh = Duration::from_secs(1);

        let kept: Vec<bool> = (0..5).map(|kept| keep_idle(fresh, timeout, kept, 3)).collect();
        assert_eq!(kept, [true, true, true, false, false]);
    }

    #[test]
    fn keep_idle_with_zero_max_idle_keeps_nothing() {
        assert!(!keep_idle(Duration::ZERO, Duration::from_secs(300), 0, 0));
    }

    #[test]
    fn no_reaper_when_idle_timeout_is_zero() {
        let pool = build_pool(&RedisConfig::new("localhost:6379")).unwrap();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let _guard = rt.enter();

        assert!(spawn_reaper(pool.clone(), Duration::ZERO, 8).is_none());
        let reaper = spawn_reaper(pool, Duration::from_secs(300), 8).unwrap();
        reaper.abort();
    }

    #[test]
    fn works_outside_a_runtime_without_reaper() {
        let registry = PoolRegistry::new();
        registry
            .get_or_create(&RedisConfig::new("localhost:6379"))
            .unwrap();
        assert_eq!(registry.len(), 1);
    }
}
