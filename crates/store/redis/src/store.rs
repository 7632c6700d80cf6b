use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};

use leaselock_core::error::LockError;
use leaselock_core::store::LockStore;

use crate::config::RedisConfig;
use crate::registry::PoolRegistry;
use crate::scripts;

static COMPARE_AND_DELETE: LazyLock<Script> =
    LazyLock::new(|| Script::new(scripts::COMPARE_AND_DELETE));

/// Redis-backed implementation of [`LockStore`].
///
/// Acquire is a plain `SET key token NX PX ttl`. Atomic release runs a Lua
/// script that compares the stored token and deletes in one step. Every call
/// checks a connection out of the pool and returns it when the call ends.
///
/// Mutual exclusion holds for a single Redis primary. Replication is
/// asynchronous, so a failover right after an acquire can lose the key and
/// let a second owner in.
#[derive(Clone)]
pub struct RedisLockStore {
    pool: Pool,
}

impl RedisLockStore {
    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool) -> Self {
        Self { pool }
    }

    /// Use the registry's pool for `config.address`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Connection`] if the pool cannot be created.
    pub fn from_registry(
        registry: &PoolRegistry,
        config: &RedisConfig,
    ) -> Result<Self, LockError> {
        registry.get_or_create(config).map(Self::from_pool)
    }

    /// Obtain a connection from the pool.
    async fn conn(&self) -> Result<deadpool_redis::Connection, LockError> {
        self.pool
            .get()
            .await
            .map_err(|e| LockError::Connection(e.to_string()))
    }
}

/// Interpret the reply of `SET ... NX`: `OK` when written, nil when the key
/// already exists.
fn set_applied(reply: Option<&str>) -> Result<bool, LockError> {
    match reply {
        Some("OK") => Ok(true),
        None => Ok(false),
        Some(other) => Err(LockError::Backend(format!(
            "unexpected reply to SET NX: {other}"
        ))),
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).map_err(|_| LockError::InvalidLease(ttl))?;

        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        set_applied(reply.as_deref())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LockError> {
        let mut conn = self.conn().await?;
        conn.get(key)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<u64, LockError> {
        let mut conn = self.conn().await?;
        conn.del(key)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockError> {
        let mut conn = self.conn().await?;
        let removed: i64 = COMPARE_AND_DELETE
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        Ok(removed == 1)
    }
}
