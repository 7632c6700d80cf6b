use std::time::Duration;

use async_trait::async_trait;

use crate::error::LockError;

/// The primitives a key/value backend must offer to arbitrate locks.
///
/// Each call borrows a connection for its own duration only. Implementations
/// must be safe for concurrent use from many managers, and
/// [`set_if_absent`](Self::set_if_absent) must be atomic with respect to all
/// other callers: it is the only place mutual exclusion is decided.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `value` with the given expiry, only if `key` is absent.
    /// Returns `true` if the value was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockError>;

    /// Read the value at `key`. Returns `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, LockError>;

    /// Delete `key` unconditionally. Returns the number of keys removed.
    async fn delete(&self, key: &str) -> Result<u64, LockError>;

    /// Atomically delete `key` only if its value equals `expected`.
    /// Returns `true` if the key was removed.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockError>;
}
