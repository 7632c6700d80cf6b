use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{LockError, LockResult};
use crate::handle::LockHandle;
use crate::store::LockStore;
use crate::token::LockToken;

/// Longest lease [`LockManager::acquire`] accepts. Redis rejects expiries
/// that overflow its signed millisecond clock.
pub const MAX_LEASE: Duration = Duration::from_millis(1 << 62);

/// How [`LockManager::release`] verifies ownership before deleting the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseMode {
    /// Compare and delete in a single atomic store operation.
    #[default]
    Atomic,
    /// Read the key, compare it locally, then delete it in a second round
    /// trip.
    ///
    /// The two round trips are not atomic: if the lease lapses after the read
    /// and another owner acquires the key before the delete, the delete
    /// removes the new owner's lock. Use only against stores that cannot run
    /// [`LockStore::compare_and_delete`] atomically.
    TwoStep,
}

/// The two-operation locker interface.
///
/// Object safe, so callers can hold a `Box<dyn Locker>` without caring which
/// store backs it.
#[async_trait]
pub trait Locker: Send {
    /// Acquire `key` for `lease`. See [`LockManager::acquire`].
    async fn acquire(&mut self, key: &str, lease: Duration) -> LockResult<()>;

    /// Release the currently held lock. See [`LockManager::release`].
    async fn release(&mut self) -> LockResult<()>;
}

/// Acquires and releases a single lock at a time against a [`LockStore`].
///
/// Each manager owns one [`LockHandle`]. Run one manager per concurrent
/// contender; managers share a store by cloning the `Arc`.
pub struct LockManager {
    store: Arc<dyn LockStore>,
    release_mode: ReleaseMode,
    handle: LockHandle,
}

impl LockManager {
    /// Create an idle manager over `store` using [`ReleaseMode::Atomic`].
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self {
            store,
            release_mode: ReleaseMode::default(),
            handle: LockHandle::new(),
        }
    }

    #[must_use]
    pub fn with_release_mode(mut self, release_mode: ReleaseMode) -> Self {
        self.release_mode = release_mode;
        self
    }

    pub fn release_mode(&self) -> ReleaseMode {
        self.release_mode
    }

    /// The current ownership state.
    pub fn handle(&self) -> &LockHandle {
        &self.handle
    }

    pub fn is_held(&self) -> bool {
        self.handle.is_held()
    }

    /// Forget the held lock locally without touching the store and return
    /// the previous handle. The key, if still present, expires with its
    /// lease.
    pub fn abandon(&mut self) -> LockHandle {
        std::mem::take(&mut self.handle)
    }

    /// Try to acquire `key` for `lease`.
    ///
    /// A single atomic set-if-absent with expiry decides ownership. On
    /// success the handle records the key and a freshly generated token. If
    /// another owner holds the key, returns [`LockError::Contended`] and the
    /// handle stays idle; retrying is up to the caller.
    #[instrument(skip_all, fields(lock.key = %key, lease = ?lease))]
    pub async fn acquire(&mut self, key: &str, lease: Duration) -> LockResult<()> {
        if key.is_empty() {
            return Err(LockError::InvalidKey("lock key must not be empty".to_owned()));
        }
        if lease.as_millis() == 0 || lease > MAX_LEASE {
            return Err(LockError::InvalidLease(lease));
        }
        if self.handle.is_held() {
            return Err(LockError::AlreadyHeld {
                key: self.handle.key().to_owned(),
            });
        }

        let token = LockToken::generate();
        let applied = self.store.set_if_absent(key, token.as_str(), lease).await?;
        if !applied {
            debug!("lock held by another owner");
            return Err(LockError::Contended {
                key: key.to_owned(),
            });
        }

        self.handle.set(key.to_owned(), token);
        debug!("lock acquired");
        Ok(())
    }

    /// Release the held lock if the store still carries this handle's token.
    ///
    /// Fails with [`LockError::NotLocked`] on an idle handle and with
    /// [`LockError::OwnershipMismatch`] if the lease lapsed and the key is
    /// gone or owned by someone else. The handle is cleared only on success;
    /// after a failure it still reports the lock as held.
    #[instrument(skip_all, fields(lock.key = %self.handle.key(), mode = ?self.release_mode))]
    pub async fn release(&mut self) -> LockResult<()> {
        if !self.handle.is_held() {
            return Err(LockError::NotLocked);
        }

        match self.release_mode {
            ReleaseMode::Atomic => self.release_atomic().await?,
            ReleaseMode::TwoStep => self.release_two_step().await?,
        }

        self.handle.clear();
        debug!("lock released");
        Ok(())
    }

    async fn release_atomic(&self) -> LockResult<()> {
        let key = self.handle.key();
        let removed = self
            .store
            .compare_and_delete(key, self.handle.token().as_str())
            .await?;
        if !removed {
            warn!("lock token no longer matches, not deleting");
            return Err(LockError::OwnershipMismatch {
                key: key.to_owned(),
            });
        }
        Ok(())
    }

    async fn release_two_step(&self) -> LockResult<()> {
        let key = self.handle.key();
        let current = self.store.get(key).await?;
        if current.as_deref() != Some(self.handle.token().as_str()) {
            warn!("lock token no longer matches, not deleting");
            return Err(LockError::OwnershipMismatch {
                key: key.to_owned(),
            });
        }

        // The lease may lapse between the read above and this delete.
        let removed = self.store.delete(key).await?;
        if removed == 0 {
            warn!("lock expired between read and delete");
            return Err(LockError::AlreadyUnlocked {
                key: key.to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("release_mode", &self.release_mode)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Locker for LockManager {
    async fn acquire(&mut self, key: &str, lease: Duration) -> LockResult<()> {
        LockManager::acquire(self, key, lease).await
    }

    async fn release(&mut self) -> LockResult<()> {
        LockManager::release(self).await
    }
}
