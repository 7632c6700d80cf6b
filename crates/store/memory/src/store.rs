use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use leaselock_core::error::LockError;
use leaselock_core::store::LockStore;

/// A stored value and the instant its lease runs out.
#[derive(Debug, Clone)]
struct LeasedValue {
    value: String,
    expires_at: Instant,
}

impl LeasedValue {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process [`LockStore`] backed by a [`DashMap`].
///
/// Expiry is lazy: an expired entry is treated as absent and is replaced or
/// evicted by the next operation on the same key. Time comes from the tokio
/// clock, so tests can pause and advance it.
///
/// Clones share the same map, which makes this suitable for coordinating
/// tasks inside one process and for exercising the protocol in tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLockStore {
    entries: Arc<DashMap<String, LeasedValue>>,
}

impl MemoryLockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or(LockError::InvalidLease(ttl))?;
        let leased = LeasedValue {
            value: value.to_owned(),
            expires_at,
        };

        // The entry guard holds the shard lock, so check and insert are atomic.
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut occupied) if occupied.get().is_expired() => {
                occupied.insert(leased);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(leased);
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, LockError> {
        let value = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value.clone());

        if value.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<u64, LockError> {
        match self.entries.remove(key) {
            Some((_, entry)) if !entry.is_expired() => Ok(1),
            _ => Ok(0),
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, LockError> {
        let removed = self
            .entries
            .remove_if(key, |_, entry| !entry.is_expired() && entry.value == expected);
        Ok(removed.is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use leaselock_core::manager::{LockManager, ReleaseMode};
    use leaselock_core::testing::run_lock_conformance_tests;

    use super::*;

    fn new_manager(store: &MemoryLockStore) -> LockManager {
        LockManager::new(Arc::new(store.clone()))
    }

    #[tokio::test]
    async fn unrepresentable_lease_is_rejected() {
        let store = MemoryLockStore::new();

        let err = store
            .set_if_absent("db1", "token", Duration::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidLease(_)));
        assert!(store.is_empty());

        let mut manager = new_manager(&store);
        let err = manager.acquire("db1", Duration::MAX).await.unwrap_err();
        assert!(matches!(err, LockError::InvalidLease(_)));
        assert!(!manager.is_held());
    }

    #[tokio::test]
    async fn conformance() {
        let store = MemoryLockStore::new();
        run_lock_conformance_tests(Arc::new(store.clone()), "conformance")
            .await
            .expect("lock conformance tests should pass");
        assert!(store.is_empty(), "suite cleans up after itself");
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_ttl() {
        let store = MemoryLockStore::new();
        assert!(store.set_if_absent("k", "v", Duration::from_secs(2)).await.unwrap());
        assert_eq!(store.len(), 1);

        tokio::time::advance(Duration::from_secs(3)).await;

        assert!(store.get("k").await.unwrap().is_none());
        assert_eq!(store.delete("k").await.unwrap(), 0);
        assert!(!store.compare_and_delete("k", "v").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_value_can_be_replaced() {
        let store = MemoryLockStore::new();
        store
            .set_if_absent("k", "old", Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(100)).await;

        assert!(store.set_if_absent("k", "new", Duration::from_secs(1)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_self_heals_after_lease() {
        let store = MemoryLockStore::new();
        let mut h1 = new_manager(&store);
        let mut h2 = new_manager(&store);

        h1.acquire("crashed", Duration::from_secs(2)).await.unwrap();
        assert!(h2.acquire("crashed", Duration::from_secs(2)).await.unwrap_err().is_contended());

        // h1 never releases.
        tokio::time::advance(Duration::from_secs(3)).await;

        h2.acquire("crashed", Duration::from_secs(2))
            .await
            .expect("should acquire after lease expiry");
    }

    #[tokio::test(start_paused = true)]
    async fn db1_handoff_scenario() {
        let store = MemoryLockStore::new();
        let mut h1 = new_manager(&store);
        let mut h2 = new_manager(&store);
        let lease = Duration::from_millis(10_000);

        h1.acquire("db1", lease).await.unwrap();
        let err = h2.acquire("db1", lease).await.unwrap_err();
        assert!(err.is_contended());

        h1.release().await.unwrap();
        assert!(store.get("db1").await.unwrap().is_none());

        h2.acquire("db1", lease).await.unwrap();
        assert!(h2.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_release_does_not_touch_new_owner() {
        for mode in [ReleaseMode::Atomic, ReleaseMode::TwoStep] {
            let store = MemoryLockStore::new();
            let mut h1 = new_manager(&store).with_release_mode(mode);
            let mut h2 = new_manager(&store).with_release_mode(mode);

            h1.acquire("res", Duration::from_secs(1)).await.unwrap();
            tokio::time::advance(Duration::from_secs(2)).await;
            h2.acquire("res", Duration::from_secs(10)).await.unwrap();

            let err = h1.release().await.unwrap_err();
            assert!(
                matches!(err, LockError::OwnershipMismatch { .. }),
                "{mode:?}: {err}"
            );
            assert_eq!(
                store.get("res").await.unwrap().as_deref(),
                Some(h2.handle().token().as_str()),
                "{mode:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn release_after_expiry_without_new_owner() {
        let store = MemoryLockStore::new();
        let mut h1 = new_manager(&store);

        h1.acquire("res", Duration::from_secs(1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let err = h1.release().await.unwrap_err();
        assert!(matches!(err, LockError::OwnershipMismatch { .. }));
        assert!(h1.is_held());
        assert!(h1.abandon().is_held());
        assert!(!h1.is_held());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn only_one_racer_wins() {
        let store = MemoryLockStore::new();
        let mut handles = Vec::new();

        for _ in 0..32 {
            let mut manager = new_manager(&store);
            handles.push(tokio::spawn(async move {
                manager.acquire("race", Duration::from_secs(30)).await
            }));
        }

        let mut winners = 0;
        for h in handles {
            match h.await.expect("task should not panic") {
                Ok(()) => winners += 1,
                Err(err) => assert!(err.is_contended(), "unexpected error: {err}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn workers_take_turns() {
        let store = MemoryLockStore::new();
        let inside = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();

        for _ in 0..10 {
            let mut manager = new_manager(&store);
            let inside = Arc::clone(&inside);
            let completed = Arc::clone(&completed);
            handles.push(tokio::spawn(async move {
                loop {
                    match manager.acquire("db1", Duration::from_millis(10_000)).await {
                        Ok(()) => break,
                        Err(err) if err.is_contended() => {
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                        Err(err) => panic!("acquire failed: {err}"),
                    }
                }

                assert!(
                    !inside.swap(true, Ordering::SeqCst),
                    "two workers inside the critical section"
                );
                tokio::task::yield_now().await;
                inside.store(false, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);

                manager.release().await.expect("release should succeed");
            }));
        }

        for h in handles {
            h.await.expect("task should not panic");
        }
        assert_eq!(completed.load(Ordering::SeqCst), 10);
        assert!(store.is_empty());
    }
}
