use std::sync::Arc;
use std::time::Duration;

use crate::error::LockError;
use crate::manager::{LockManager, ReleaseMode};
use crate::store::LockStore;

const LEASE: Duration = Duration::from_secs(10);

fn key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// Run the full lock conformance test suite against a store.
///
/// Keys are created under `namespace` so runs against a shared backend do
/// not collide. Lease expiry is forced by deleting the key directly.
///
/// # Errors
///
/// Returns an error if a store call fails unexpectedly. Protocol violations
/// panic.
pub async fn run_lock_conformance_tests(
    store: Arc<dyn LockStore>,
    namespace: &str,
) -> Result<(), LockError> {
    test_store_primitives(store.as_ref(), namespace).await?;
    for mode in [ReleaseMode::Atomic, ReleaseMode::TwoStep] {
        test_acquire_and_release(&store, namespace, mode).await?;
        test_handoff(&store, namespace, mode).await?;
        test_release_after_expiry(&store, namespace, mode).await?;
        test_handle_reuse(&store, namespace, mode).await?;
    }
    Ok(())
}

async fn test_store_primitives(store: &dyn LockStore, namespace: &str) -> Result<(), LockError> {
    let key = key(namespace, "primitives");

    assert!(store.get(&key).await?.is_none(), "missing key reads as None");
    assert!(store.set_if_absent(&key, "v1", LEASE).await?);
    assert!(
        !store.set_if_absent(&key, "v2", LEASE).await?,
        "set_if_absent on a present key must be rejected"
    );
    assert_eq!(store.get(&key).await?.as_deref(), Some("v1"));

    assert!(
        !store.compare_and_delete(&key, "v2").await?,
        "compare_and_delete with a foreign value must not delete"
    );
    assert_eq!(store.get(&key).await?.as_deref(), Some("v1"));
    assert!(store.compare_and_delete(&key, "v1").await?);
    assert!(store.get(&key).await?.is_none());

    assert!(store.set_if_absent(&key, "v3", LEASE).await?);
    assert_eq!(store.delete(&key).await?, 1);
    assert_eq!(store.delete(&key).await?, 0, "delete on missing key removes nothing");
    Ok(())
}

async fn test_acquire_and_release(
    store: &Arc<dyn LockStore>,
    namespace: &str,
    mode: ReleaseMode,
) -> Result<(), LockError> {
    let key = key(namespace, &format!("release-{mode:?}"));
    let mut manager = LockManager::new(Arc::clone(store)).with_release_mode(mode);

    manager.acquire(&key, LEASE).await?;
    assert_eq!(
        store.get(&key).await?.as_deref(),
        Some(manager.handle().token().as_str()),
        "the handle's token is stored under the key"
    );

    manager.release().await?;
    assert!(!manager.is_held());
    assert!(store.get(&key).await?.is_none(), "release leaves no residual key");
    Ok(())
}

async fn test_handoff(
    store: &Arc<dyn LockStore>,
    namespace: &str,
    mode: ReleaseMode,
) -> Result<(), LockError> {
    let key = key(namespace, &format!("handoff-{mode:?}"));
    let mut h1 = LockManager::new(Arc::clone(store)).with_release_mode(mode);
    let mut h2 = LockManager::new(Arc::clone(store)).with_release_mode(mode);

    h1.acquire(&key, LEASE).await?;
    let second = h2.acquire(&key, LEASE).await;
    assert!(
        matches!(second, Err(LockError::Contended { .. })),
        "second handle must be contended while the lease is live"
    );

    h1.release().await?;
    h2.acquire(&key, LEASE).await?;
    assert!(h2.is_held());
    h2.release().await?;
    Ok(())
}

async fn test_release_after_expiry(
    store: &Arc<dyn LockStore>,
    namespace: &str,
    mode: ReleaseMode,
) -> Result<(), LockError> {
    let key = key(namespace, &format!("expiry-{mode:?}"));
    let mut h1 = LockManager::new(Arc::clone(store)).with_release_mode(mode);
    let mut h2 = LockManager::new(Arc::clone(store)).with_release_mode(mode);

    h1.acquire(&key, LEASE).await?;
    store.delete(&key).await?;
    h2.acquire(&key, LEASE).await?;

    let result = h1.release().await;
    assert!(
        matches!(result, Err(LockError::OwnershipMismatch { .. })),
        "stale holder must not release the new owner's lock"
    );
    assert!(h1.is_held(), "failed release keeps local state");
    assert_eq!(
        store.get(&key).await?.as_deref(),
        Some(h2.handle().token().as_str()),
        "new owner's key is untouched"
    );

    h2.release().await?;
    Ok(())
}

async fn test_handle_reuse(
    store: &Arc<dyn LockStore>,
    namespace: &str,
    mode: ReleaseMode,
) -> Result<(), LockError> {
    let key = key(namespace, &format!("reuse-{mode:?}"));
    let mut manager = LockManager::new(Arc::clone(store)).with_release_mode(mode);

    manager.acquire(&key, LEASE).await?;
    let first = manager.handle().token().clone();
    manager.release().await?;

    manager.acquire(&key, LEASE).await?;
    assert_ne!(manager.handle().token(), &first, "each acquire mints a new token");
    manager.release().await?;
    Ok(())
}
