use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use leaselock_core::{LockManager, LockStore};
use tracing::info;

use super::ExitError;
use crate::config::LockConfig;

/// Exit code when another owner holds the key.
pub const EXIT_CONTENDED: u8 = 2;
/// Exit code when the lease ran out before release.
pub const EXIT_LOST: u8 = 3;

#[derive(Args, Debug)]
pub struct HoldArgs {
    /// Lock key.
    pub key: String,
    /// Lease in milliseconds. Defaults to `lock.default_lease_ms`.
    #[arg(long)]
    pub lease_ms: Option<u64>,
    /// How long to hold the lock before releasing it, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub hold_ms: u64,
}

pub async fn run(
    store: Arc<dyn LockStore>,
    lock: &LockConfig,
    args: &HoldArgs,
) -> anyhow::Result<()> {
    let lease = lock.lease(args.lease_ms);
    let mut manager = LockManager::new(store).with_release_mode(lock.release_mode);

    match manager.acquire(&args.key, lease).await {
        Ok(()) => {}
        Err(e) if e.is_contended() => {
            return Err(ExitError::new(
                EXIT_CONTENDED,
                format!("{} is held by another owner.", args.key),
            )
            .into());
        }
        Err(e) => return Err(e.into()),
    }
    println!(
        "Acquired {} for {} ms (token {}).",
        args.key,
        lease.as_millis(),
        manager.handle().token()
    );

    tokio::select! {
        () = tokio::time::sleep(Duration::from_millis(args.hold_ms)) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, releasing early");
        }
    }

    match manager.release().await {
        Ok(()) => {
            println!("Released {}.", args.key);
            Ok(())
        }
        Err(e) if e.is_recoverable() => Err(ExitError::new(
            EXIT_LOST,
            format!("{} was lost before release: {e}", args.key),
        )
        .into()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use leaselock_memory::MemoryLockStore;

    use super::*;

    fn args(lease_ms: u64, hold_ms: u64) -> HoldArgs {
        HoldArgs {
            key: "db1".into(),
            lease_ms: Some(lease_ms),
            hold_ms,
        }
    }

    fn exit_code(err: &anyhow::Error) -> Option<u8> {
        err.downcast_ref::<ExitError>().map(|e| e.code)
    }

    #[tokio::test(start_paused = true)]
    async fn holds_and_releases() {
        let store = Arc::new(MemoryLockStore::new());

        run(store.clone(), &LockConfig::default(), &args(10_000, 100))
            .await
            .unwrap();

        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn contended_key_returns_exit_code() {
        let store = Arc::new(MemoryLockStore::new());
        let mut owner = LockManager::new(store.clone());
        owner.acquire("db1", Duration::from_secs(60)).await.unwrap();

        let err = run(store.clone(), &LockConfig::default(), &args(10_000, 100))
            .await
            .unwrap_err();

        assert_eq!(exit_code(&err), Some(EXIT_CONTENDED));
        assert!(owner.is_held());
        assert!(!store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn lease_lost_while_holding_returns_exit_code() {
        let store = Arc::new(MemoryLockStore::new());

        let err = run(store.clone(), &LockConfig::default(), &args(50, 1_000))
            .await
            .unwrap_err();

        assert_eq!(exit_code(&err), Some(EXIT_LOST));
        assert!(store.is_empty());
    }
}
