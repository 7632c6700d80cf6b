use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Args;
use leaselock_core::{LockManager, LockStore, ReleaseMode};
use tracing::{debug, info};

use crate::config::LockConfig;

#[derive(Args, Debug)]
pub struct ContendArgs {
    /// Lock key all workers compete for.
    #[arg(long, default_value = "db1")]
    pub key: String,
    /// Number of concurrent workers.
    #[arg(long, default_value_t = 10)]
    pub workers: usize,
    /// Lease in milliseconds. Defaults to `lock.default_lease_ms`.
    #[arg(long)]
    pub lease_ms: Option<u64>,
    /// Pause between attempts while the lock is contended.
    #[arg(long, default_value_t = 10)]
    pub retry_ms: u64,
    /// Give up after this many contended attempts.
    #[arg(long, default_value_t = 1000)]
    pub max_attempts: u32,
    /// Time spent inside the critical section.
    #[arg(long, default_value_t = 0)]
    pub work_ms: u64,
}

/// Outcome of a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker: usize,
    pub attempts: u32,
}

pub async fn run(
    store: Arc<dyn LockStore>,
    lock: &LockConfig,
    args: &ContendArgs,
) -> anyhow::Result<()> {
    let reports = contend(store, lock.release_mode, lock.lease(args.lease_ms), args).await?;

    println!("{:<8} ATTEMPTS", "WORKER");
    for report in &reports {
        println!("{:<8} {}", report.worker, report.attempts);
    }
    let total: u32 = reports.iter().map(|r| r.attempts).sum();
    println!("\n{} workers acquired {} in {total} attempts.", reports.len(), args.key);
    Ok(())
}

/// Run `args.workers` workers that each acquire and release `args.key` once.
///
/// Fails if two workers are ever inside the critical section at the same
/// time, or if a worker runs out of attempts.
pub async fn contend(
    store: Arc<dyn LockStore>,
    release_mode: ReleaseMode,
    lease: Duration,
    args: &ContendArgs,
) -> anyhow::Result<Vec<WorkerReport>> {
    let busy = Arc::new(AtomicBool::new(false));
    let retry = Duration::from_millis(args.retry_ms);
    let work = Duration::from_millis(args.work_ms);

    let mut tasks = Vec::with_capacity(args.workers);
    for worker in 0..args.workers {
        let mut manager = LockManager::new(Arc::clone(&store)).with_release_mode(release_mode);
        let busy = Arc::clone(&busy);
        let key = args.key.clone();
        let max_attempts = args.max_attempts;

        tasks.push(tokio::spawn(async move {
            let mut attempts = 0;
            loop {
                attempts += 1;
                match manager.acquire(&key, lease).await {
                    Ok(()) => break,
                    Err(e) if e.is_contended() && attempts < max_attempts => {
                        debug!(worker, attempts, "lock contended, retrying");
                        tokio::time::sleep(retry).await;
                    }
                    Err(e) => return Err(anyhow::Error::new(e)),
                }
            }

            anyhow::ensure!(
                !busy.swap(true, Ordering::SeqCst),
                "worker {worker} entered the critical section while it was occupied"
            );
            if !work.is_zero() {
                tokio::time::sleep(work).await;
            }
            busy.store(false, Ordering::SeqCst);

            manager.release().await?;
            info!(worker, attempts, "worker done");
            Ok(WorkerReport { worker, attempts })
        }));
    }

    let mut reports = Vec::with_capacity(tasks.len());
    for task in tasks {
        reports.push(task.await??);
    }
    Ok(reports)
}
