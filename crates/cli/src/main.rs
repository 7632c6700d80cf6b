//! leaselock CLI
//!
//! Acquire, hold, and inspect lease-based locks stored in Redis.

mod commands;
mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use leaselock_core::LockStore;
use leaselock_memory::MemoryLockStore;
use leaselock_redis::{PoolRegistry, RedisConfig, RedisLockStore};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use crate::commands::ExitError;
use crate::config::LeaselockConfig;

/// Lease-based distributed locks backed by Redis.
#[derive(Parser, Debug)]
#[command(name = "leaselock", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        env = "LEASELOCK_CONFIG",
        default_value = "leaselock.toml",
        global = true
    )]
    config: PathBuf,

    /// Lock store to use.
    #[arg(long, default_value = "redis", global = true)]
    backend: Backend,

    /// Override the Redis address from the configuration file.
    #[arg(long, env = "LEASELOCK_REDIS_ADDRESS", global = true)]
    address: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Redis,
    /// In-process store; only useful with `contend`.
    Memory,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire a lock, hold it for a while, then release it.
    Hold(commands::hold::HoldArgs),
    /// Run concurrent workers that take turns on one lock.
    Contend(commands::contend::ContendArgs),
    /// Show the token currently stored under a lock key.
    Inspect(commands::inspect::InspectArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<ExitError>() {
            Some(exit) => {
                eprintln!("{exit}");
                ExitCode::from(exit.code)
            }
            None => {
                eprintln!("Error: {err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = LeaselockConfig::load(&cli.config)?;
    if !cli.config.exists() {
        info!(path = %cli.config.display(), "config file not found, using defaults");
    }
    if let Some(address) = cli.address {
        config.redis.address = address;
    }

    let registry = PoolRegistry::new();
    let store = open_store(cli.backend, &config.redis, &registry)?;

    let result = match cli.command {
        Command::Hold(args) => commands::hold::run(store, &config.lock, &args).await,
        Command::Contend(args) => commands::contend::run(store, &config.lock, &args).await,
        Command::Inspect(args) => commands::inspect::run(store.as_ref(), &args).await,
    };

    registry.shutdown();
    result
}

fn open_store(
    backend: Backend,
    config: &RedisConfig,
    registry: &PoolRegistry,
) -> anyhow::Result<Arc<dyn LockStore>> {
    match backend {
        Backend::Redis => {
            let store = RedisLockStore::from_registry(registry, config)?;
            Ok(Arc::new(store))
        }
        Backend::Memory => Ok(Arc::new(MemoryLockStore::new())),
    }
}
