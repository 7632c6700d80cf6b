//! Redis lock store for leaselock.
//!
//! This crate provides a Redis-backed implementation of the [`LockStore`]
//! trait from `leaselock-core`, and a [`PoolRegistry`] that owns one
//! `deadpool-redis` pool per Redis address.
//!
//! # Consistency
//!
//! | Deployment | Mutual Exclusion | Notes |
//! |------------|------------------|-------|
//! | Single instance | Strong | Full mutual exclusion while leases are live |
//! | Sentinel / Cluster | Weak | A lock may be lost during failover |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use leaselock_core::LockManager;
//! use leaselock_redis::{PoolRegistry, RedisConfig, RedisLockStore};
//!
//! let registry = PoolRegistry::new();
//! let store = RedisLockStore::from_registry(&registry, &RedisConfig::new("localhost:6379"))?;
//! let mut lock = LockManager::new(Arc::new(store));
//!
//! lock.acquire("db1", Duration::from_secs(10)).await?;
//! // Critical section...
//! lock.release().await?;
//! ```
//!
//! [`LockStore`]: leaselock_core::LockStore

mod config;
mod registry;
mod scripts;
mod store;

pub use config::{ConfigError, RedisConfig};
pub use registry::PoolRegistry;
pub use store::RedisLockStore;
