//! Lease-based distributed locking over a shared key/value store.
//!
//! A [`LockManager`] acquires a named lock with a single atomic
//! set-if-absent-with-expiry on a [`LockStore`], writing a fresh random
//! [`LockToken`] as the value. Release deletes the key only if the store still
//! carries that token, so a holder whose lease has lapsed can never remove a
//! lock that now belongs to someone else. A holder that crashes leaves a key
//! that expires on its own.
//!
//! Backends live in separate crates; this crate only defines the protocol.

pub mod error;
pub mod handle;
pub mod manager;
pub mod store;
pub mod testing;
pub mod token;

pub use error::{LockError, LockResult};
pub use handle::LockHandle;
pub use manager::{LockManager, Locker, MAX_LEASE, ReleaseMode};
pub use store::LockStore;
pub use token::LockToken;
