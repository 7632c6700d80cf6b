use std::time::Duration;

use thiserror::Error;

/// Errors from lock stores and lock managers.
///
/// [`Contended`](Self::Contended), [`NotLocked`](Self::NotLocked),
/// [`OwnershipMismatch`](Self::OwnershipMismatch) and
/// [`AlreadyUnlocked`](Self::AlreadyUnlocked) are expected outcomes of the
/// protocol and are never retried internally. Connection and backend errors
/// are surfaced as-is.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("lock {key} is held by another owner")]
    Contended { key: String },

    #[error("handle does not hold a lock")]
    NotLocked,

    #[error("lock {key} is no longer owned by this handle")]
    OwnershipMismatch { key: String },

    #[error("lock {key} was already unlocked")]
    AlreadyUnlocked { key: String },

    #[error("handle already holds lock {key}")]
    AlreadyHeld { key: String },

    #[error("invalid lock key: {0}")]
    InvalidKey(String),

    #[error("invalid lease {0:?}: must be between one millisecond and MAX_LEASE")]
    InvalidLease(Duration),
}

impl LockError {
    /// Returns `true` for protocol outcomes the caller may act on (retry,
    /// back off, or abandon) rather than hard failures.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Contended { .. }
                | Self::NotLocked
                | Self::OwnershipMismatch { .. }
                | Self::AlreadyUnlocked { .. }
        )
    }

    /// Returns `true` if an acquire was rejected because another owner holds
    /// the key.
    #[must_use]
    pub fn is_contended(&self) -> bool {
        matches!(self, Self::Contended { .. })
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;
