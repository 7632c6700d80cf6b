use crate::token::LockToken;

/// Ownership state for one lock: the contested key and the token written
/// under it.
///
/// A handle starts empty. Only [`LockManager`](crate::LockManager) fills it
/// (on a successful acquire) or clears it (on a successful release).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockHandle {
    key: String,
    token: LockToken,
}

impl LockHandle {
    /// Create an empty handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The key of the held lock, or `""` when idle.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The token of the held lock, empty when idle.
    #[must_use]
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Whether this handle believes it holds a lock.
    ///
    /// This is local state only; the lease may have lapsed in the store.
    #[must_use]
    pub fn is_held(&self) -> bool {
        !self.key.is_empty() && !self.token.is_empty()
    }

    pub(crate) fn set(&mut self, key: String, token: LockToken) {
        self.key = key;
        self.token = token;
    }

    pub(crate) fn clear(&mut self) {
        self.key.clear();
        self.token = LockToken::default();
    }
}
