use std::fmt;

use uuid::Uuid;

/// Opaque ownership proof written as the value of a held lock key.
///
/// Tokens are random v4 UUIDs, so two acquisitions never share one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    /// Generate a fresh token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn generated_tokens_are_unique() {
        let tokens: HashSet<_> = (0..1000).map(|_| LockToken::generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn default_token_is_empty() {
        assert!(LockToken::default().is_empty());
        assert!(!LockToken::generate().is_empty());
    }
}
