//! Cache key derivation.
//!
//! Every tier addresses an entry by the same fingerprint of
//! `(model name, text)`, so the one logical entry maps to the one physical
//! key everywhere, on every instance.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Deterministic fingerprint of a `(model name, text)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a `(model name, text)` pair.
    pub fn derive(model_name: &str, text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(model_name.as_bytes());
        hasher.update(b":");
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The key as a hexadecimal string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_is_deterministic() {
        let a = CacheKey::derive("text-embedding-3-small", "hello world");
        let b = CacheKey::derive("text-embedding-3-small", "hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_is_fixed_width_hex() {
        let key = CacheKey::derive("model", "text");
        assert_eq!(key.as_str().len(), 64);
        assert!(key.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_separates_model_and_text() {
        // "ab" + "c" must not collide with "a" + "bc"
        let a = CacheKey::derive("ab", "c");
        let b = CacheKey::derive("a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_different_models_different_keys() {
        let a = CacheKey::derive("model-a", "same text");
        let b = CacheKey::derive("model-b", "same text");
        assert_ne!(a, b);
    }
}
