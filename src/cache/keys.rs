//! Cache key hashing.
//!
//! Logical keys are namespaced (`namespace \0 key`) and hashed to a fixed-width
//! SHA-256 digest before they reach the store.

use sha2::{Digest, Sha256};

/// Width of a stored key in bytes.
pub const KEY_WIDTH: usize = 32;

/// A namespaced, hashed cache key as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoredKey(Vec<u8>);

impl StoredKey {
    pub fn new(namespace: &str, key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        Self(hasher.finalize().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Short content hash used for compact identifiers such as token refs.
pub fn short_hash(value: &str, width: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(width);
    digest
}
