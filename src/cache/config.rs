//! Cache engine configuration.
//!
//! Populated from the `[cache]` section of `pagewright.toml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_ROOT: &str = "cache";
const DEFAULT_STORE: &str = "pagewright";
const DEFAULT_MAX_SIZE_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Cache configuration from `pagewright.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the store files.
    pub root: PathBuf,
    /// Store file name (without extension) inside `root`.
    pub store: String,
    /// Approximate upper bound for the store size, enforced through page accounting.
    pub max_size_bytes: u64,
    /// Recreate the store once after a storage-level fault.
    pub autorecover: bool,
    /// Expiry applied by callers that do not pass an explicit ttl.
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            store: DEFAULT_STORE.to_string(),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            autorecover: true,
            default_ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            root: settings.root.clone(),
            store: settings.store.clone(),
            max_size_bytes: settings.max_size_bytes.get(),
            autorecover: settings.autorecover,
            default_ttl_secs: settings.default_ttl.as_secs(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    /// Path of the store file for this configuration.
    pub fn store_path(&self) -> PathBuf {
        self.root.join(format!("{}.sqlite", self.store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.autorecover);
        assert_eq!(config.store, "pagewright");
        assert_eq!(config.max_size_bytes, 64 * 1024 * 1024);
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(604_800)));
    }

    #[test]
    fn zero_ttl_means_no_expiry() {
        let config = CacheConfig {
            default_ttl_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.default_ttl(), None);
    }

    #[test]
    fn store_path_joins_root_and_name() {
        let config = CacheConfig {
            root: PathBuf::from("/var/cache/pw"),
            store: "main".to_string(),
            ..Default::default()
        };
        assert_eq!(config.store_path(), PathBuf::from("/var/cache/pw/main.sqlite"));
    }
}
