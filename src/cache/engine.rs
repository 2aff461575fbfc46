//! Namespaced get-or-compute cache over a pooled SQLite store.
//!
//! Storage faults are repaired once per call by recreating the store file
//! (autorecover). Writes that hit the page budget evict random entries and
//! retry a bounded number of times.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use rusqlite::Connection;
use serde::{Serialize, de::DeserializeOwned};
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::codec;
use super::config::CacheConfig;
use super::error::CacheError;
use super::keys::StoredKey;
use super::lock::mutex_lock;
use super::pool::{CachePool, StoreId};
use super::store::{self, StoreStats};

const METRIC_CACHE_HIT: &str = "pagewright_cache_hit_total";
const METRIC_CACHE_MISS: &str = "pagewright_cache_miss_total";
const METRIC_CACHE_RECOVER: &str = "pagewright_cache_recover_total";
const METRIC_CACHE_EVICT: &str = "pagewright_cache_evict_total";

/// Entries removed per eviction round.
pub const EVICTION_BUDGET: usize = 100;
/// Eviction rounds attempted before a write is abandoned.
pub const WRITE_RETRIES: usize = 10;

/// Lifetime of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// The store's configured default.
    #[default]
    Default,
    Never,
    After(Duration),
}

impl From<Duration> for Ttl {
    fn from(ttl: Duration) -> Self {
        Self::After(ttl)
    }
}

/// A logical cache: one namespace inside one pooled store.
#[derive(Clone)]
pub struct Cache {
    pool: Arc<CachePool>,
    store: StoreId,
    config: Arc<CacheConfig>,
    namespace: String,
}

impl Cache {
    pub fn new(pool: Arc<CachePool>, config: CacheConfig, namespace: impl Into<String>) -> Self {
        let store = StoreId::new(config.root.clone(), config.store.clone());
        Self {
            pool,
            store,
            config: Arc::new(config),
            namespace: namespace.into(),
        }
    }

    /// Another logical cache sharing this one's store.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
            store: self.store.clone(),
            config: Arc::clone(&self.config),
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `key`. Corrupt or undecodable values are dropped and reported
    /// as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        let stored = StoredKey::new(&self.namespace, key);
        let now = now_secs();
        let blob = self.run("get", |conn| Ok(store::read(conn, stored.as_bytes(), now)?));
        let Some(blob) = self.tolerate(blob, None)? else {
            counter!(METRIC_CACHE_MISS).increment(1);
            return Ok(None);
        };

        match codec::decode(&blob) {
            Ok(value) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Ok(Some(value))
            }
            Err(err) => {
                counter!(METRIC_CACHE_MISS).increment(1);
                warn!(
                    target = "cache::engine",
                    op = "get",
                    result = "corrupt_value",
                    namespace = %self.namespace,
                    key = %stored.to_hex(),
                    error = %err,
                    "Dropping undecodable cache value"
                );
                let removed = self.run("get", |conn| Ok(store::remove(conn, stored.as_bytes())?));
                self.tolerate(removed, ())?;
                Ok(None)
            }
        }
    }

    /// Look up `key`, computing and storing the value on a miss. A `None`
    /// from `compute` is not cached. Failing to store a computed value is
    /// logged and does not discard the value.
    pub fn get_or_compute<T, F>(
        &self,
        key: &str,
        ttl: Ttl,
        compute: F,
    ) -> Result<Option<T>, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Option<T>,
    {
        if let Some(value) = self.get(key)? {
            return Ok(Some(value));
        }

        let Some(value) = compute() else {
            return Ok(None);
        };
        if let Err(err) = self.set(key, &value, ttl) {
            warn!(
                target = "cache::engine",
                op = "get_or_compute",
                result = "store_failed",
                namespace = %self.namespace,
                error = %err,
                "Computed value could not be cached"
            );
        }
        Ok(Some(value))
    }

    /// Store `value` under `key`. A zero configured default means no expiry.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Ttl,
    ) -> Result<(), CacheError> {
        let stored = StoredKey::new(&self.namespace, key);
        let blob = codec::encode(value)?;
        let ttl = match ttl {
            Ttl::Default => self.config.default_ttl(),
            Ttl::Never => None,
            Ttl::After(ttl) => Some(ttl),
        };
        let expires =
            ttl.map(|ttl| now_secs().saturating_add(ttl.as_secs().min(i64::MAX as u64) as i64));

        let written = self.run("set", |conn| {
            write_with_eviction(conn, stored.as_bytes(), &blob, expires)
        });
        self.tolerate(written, ())
    }

    pub fn delete(&self, key: &str) -> Result<(), CacheError> {
        let stored = StoredKey::new(&self.namespace, key);
        let removed = self.run("delete", |conn| Ok(store::remove(conn, stored.as_bytes())?));
        self.tolerate(removed, ())
    }

    /// Page accounting for the whole store (all namespaces).
    pub fn stats(&self) -> Result<StoreStats, CacheError> {
        self.run("stats", |conn| Ok(store::stats(conn)?))
    }

    /// Remove every entry in the store (all namespaces).
    pub fn clear(&self) -> Result<(), CacheError> {
        let cleared = self.run("clear", |conn| Ok(store::clear(conn)?));
        self.tolerate(cleared, ())
    }

    /// With autorecover disabled a broken store degrades reads and writes to
    /// misses and no-ops instead of failing the caller.
    fn tolerate<R>(&self, result: Result<R, CacheError>, fallback: R) -> Result<R, CacheError> {
        match result {
            Err(err) if err.is_structural() && !self.config.autorecover => Ok(fallback),
            other => other,
        }
    }

    /// Run `work` against the pooled connection, recreating the store once
    /// if it fails with a storage fault.
    fn run<R>(
        &self,
        op: &'static str,
        mut work: impl FnMut(&mut Connection) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let err = match self.attempt(&mut work) {
            Err(err) if err.is_structural() => err,
            other => return other,
        };

        if !self.config.autorecover {
            warn!(
                target = "cache::engine",
                op,
                result = "degraded",
                store = %self.store.path().display(),
                error = %err,
                "Cache store failed and autorecover is disabled"
            );
            return Err(err);
        }

        warn!(
            target = "cache::engine",
            op,
            result = "recovering",
            store = %self.store.path().display(),
            error = %err,
            "Recreating cache store after storage fault"
        );
        counter!(METRIC_CACHE_RECOVER).increment(1);
        self.pool.recreate(&self.store)?;

        match self.attempt(&mut work) {
            Ok(value) => {
                debug!(
                    target = "cache::engine",
                    op,
                    result = "recovered",
                    store = %self.store.path().display(),
                    "Cache store recreated"
                );
                Ok(value)
            }
            Err(CacheError::Storage(source)) if store::is_structural(&source) => {
                Err(CacheError::Corruption {
                    store: self.store.path(),
                    source,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn attempt<R>(
        &self,
        work: &mut impl FnMut(&mut Connection) -> Result<R, CacheError>,
    ) -> Result<R, CacheError> {
        let shared = self.pool.acquire(&self.store, self.config.max_size_bytes)?;
        let mut conn = mutex_lock(&shared, "cache::engine", "attempt");
        work(&mut conn)
    }
}

/// Write, evicting on `SQLITE_FULL` up to [`WRITE_RETRIES`] times.
fn write_with_eviction(
    conn: &mut Connection,
    key: &[u8],
    blob: &[u8],
    expires: Option<i64>,
) -> Result<(), CacheError> {
    let mut attempts = 0;
    loop {
        match store::write(conn, key, blob, expires) {
            Ok(()) => return Ok(()),
            Err(err) if store::is_full(&err) => {
                if attempts == WRITE_RETRIES {
                    break;
                }
                attempts += 1;
                let removed = store::make_space(conn, EVICTION_BUDGET)?;
                counter!(METRIC_CACHE_EVICT).increment(removed as u64);
                debug!(
                    target = "cache::engine",
                    op = "make_space",
                    result = "evicted",
                    removed,
                    attempt = attempts,
                    "Evicted cache entries to make space"
                );
                if removed == 0 {
                    break;
                }
            }
            Err(err) => return Err(err.into()),
        }
    }

    warn!(
        target = "cache::engine",
        op = "set",
        result = "abandoned",
        attempts,
        size = blob.len(),
        "Cache write abandoned: store is full"
    );
    Err(CacheError::Full { attempts })
}

fn now_secs() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
