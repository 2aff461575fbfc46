//! Embedded cache engine.
//!
//! Values are JSON-serialized and gzip-compressed into a SQLite store. Keys are
//! namespaced and hashed to a fixed width. Logical caches share one pooled
//! connection per `(root, store)` pair.
//!
//! ```toml
//! [cache]
//! root = "cache"
//! store = "pagewright"
//! max_size_bytes = 67108864
//! autorecover = true
//! default_ttl_secs = 604800
//! ```

mod codec;
mod config;
mod engine;
mod error;
mod keys;
mod lock;
mod pool;
mod store;

pub use codec::CodecError;
pub use config::CacheConfig;
pub use engine::{Cache, EVICTION_BUDGET, Ttl, WRITE_RETRIES};
pub use error::CacheError;
pub use keys::{KEY_WIDTH, StoredKey, short_hash};
pub use pool::{CachePool, StoreId};
pub use store::StoreStats;
