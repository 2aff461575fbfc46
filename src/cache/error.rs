use std::path::PathBuf;

use thiserror::Error;

use super::codec::CodecError;
use super::store;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("cache io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("cache store is full after {attempts} eviction attempts")]
    Full { attempts: usize },
    #[error("cache store `{}` is corrupt and could not be recovered: {source}", store.display())]
    Corruption {
        store: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
}

impl CacheError {
    /// Storage faults that recreating the store file can repair.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Storage(err) if store::is_structural(err))
    }
}
