//! Process-wide pool of open store connections.
//!
//! One connection per `(root, store)` pair, shared by every logical cache that
//! points at the same file. The pool is an explicit value owned by the
//! [`Engine`](crate::Engine); connections open on first use and are released
//! by [`CachePool::close_all`] (or when the pool is dropped).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rusqlite::Connection;
use tracing::{debug, warn};

use super::error::CacheError;
use super::store;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreId {
    root: PathBuf,
    name: String,
}

impl StoreId {
    pub fn new(root: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            name: name.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.root.join(format!("{}.sqlite", self.name))
    }
}

pub(crate) type SharedConnection = Arc<Mutex<Connection>>;

#[derive(Default)]
pub struct CachePool {
    connections: DashMap<StoreId, SharedConnection>,
}

impl CachePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection for `id`, opening (and initializing) the store on first use.
    pub(crate) fn acquire(
        &self,
        id: &StoreId,
        max_size_bytes: u64,
    ) -> Result<SharedConnection, CacheError> {
        if let Some(existing) = self.connections.get(id) {
            return Ok(Arc::clone(existing.value()));
        }

        let entry = self.connections.entry(id.clone()).or_try_insert_with(|| {
            fs::create_dir_all(&id.root)?;
            let conn = store::open(&id.path(), max_size_bytes)?;
            debug!(
                target = "cache::pool",
                op = "acquire",
                result = "opened",
                path = %id.path().display(),
                "Opened cache store"
            );
            Ok::<_, CacheError>(Arc::new(Mutex::new(conn)))
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Forget the pooled connection for `id`. Other holders keep their handle
    /// until they drop it.
    pub(crate) fn discard(&self, id: &StoreId) {
        self.connections.remove(id);
    }

    /// Drop the pooled connection and delete the store file with its WAL
    /// sidecars, so the next acquire starts from an empty store.
    pub(crate) fn recreate(&self, id: &StoreId) -> Result<(), CacheError> {
        self.discard(id);
        let path = id.path();
        for candidate in [path.clone(), sidecar(&path, "-wal"), sidecar(&path, "-shm")] {
            match fs::remove_file(&candidate) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        target = "cache::pool",
                        op = "recreate",
                        result = "remove_failed",
                        path = %candidate.display(),
                        error = %err,
                        "Failed to delete cache store file"
                    );
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    pub fn open_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every pooled connection.
    pub fn close_all(&self) {
        self.connections.clear();
    }
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_connection_per_store() {
        let dir = tempfile::tempdir().unwrap();
        let pool = CachePool::new();
        let id = StoreId::new(dir.path(), "main");

        let first = pool.acquire(&id, 1 << 20).unwrap();
        let second = pool.acquire(&id, 1 << 20).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = pool.acquire(&StoreId::new(dir.path(), "other"), 1 << 20).unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(pool.open_count(), 2);

        pool.close_all();
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn recreate_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let pool = CachePool::new();
        let id = StoreId::new(dir.path(), "main");

        drop(pool.acquire(&id, 1 << 20).unwrap());
        assert!(id.path().exists());
        pool.recreate(&id).unwrap();
        assert!(!id.path().exists());
        assert_eq!(pool.open_count(), 0);
    }

    #[test]
    fn sidecar_appends_suffix() {
        assert_eq!(
            sidecar(Path::new("/tmp/a.sqlite"), "-wal"),
            PathBuf::from("/tmp/a.sqlite-wal")
        );
    }
}
