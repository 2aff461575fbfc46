use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use tracing::debug;
use url::Url;

use super::RetrievalError;
use crate::domain::{CacheSalt, ResourceRetriever};

/// Serves same-origin URLs from the document root. The cache salt is the
/// file's modification time in milliseconds.
#[derive(Debug, Clone)]
pub struct FileRetriever {
    origin: Url,
    root: PathBuf,
}

impl FileRetriever {
    pub fn new(origin: Url, root: impl Into<PathBuf>) -> Self {
        Self {
            origin,
            root: root.into(),
        }
    }

    /// Map a URL onto a file below the document root.
    pub(crate) fn local_path(&self, url: &Url) -> Result<PathBuf, RetrievalError> {
        if url.scheme() != self.origin.scheme()
            || url.host_str() != self.origin.host_str()
            || url.port_or_known_default() != self.origin.port_or_known_default()
        {
            return Err(RetrievalError::ForeignOrigin);
        }

        let prefix = self.origin.path().trim_end_matches('/');
        let relative = url
            .path()
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or(RetrievalError::ForeignOrigin)?;
        let decoded = percent_decode_str(relative)
            .decode_utf8()
            .map_err(|_| RetrievalError::Encoding)?;

        let relative = Path::new(decoded.as_ref());
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(RetrievalError::Traversal);
        }
        Ok(self.root.join(relative))
    }

    fn read(&self, url: &Url) -> Result<Bytes, RetrievalError> {
        let path = self.local_path(url)?;
        Ok(Bytes::from(fs::read(path)?))
    }

    fn salt(&self, url: &Url) -> Result<CacheSalt, RetrievalError> {
        let metadata = fs::metadata(self.local_path(url)?)?;
        if !metadata.is_file() {
            return Err(std::io::Error::from(std::io::ErrorKind::NotFound).into());
        }
        let modified = metadata.modified()?;
        let millis = modified
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis().min(u64::MAX as u128) as u64)
            .unwrap_or(0);
        Ok(CacheSalt::new(millis))
    }
}

impl ResourceRetriever for FileRetriever {
    fn retrieve(&self, url: &Url) -> Option<Bytes> {
        match self.read(url) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                debug!(
                    target = "infra::retrieval::file",
                    op = "retrieve",
                    result = "unavailable",
                    url = %url,
                    error = %err,
                    "Local resource unavailable"
                );
                None
            }
        }
    }

    fn cache_salt(&self, url: &Url) -> Option<CacheSalt> {
        self.salt(url).ok()
    }
}
