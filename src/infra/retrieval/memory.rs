use bytes::Bytes;
use dashmap::DashMap;
use url::Url;

use crate::domain::{CacheSalt, ResourceRetriever};

/// In-memory resources keyed by absolute URL.
#[derive(Default)]
pub struct StaticRetriever {
    entries: DashMap<String, (Bytes, Option<CacheSalt>)>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &Url, content: impl Into<Bytes>, salt: Option<CacheSalt>) {
        self.entries
            .insert(url.as_str().to_string(), (content.into(), salt));
    }

    pub fn remove(&self, url: &Url) {
        self.entries.remove(url.as_str());
    }
}

impl ResourceRetriever for StaticRetriever {
    fn retrieve(&self, url: &Url) -> Option<Bytes> {
        self.entries.get(url.as_str()).map(|entry| entry.0.clone())
    }

    fn cache_salt(&self, url: &Url) -> Option<CacheSalt> {
        self.entries.get(url.as_str()).and_then(|entry| entry.1)
    }
}
