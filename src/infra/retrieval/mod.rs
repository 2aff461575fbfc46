//! Resource retrievers: local filesystem, HTTP, in-memory, and a chain of them.

mod file;
mod http;
mod memory;

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use url::Url;

use crate::domain::{CacheSalt, ResourceRetriever};

pub use file::FileRetriever;
pub use http::HttpRetriever;
pub use memory::StaticRetriever;

/// Why a retriever could not serve a URL. Logged, never returned to callers.
#[derive(Debug, Error)]
pub(crate) enum RetrievalError {
    #[error("url is outside the site origin")]
    ForeignOrigin,
    #[error("path escapes the document root")]
    Traversal,
    #[error("path is not valid utf-8 after decoding")]
    Encoding,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("unsupported scheme `{0}`")]
    Scheme(String),
}

/// Asks each retriever in order; the first answer wins.
#[derive(Clone, Default)]
pub struct CompositeRetriever {
    retrievers: Vec<Arc<dyn ResourceRetriever>>,
}

impl CompositeRetriever {
    pub fn new(retrievers: Vec<Arc<dyn ResourceRetriever>>) -> Self {
        Self { retrievers }
    }

    pub fn push(&mut self, retriever: Arc<dyn ResourceRetriever>) {
        self.retrievers.push(retriever);
    }
}

impl ResourceRetriever for CompositeRetriever {
    fn retrieve(&self, url: &Url) -> Option<Bytes> {
        self.retrievers
            .iter()
            .find_map(|retriever| retriever.retrieve(url))
    }

    fn cache_salt(&self, url: &Url) -> Option<CacheSalt> {
        self.retrievers
            .iter()
            .find_map(|retriever| retriever.cache_salt(url))
    }
}
