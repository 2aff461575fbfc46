//! Data-URL inlining decisions, remembered in the cache.
//!
//! SVGs are inlined as soon as they are small enough and fetchable. Raster
//! images are only inlined once the image service has produced their bytes
//! and recorded them here, so the decision happens on a later document pass.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use tracing::warn;
use url::Url;

use crate::cache::{Cache, Ttl};
use crate::domain::{CacheSalt, ResourceRetriever};

#[derive(Clone)]
pub struct InlineCache {
    cache: Cache,
    max_bytes: usize,
}

impl InlineCache {
    pub fn new(cache: Cache, max_bytes: usize) -> Self {
        Self { cache, max_bytes }
    }

    /// A data URL recorded earlier for this resource version.
    pub fn lookup(&self, url: &Url, salt: Option<CacheSalt>) -> Option<String> {
        match self.cache.get::<String>(&key(url, salt)) {
            Ok(found) => found,
            Err(err) => {
                warn!(
                    target = "rewrite::inline",
                    op = "lookup",
                    result = "cache_error",
                    url = %url,
                    error = %err,
                    "Inline cache lookup failed"
                );
                None
            }
        }
    }

    /// Remember `bytes` as inlinable if they fit. Returns whether they did.
    pub fn record(&self, url: &Url, salt: Option<CacheSalt>, mime: &str, bytes: &[u8]) -> bool {
        if bytes.len() > self.max_bytes {
            return false;
        }
        let data = data_url(mime, bytes);
        if let Err(err) = self.cache.set(&key(url, salt), &data, Ttl::Default) {
            warn!(
                target = "rewrite::inline",
                op = "record",
                result = "cache_error",
                url = %url,
                error = %err,
                "Inline cache write failed"
            );
            return false;
        }
        true
    }

    /// Inline an SVG directly, fetching it on first sight.
    pub fn svg(
        &self,
        url: &Url,
        salt: Option<CacheSalt>,
        retriever: &dyn ResourceRetriever,
    ) -> Option<String> {
        if let Some(found) = self.lookup(url, salt) {
            return Some(found);
        }
        let bytes = retriever.retrieve(url)?;
        self.record(url, salt, "image/svg+xml", &bytes)
            .then(|| data_url("image/svg+xml", &bytes))
    }
}

fn key(url: &Url, salt: Option<CacheSalt>) -> String {
    match salt {
        Some(salt) => format!("{url}#{salt}"),
        None => url.to_string(),
    }
}

pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::{CacheConfig, CachePool};
    use crate::infra::retrieval::StaticRetriever;

    fn inline(dir: &tempfile::TempDir, max_bytes: usize) -> InlineCache {
        let config = CacheConfig {
            root: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        InlineCache::new(Cache::new(Arc::new(CachePool::new()), config, "inline"), max_bytes)
    }

    #[test]
    fn records_only_small_payloads() {
        let dir = tempfile::tempdir().unwrap();
        let inline = inline(&dir, 4);
        let url = Url::parse("http://a.test/a.png").unwrap();

        assert!(!inline.record(&url, None, "image/png", b"too large"));
        assert_eq!(inline.lookup(&url, None), None);

        assert!(inline.record(&url, Some(CacheSalt::new(1)), "image/png", b"ok"));
        assert_eq!(
            inline.lookup(&url, Some(CacheSalt::new(1))).as_deref(),
            Some("data:image/png;base64,b2s=")
        );
        assert_eq!(inline.lookup(&url, Some(CacheSalt::new(2))), None);
    }

    #[test]
    fn svg_is_fetched_on_first_sight() {
        let dir = tempfile::tempdir().unwrap();
        let inline = inline(&dir, 1024);
        let retriever = StaticRetriever::new();
        let url = Url::parse("http://a.test/i.svg").unwrap();
        retriever.insert(&url, "<svg/>", None);

        let data = inline.svg(&url, None, &retriever).unwrap();
        assert!(data.starts_with("data:image/svg+xml;base64,"));

        retriever.remove(&url);
        assert_eq!(inline.svg(&url, None, &retriever), Some(data));
    }
}
