//! Resources, their versions, and the retrieval seam supplied by the host.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

/// Opaque, comparable version of a resource. Larger means newer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheSalt(u64);

impl CacheSalt {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CacheSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CacheSalt {
    type Err = std::num::ParseIntError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value.parse().map(Self)
    }
}

/// Fetches resource bytes and versions. Implementations never fail loudly:
/// anything they cannot serve is `None`.
pub trait ResourceRetriever: Send + Sync {
    fn retrieve(&self, url: &Url) -> Option<Bytes>;

    /// Current version of a resource, or `None` when it cannot be derived
    /// (missing locally, or not a local resource at all).
    fn cache_salt(&self, url: &Url) -> Option<CacheSalt>;
}

/// Something a cached result was built from, with the version seen at build time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub url: String,
    pub salt: Option<CacheSalt>,
}

impl Dependency {
    pub fn observe(url: &Url, retriever: &dyn ResourceRetriever) -> Self {
        Self {
            url: url.to_string(),
            salt: retriever.cache_salt(url),
        }
    }

    /// A dependency stays valid while its current salt is not newer than the
    /// recorded one. Versionless dependencies are always valid; a versioned
    /// one whose salt can no longer be derived is stale.
    pub fn is_current(&self, retriever: &dyn ResourceRetriever) -> bool {
        let Some(recorded) = self.salt else {
            return true;
        };
        let Ok(url) = Url::parse(&self.url) else {
            return false;
        };
        retriever
            .cache_salt(&url)
            .is_some_and(|current| current <= recorded)
    }
}

/// A fetchable thing whose bytes come from a retriever.
#[derive(Debug, Clone)]
pub struct Resource {
    url: Url,
    mime: String,
}

impl Resource {
    /// A resource loaded on demand, with its MIME type inferred from the extension.
    pub fn new(url: Url) -> Self {
        let mime = infer_mime(&url);
        Self { url, mime }
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn load(&self, retriever: &dyn ResourceRetriever) -> Option<Bytes> {
        retriever.retrieve(&self.url)
    }
}

fn infer_mime(url: &Url) -> String {
    mime_guess::from_path(url.path())
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Salts(Mutex<HashMap<String, u64>>);

    impl ResourceRetriever for Salts {
        fn retrieve(&self, _url: &Url) -> Option<Bytes> {
            None
        }

        fn cache_salt(&self, url: &Url) -> Option<CacheSalt> {
            let salts = self.0.lock().unwrap();
            salts.get(url.as_str()).copied().map(CacheSalt::new)
        }
    }

    fn url(value: &str) -> Url {
        Url::parse(value).unwrap()
    }

    #[test]
    fn mime_is_inferred_from_extension() {
        assert_eq!(Resource::new(url("http://a.test/x/logo.PNG")).mime(), "image/png");
        assert_eq!(Resource::new(url("http://a.test/site.css")).mime(), "text/css");
        assert_eq!(
            Resource::new(url("http://a.test/blob")).mime(),
            "application/octet-stream"
        );
    }

    #[test]
    fn dependency_goes_stale_when_salt_grows_or_vanishes() {
        let retriever = Salts::default();
        retriever.0.lock().unwrap().insert("http://a.test/a.png".into(), 10);

        let dependency = Dependency::observe(&url("http://a.test/a.png"), &retriever);
        assert_eq!(dependency.salt, Some(CacheSalt::new(10)));
        assert!(dependency.is_current(&retriever));

        retriever.0.lock().unwrap().insert("http://a.test/a.png".into(), 11);
        assert!(!dependency.is_current(&retriever));

        retriever.0.lock().unwrap().clear();
        assert!(!dependency.is_current(&retriever));

        let remote = Dependency::observe(&url("http://b.test/x.png"), &retriever);
        assert!(remote.is_current(&retriever));
    }
}
