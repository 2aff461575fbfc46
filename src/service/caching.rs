//! Result cache in front of every service.
//!
//! Entries are keyed by the canonical parameter string (plus stem) and carry
//! the dependencies they were built from. An entry whose dependencies moved
//! on is rebuilt.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::ServiceError;
use crate::cache::{Cache, Ttl};
use crate::domain::{Dependency, ResourceRetriever};
use crate::protocol::ServiceRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedOutput {
    #[serde(with = "base64_body")]
    pub body: Vec<u8>,
    pub mime: String,
    pub dependencies: Vec<Dependency>,
}

impl CachedOutput {
    pub fn new(body: impl Into<Vec<u8>>, mime: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            mime: mime.into(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
        self
    }
}

mod base64_body {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

#[derive(Clone)]
pub struct CachingService {
    cache: Cache,
    retriever: Arc<dyn ResourceRetriever>,
}

impl CachingService {
    pub fn new(cache: Cache, retriever: Arc<dyn ResourceRetriever>) -> Self {
        Self { cache, retriever }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn key(request: &ServiceRequest) -> String {
        match request.stem() {
            Some(stem) => format!("{}#{stem}", request.canonical()),
            None => request.canonical(),
        }
    }

    /// Serve a current cached result for `request` or build, store and
    /// return a fresh one. `bypass` skips the lookup but still stores.
    pub fn fetch<F>(
        &self,
        request: &ServiceRequest,
        bypass: bool,
        produce: F,
    ) -> Result<CachedOutput, ServiceError>
    where
        F: FnOnce() -> Result<CachedOutput, ServiceError>,
    {
        let key = Self::key(request);
        if !bypass && let Some(cached) = self.lookup(&key) {
            return Ok(cached);
        }

        let output = produce()?;
        if let Err(err) = self.cache.set(&key, &output, Ttl::Default) {
            warn!(
                target = "service::caching",
                op = "store",
                result = "cache_error",
                error = %err,
                "Could not cache service output"
            );
        }
        Ok(output)
    }

    fn lookup(&self, key: &str) -> Option<CachedOutput> {
        let cached = match self.cache.get::<CachedOutput>(key) {
            Ok(cached) => cached?,
            Err(err) => {
                warn!(
                    target = "service::caching",
                    op = "lookup",
                    result = "cache_error",
                    error = %err,
                    "Service cache lookup failed"
                );
                return None;
            }
        };

        let stale = cached
            .dependencies
            .iter()
            .find(|dependency| !dependency.is_current(self.retriever.as_ref()));
        if let Some(stale) = stale {
            debug!(
                target = "service::caching",
                op = "lookup",
                result = "stale",
                dependency = %stale.url,
                "Cached output is out of date"
            );
            return None;
        }
        Some(cached)
    }
}
