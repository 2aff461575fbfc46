//! Short references standing in for previously signed parameter sets.

use tracing::debug;

use super::error::ProtocolError;
use super::request::{REF_PARAM, SERVICE_PARAM, ServiceRequest};
use crate::cache::{Cache, Ttl, short_hash};

/// Hex characters in a token ref.
pub const REF_WIDTH: usize = 16;

#[derive(Clone)]
pub struct TokenRefs {
    cache: Cache,
}

impl TokenRefs {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Remember the parameters of `request` and return the short request
    /// that refers to them. Parameters are written on first sight only;
    /// storing the same set again yields the same reference.
    pub fn store(&self, request: &ServiceRequest) -> Result<ServiceRequest, ProtocolError> {
        let canonical = request.canonical();
        let reference = short_hash(&canonical, REF_WIDTH);
        if self.cache.get::<Vec<(String, String)>>(&reference)?.is_none() {
            let params: Vec<(String, String)> = request
                .canonical_params()
                .into_iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect();
            self.cache.set(&reference, &params, Ttl::Default)?;
            debug!(
                target = "protocol::token_ref",
                op = "store",
                result = "stored",
                reference = %reference,
                "Stored token ref"
            );
        }

        let mut short = ServiceRequest::new();
        if let Some(service) = request.service() {
            short = short.with_param(SERVICE_PARAM, service);
        }
        short = short
            .with_param(REF_PARAM, reference)
            .with_stem(request.stem().map(str::to_string));
        if let Some(base) = request.base() {
            short = short.with_base(base.clone());
        }
        Ok(short)
    }

    /// Expand a ref request into the stored parameter set. A missing entry
    /// is an error; nothing is substituted for it.
    pub fn resolve(&self, request: &ServiceRequest) -> Result<ServiceRequest, ProtocolError> {
        let reference = request
            .param(REF_PARAM)
            .ok_or_else(|| ProtocolError::malformed("request carries no ref"))?;

        let params: Vec<(String, String)> = self
            .cache
            .get(reference)?
            .ok_or_else(|| ProtocolError::UnknownRef(reference.to_string()))?;

        let mut resolved = ServiceRequest::new()
            .with_stem(request.stem().map(str::to_string))
            .with_switches(request.switches().clone());
        for (key, value) in &params {
            resolved = resolved.with_param(key, value.as_str());
        }
        if let Some(base) = request.base() {
            resolved = resolved.with_base(base.clone());
        }

        if let Some(claimed) = request.service()
            && resolved.service() != Some(claimed)
        {
            return Err(ProtocolError::malformed(
                "ref does not belong to the requested service",
            ));
        }

        debug!(
            target = "protocol::token_ref",
            op = "resolve",
            result = "hit",
            reference,
            "Resolved token ref"
        );
        Ok(resolved)
    }
}
