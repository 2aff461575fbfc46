//! Entry point for service requests produced by the rewriter.

use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use super::caching::{CachedOutput, CachingService};
use super::error::ServiceError;
use super::response::{Freshness, IncomingRequest, ServiceResponse, shape};
use super::transforms::{CssMinifier, ImageFilter, JsMinifier, PassthroughImages, TextTransform};
use crate::domain::{CacheSalt, Dependency, RequestFormat, Resource, Service, UnknownService};
use crate::protocol::{
    ProtocolError, REF_PARAM, SALT_PARAM, SRC_PARAM, SWITCH_PARAM, ServiceRequest, Switches,
    TokenRefs, cookie_value,
};
use crate::rewrite::{UrlRewriter, rewrite_css_urls};

const METRIC_SERVICE_REJECTED: &str = "pagewright_service_rejected_total";

/// Separator between bundled sources in `src`.
pub const BUNDLE_SEPARATOR: &str = "|";

/// Static facts reported by the diagnostics service.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticsInfo {
    pub filters: Vec<String>,
    pub settings_digest: String,
}

#[derive(Serialize)]
struct DiagnosticsReport<'a> {
    version: &'static str,
    service_base: &'a str,
    format: &'static str,
    switches: String,
    #[serde(flatten)]
    info: &'a DiagnosticsInfo,
    cache: Option<crate::cache::StoreStats>,
}

pub struct ServiceEndpoint {
    rewriter: Arc<UrlRewriter>,
    caching: CachingService,
    refs: Option<TokenRefs>,
    images: Arc<dyn ImageFilter>,
    scripts: Arc<dyn TextTransform>,
    css: CssMinifier,
    trusted_header: Option<String>,
    defaults: Switches,
    diagnostics: DiagnosticsInfo,
}

impl ServiceEndpoint {
    pub fn new(rewriter: Arc<UrlRewriter>, caching: CachingService) -> Self {
        Self {
            rewriter,
            caching,
            refs: None,
            images: Arc::new(PassthroughImages),
            scripts: Arc::new(JsMinifier),
            css: CssMinifier,
            trusted_header: None,
            defaults: Switches::default(),
            diagnostics: DiagnosticsInfo::default(),
        }
    }

    pub fn with_token_refs(mut self, refs: TokenRefs) -> Self {
        self.refs = Some(refs);
        self
    }

    pub fn with_image_filter(mut self, images: Arc<dyn ImageFilter>) -> Self {
        self.images = images;
        self
    }

    pub fn with_script_transform(mut self, scripts: Arc<dyn TextTransform>) -> Self {
        self.scripts = scripts;
        self
    }

    /// Requests carrying this header skip signature and eligibility checks.
    pub fn with_trusted_header(mut self, header: Option<String>) -> Self {
        self.trusted_header = header;
        self
    }

    pub fn with_default_switches(mut self, defaults: Switches) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsInfo) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn handle(&self, incoming: &IncomingRequest) -> ServiceResponse {
        match self.serve(incoming) {
            Ok(response) => response,
            Err(err) => {
                counter!(METRIC_SERVICE_REJECTED, "reason" => err.kind()).increment(1);
                warn!(
                    target = "service::endpoint",
                    op = "handle",
                    result = err.kind(),
                    status = err.status(),
                    url = %incoming.url,
                    error = %err,
                    "Rejected service request"
                );
                ServiceResponse::rejected(&err)
            }
        }
    }

    /// URL for a bundle of same-typed resources. With token refs enabled the
    /// parameters are stored and the URL only carries the ref.
    pub fn bundle_url(&self, sources: &[Url]) -> Result<Url, ServiceError> {
        let joined = sources
            .iter()
            .map(Url::as_str)
            .collect::<Vec<_>>()
            .join(BUNDLE_SEPARATOR);
        let mut request = ServiceRequest::for_service(Service::Bundler)
            .with_param(SRC_PARAM, joined)
            .with_base(self.rewriter.service_base().clone());
        let newest = sources
            .iter()
            .filter_map(|source| self.rewriter.retriever().cache_salt(source))
            .max();
        if let Some(salt) = newest {
            request = request.with_param(SALT_PARAM, salt.to_string());
        }

        let request = match &self.refs {
            Some(refs) => refs.store(&request)?,
            None => request.signed(self.rewriter.signature()),
        };
        Ok(request.to_url(self.rewriter.format())?)
    }

    fn serve(&self, incoming: &IncomingRequest) -> Result<ServiceResponse, ServiceError> {
        let mut request = ServiceRequest::from_url(&incoming.url, self.rewriter.service_base())?;
        let cookie = incoming
            .header("Cookie")
            .and_then(|header| cookie_value(header, SWITCH_PARAM));
        let switches = Switches::resolve(&self.defaults, cookie, None).merge(request.switches());

        let trusted = self
            .trusted_header
            .as_deref()
            .is_some_and(|name| incoming.header(name).is_some());

        let mut from_ref = false;
        if let Some(reference) = request.param(REF_PARAM) {
            let refs = self
                .refs
                .as_ref()
                .ok_or_else(|| ProtocolError::UnknownRef(reference.to_string()))?;
            request = refs.resolve(&request)?;
            from_ref = true;
        }

        let service: Service = request
            .service()
            .unwrap_or_default()
            .parse()
            .map_err(|UnknownService(name)| ServiceError::UnknownService(name))?;

        if service == Service::Diagnostics {
            self.authorize(&request, trusted || from_ref)?;
            let report = self.diagnostics(&switches)?;
            return Ok(shape(report, Freshness::NoStore, None, incoming));
        }

        let sources = self.sources(service, &request)?;
        self.authorize(&request, trusted || from_ref)?;
        if !trusted
            && let Some(denied) = sources.iter().find(|url| !self.rewriter.is_eligible(url))
        {
            return Err(ServiceError::Forbidden(denied.to_string()));
        }

        let output = self.caching.fetch(&request, switches.nocache(), || {
            self.produce(service, &request, &sources)
        })?;

        let freshness = if request.param(SALT_PARAM).is_some() {
            Freshness::Versioned
        } else {
            Freshness::Unversioned
        };
        let canonical = (service == Service::Images).then(|| sources[0].as_str());
        debug!(
            target = "service::endpoint",
            op = "handle",
            result = "served",
            service = service.as_str(),
            bytes = output.body.len(),
            "Served service request"
        );
        Ok(shape(output, freshness, canonical, incoming))
    }

    fn authorize(&self, request: &ServiceRequest, trusted: bool) -> Result<(), ServiceError> {
        if trusted || request.verify(self.rewriter.signature()) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized)
        }
    }

    fn sources(&self, service: Service, request: &ServiceRequest) -> Result<Vec<Url>, ServiceError> {
        let src = request
            .src()
            .filter(|src| !src.is_empty())
            .ok_or(ServiceError::MissingSource)?;
        let parts: Vec<&str> = if service == Service::Bundler {
            src.split(BUNDLE_SEPARATOR).collect()
        } else {
            vec![src]
        };
        parts
            .into_iter()
            .map(|part| {
                Url::parse(part).map_err(|err| {
                    ServiceError::Protocol(ProtocolError::malformed(format!("bad src `{part}`: {err}")))
                })
            })
            .collect()
    }

    fn produce(
        &self,
        service: Service,
        request: &ServiceRequest,
        sources: &[Url],
    ) -> Result<CachedOutput, ServiceError> {
        match service {
            Service::Images => self.image(&sources[0], request.stem()),
            Service::Css => self.stylesheet(&sources[0]),
            Service::Scripts => self.script(&sources[0]),
            Service::Bundler => self.bundle(sources),
            Service::Diagnostics => self.diagnostics(request.switches()),
        }
    }

    fn load(&self, url: &Url) -> Result<(Resource, Bytes, Dependency), ServiceError> {
        let resource = Resource::new(url.clone());
        let retriever = self.rewriter.retriever();
        let bytes = resource
            .load(retriever)
            .ok_or_else(|| ServiceError::Unavailable(url.to_string()))?;
        Ok((resource, bytes, Dependency::observe(url, retriever)))
    }

    fn image(&self, url: &Url, stem: Option<&str>) -> Result<CachedOutput, ServiceError> {
        let (resource, bytes, dependency) = self.load(url)?;
        let processed = self.images.process(bytes, resource.mime(), stem)?;
        if stem.is_none() {
            let salt: Option<CacheSalt> = self.rewriter.retriever().cache_salt(url);
            self.rewriter
                .inline_cache()
                .record(url, salt, resource.mime(), &processed);
        }
        Ok(CachedOutput::new(processed.to_vec(), resource.mime()).with_dependency(dependency))
    }

    fn stylesheet(&self, url: &Url) -> Result<CachedOutput, ServiceError> {
        let (resource, bytes, dependency) = self.load(url)?;
        let text = String::from_utf8_lossy(&bytes);
        let (css, nested) = self.rewrite_stylesheet(&text, url);
        let minified = self.css.transform(&css).into_owned();

        let mut output = CachedOutput::new(minified, resource.mime()).with_dependency(dependency);
        for dependency in nested {
            output = output.with_dependency(dependency);
        }
        Ok(output)
    }

    /// Route nested `url()` references through the image service, relative
    /// to the stylesheet, and report what the result now depends on.
    fn rewrite_stylesheet<'a>(&self, css: &'a str, url: &Url) -> (Cow<'a, str>, Vec<Dependency>) {
        let retriever = self.rewriter.retriever();
        let mut nested = Vec::new();
        let rewritten = rewrite_css_urls(css, |raw| {
            let replacement = self
                .rewriter
                .rewrite(raw, url, Service::Images)
                .into_replacement()?;
            if let Some(resolved) = self.rewriter.resolve(raw, url) {
                nested.push(Dependency::observe(&resolved, retriever));
            }
            Some(replacement)
        });
        (rewritten, nested)
    }

    fn script(&self, url: &Url) -> Result<CachedOutput, ServiceError> {
        let (resource, bytes, dependency) = self.load(url)?;
        let text = String::from_utf8_lossy(&bytes);
        let minified = self.scripts.transform(&text).into_owned();
        Ok(CachedOutput::new(minified, resource.mime()).with_dependency(dependency))
    }

    fn bundle(&self, sources: &[Url]) -> Result<CachedOutput, ServiceError> {
        let mut parts = Vec::with_capacity(sources.len());
        let mut dependencies = Vec::with_capacity(sources.len());
        let mut mime: Option<String> = None;

        for url in sources {
            let (resource, bytes, dependency) = self.load(url)?;
            match &mime {
                Some(expected) if expected != resource.mime() => {
                    return Err(ProtocolError::malformed(format!(
                        "bundle mixes {expected} and {}",
                        resource.mime()
                    ))
                    .into());
                }
                Some(_) => {}
                None => mime = Some(resource.mime().to_string()),
            }
            let text = String::from_utf8_lossy(&bytes);
            let part = match resource.mime() {
                "text/css" => {
                    let (css, nested) = self.rewrite_stylesheet(&text, url);
                    dependencies.extend(nested);
                    self.css.transform(&css).into_owned()
                }
                "application/javascript" | "text/javascript" => {
                    self.scripts.transform(&text).into_owned()
                }
                _ => text.into_owned(),
            };
            parts.push(part);
            dependencies.push(dependency);
        }

        let mut output = CachedOutput::new(
            parts.join("\n"),
            mime.unwrap_or_else(|| "application/octet-stream".to_string()),
        );
        for dependency in dependencies {
            output = output.with_dependency(dependency);
        }
        Ok(output)
    }

    fn diagnostics(&self, switches: &Switches) -> Result<CachedOutput, ServiceError> {
        let cache = match self.caching.cache().stats() {
            Ok(stats) => Some(stats),
            Err(err) => {
                warn!(
                    target = "service::endpoint",
                    op = "diagnostics",
                    result = "cache_error",
                    error = %err,
                    "Cache statistics unavailable"
                );
                None
            }
        };
        let report = DiagnosticsReport {
            version: env!("CARGO_PKG_VERSION"),
            service_base: self.rewriter.service_base().as_str(),
            format: match self.rewriter.format() {
                RequestFormat::Query => "query",
                RequestFormat::Path => "path",
            },
            switches: switches.to_string(),
            info: &self.diagnostics,
            cache,
        };
        let body = serde_json::to_vec(&report)
            .map_err(|err| ServiceError::unprocessable(format!("diagnostics: {err}")))?;
        Ok(CachedOutput::new(body, "application/json"))
    }
}
