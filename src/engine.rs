//! Top-level context object owning every shared component.
//!
//! An [`Engine`] is built once from resolved [`Settings`] and shared by the
//! host's workers. Dropping it, or calling [`Engine::shutdown`], releases the
//! pooled cache connections.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::cache::{Cache, CacheConfig, CacheError, CachePool, StoreStats};
use crate::config::{ServiceSettings, Settings};
use crate::domain::{ResourceRetriever, Service};
use crate::infra::error::InfraError;
use crate::infra::retrieval::{CompositeRetriever, FileRetriever, HttpRetriever};
use crate::pipeline::{Composite, FilterDeps, FilterRegistry, PipelineError};
use crate::protocol::{
    Identity, ProtocolError, SWITCH_PARAM, Signature, Switches, TokenRefs, cookie_value,
};
use crate::rewrite::{AllowList, InlineCache, UrlRewriter};
use crate::service::{
    CachingService, DiagnosticsInfo, IncomingRequest, ServiceEndpoint, ServiceError,
    ServiceResponse,
};

const SERVICE_NAMESPACE: &str = "service";
const INLINE_NAMESPACE: &str = "inline";
const REFS_NAMESPACE: &str = "refs";
const SIGNATURE_NAMESPACE: &str = "signature";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("invalid allow-list pattern: {0}")]
    AllowList(#[from] globset::Error),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("`{0}` cannot be routed through the service")]
    Ineligible(String),
}

pub struct Engine {
    settings: Arc<Settings>,
    pool: Arc<CachePool>,
    cache: Cache,
    rewriter: Arc<UrlRewriter>,
    composite: Composite,
    endpoint: ServiceEndpoint,
}

impl Engine {
    /// Engine reading same-origin resources from the document root and
    /// everything else over HTTP.
    pub fn new(settings: Settings) -> Result<Self, EngineError> {
        let files = FileRetriever::new(
            settings.site.origin.clone(),
            settings.site.document_root.clone(),
        );
        let http = HttpRetriever::new(&settings.fetch)?;
        let retriever = CompositeRetriever::new(vec![Arc::new(files), Arc::new(http)]);
        Self::with_retriever(settings, Arc::new(retriever))
    }

    pub fn with_retriever(
        settings: Settings,
        retriever: Arc<dyn ResourceRetriever>,
    ) -> Result<Self, EngineError> {
        Self::with_pool(settings, retriever, Arc::new(CachePool::new()))
    }

    /// Share `pool` with other engines using the same cache root.
    pub fn with_pool(
        settings: Settings,
        retriever: Arc<dyn ResourceRetriever>,
        pool: Arc<CachePool>,
    ) -> Result<Self, EngineError> {
        let cache = Cache::new(
            pool.clone(),
            CacheConfig::from(&settings.cache),
            SERVICE_NAMESPACE,
        );

        let signature = build_signature(&settings.service, cache.with_namespace(SIGNATURE_NAMESPACE));
        let refs = settings
            .service
            .token_refs
            .then(|| TokenRefs::new(cache.with_namespace(REFS_NAMESPACE)));
        let mut rewriter = UrlRewriter::new(
            Arc::new(signature),
            AllowList::new(&settings.filters.allow)?,
            retriever.clone(),
            InlineCache::new(
                cache.with_namespace(INLINE_NAMESPACE),
                settings.filters.inline_max_bytes,
            ),
            settings.service.url.clone(),
            settings.service.format,
        );
        if let Some(refs) = &refs {
            rewriter = rewriter.with_token_refs(refs.clone());
        }
        let rewriter = Arc::new(rewriter);

        let deps = FilterDeps {
            rewriter: rewriter.clone(),
            lazy_skip: settings.filters.lazy_skip,
        };
        let composite = Composite::new(FilterRegistry::standard().build(&settings.filters.enabled, &deps)?)
            .with_max_bytes(settings.document.max_bytes)
            .with_timing_comment(settings.document.timing_comment);

        let diagnostics = DiagnosticsInfo {
            filters: composite.keys().into_iter().map(str::to_string).collect(),
            settings_digest: settings.digest(),
        };
        let mut endpoint = ServiceEndpoint::new(
            rewriter.clone(),
            CachingService::new(cache.clone(), retriever),
        )
        .with_trusted_header(settings.service.trusted_header.clone())
        .with_default_switches(settings.switches.clone())
        .with_diagnostics(diagnostics);
        if let Some(refs) = refs {
            endpoint = endpoint.with_token_refs(refs);
        }

        info!(
            target = "engine",
            op = "init",
            result = "ok",
            service_url = %settings.service.url,
            filters = ?settings.filters.enabled,
            cache_root = %settings.cache.root.display(),
            "Engine ready"
        );

        Ok(Self {
            settings: Arc::new(settings),
            pool,
            cache,
            rewriter,
            composite,
            endpoint,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn rewriter(&self) -> &UrlRewriter {
        &self.rewriter
    }

    pub fn endpoint(&self) -> &ServiceEndpoint {
        &self.endpoint
    }

    /// Switches for one page view: site defaults, then the `pw` cookie, then
    /// the `pw` query parameter of the page URL.
    pub fn switches_for(&self, page_url: &Url, cookie_header: Option<&str>) -> Switches {
        let cookie = cookie_header.and_then(|header| cookie_value(header, SWITCH_PARAM));
        let query = page_url
            .query_pairs()
            .find(|(key, _)| key == SWITCH_PARAM)
            .map(|(_, value)| value.into_owned());
        Switches::resolve(&self.settings.switches, cookie, query.as_deref())
    }

    /// Rewrite `document` served at `page_url`. The buffer may be in any
    /// ASCII-compatible encoding. Never fails; anything that goes wrong
    /// yields the document unchanged.
    pub fn optimize_document(&self, document: &[u8], page_url: &Url, switches: &Switches) -> Vec<u8> {
        self.composite.process(document, page_url, switches)
    }

    pub fn handle_request(&self, incoming: &IncomingRequest) -> ServiceResponse {
        self.endpoint.handle(incoming)
    }

    /// Signed service URL for `url`, which must be eligible for rewriting.
    pub fn sign_url(&self, url: &Url, service: Service) -> Result<Url, EngineError> {
        let eligible = self
            .rewriter
            .eligibility(url)
            .ok_or_else(|| EngineError::Ineligible(url.to_string()))?;
        let signed = self.rewriter.service_url(&eligible, service)?;
        Url::parse(&signed).map_err(|err| ProtocolError::malformed(err.to_string()).into())
    }

    pub fn bundle_url(&self, sources: &[Url]) -> Result<Url, EngineError> {
        if let Some(denied) = sources.iter().find(|url| !self.rewriter.is_eligible(url)) {
            return Err(EngineError::Ineligible(denied.to_string()));
        }
        Ok(self.endpoint.bundle_url(sources)?)
    }

    pub fn cache_stats(&self) -> Result<StoreStats, EngineError> {
        Ok(self.cache.stats()?)
    }

    pub fn clear_cache(&self) -> Result<(), EngineError> {
        self.cache.clear()?;
        info!(
            target = "engine",
            op = "clear_cache",
            result = "ok",
            "Cache cleared"
        );
        Ok(())
    }

    /// Close pooled cache connections. Later calls reopen them on demand.
    pub fn shutdown(&self) {
        self.pool.close_all();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.pool.close_all();
    }
}

fn build_signature(service: &ServiceSettings, secrets: Cache) -> Signature {
    let mut signature = match &service.identity {
        Some(identity) => Signature::new(Identity::new(&identity.name, &identity.secret)),
        None => Signature::anonymous(secrets),
    };
    for verifier in &service.verifiers {
        signature = signature.with_verifier(Identity::new(&verifier.name, &verifier.secret));
    }
    signature
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::config;
    use crate::domain::CacheSalt;
    use crate::infra::retrieval::StaticRetriever;

    const PIXEL_GIF: &[u8] = &[
        0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
        0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
        0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
    ];

    const SITE: &str = r#"
[site]
origin = "http://site.test/"

[service]
url = "/_pw/"
identity = { name = "edge", secret = "s3cret" }

[filters]
enabled = ["images", "css", "scripts"]
inline_max_bytes = 0
"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        retriever: Arc<StaticRetriever>,
        engine: Engine,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = config::from_toml(SITE).unwrap();
        settings.cache.root = dir.path().to_path_buf();
        let retriever = Arc::new(StaticRetriever::new());
        let engine = Engine::with_retriever(settings, retriever.clone()).unwrap();
        Fixture {
            _dir: dir,
            retriever,
            engine,
        }
    }

    fn page() -> Url {
        Url::parse("http://site.test/index.html").unwrap()
    }

    fn optimize(engine: &Engine, html: &str, switches: &Switches) -> String {
        String::from_utf8(engine.optimize_document(html.as_bytes(), &page(), switches)).unwrap()
    }

    fn attribute_url(document: &str, name: &str) -> Url {
        let needle = format!(" {name}=\"");
        let start = document.find(&needle).unwrap() + needle.len();
        let end = start + document[start..].find('"').unwrap();
        Url::parse(&document[start..end].replace("&amp;", "&")).unwrap()
    }

    fn proxied_src(document: &str) -> Url {
        attribute_url(document, "src")
    }

    #[test]
    fn optimized_document_is_stable_across_runs() {
        let fixture = fixture();
        let logo = Url::parse("http://site.test/logo.gif").unwrap();
        fixture
            .retriever
            .insert(&logo, Bytes::from_static(PIXEL_GIF), Some(CacheSalt::new(3)));

        let html = r#"<html><body><img src="/logo.gif"></body></html>"#;
        let switches = Switches::default();
        let first = optimize(&fixture.engine, html, &switches);
        let second = optimize(&fixture.engine, html, &switches);

        assert_eq!(first, second);
        assert!(first.contains("http://site.test/_pw/?"), "{first}");
        assert!(first.contains("service=images"));
    }

    #[test]
    fn rewritten_urls_are_served_by_the_endpoint() {
        let fixture = fixture();
        let logo = Url::parse("http://site.test/logo.gif").unwrap();
        fixture
            .retriever
            .insert(&logo, Bytes::from_static(PIXEL_GIF), Some(CacheSalt::new(3)));

        let html = r#"<img src="logo.gif">"#;
        let document = optimize(&fixture.engine, html, &Switches::default());
        let response = fixture
            .engine
            .handle_request(&IncomingRequest::new(proxied_src(&document)));

        assert_eq!(response.status, 200);
        assert_eq!(response.header("Content-Type"), Some("image/gif"));
        assert_eq!(response.body.as_ref(), PIXEL_GIF);
    }

    #[test]
    fn stylesheets_and_scripts_are_written_as_token_refs() {
        let fixture = fixture();
        let sheet = Url::parse("http://site.test/site.css").unwrap();
        let script = Url::parse("http://site.test/app.js").unwrap();
        fixture
            .retriever
            .insert(&sheet, "a { color: red; }", Some(CacheSalt::new(5)));
        fixture.retriever.insert(&script, "run();", Some(CacheSalt::new(6)));

        let html = r#"<link rel="stylesheet" href="/site.css"><script src="/app.js"></script>"#;
        let document = optimize(&fixture.engine, html, &Switches::default());

        for (url, content_type) in [
            (attribute_url(&document, "href"), "text/css"),
            (attribute_url(&document, "src"), "javascript"),
        ] {
            let query = url.query().unwrap_or_default();
            assert!(query.contains("ref="), "{url}");
            assert!(!query.contains("src=") && !query.contains("sig="), "{url}");

            let response = fixture.engine.handle_request(&IncomingRequest::new(url.clone()));
            assert_eq!(response.status, 200, "{url}");
            assert!(
                response
                    .header("Content-Type")
                    .is_some_and(|value| value.contains(content_type)),
                "{url}"
            );
            assert!(!response.body.is_empty());
        }
        assert_eq!(document, optimize(&fixture.engine, html, &Switches::default()));
    }

    #[test]
    fn disabled_switch_returns_the_document_untouched() {
        let fixture = fixture();
        let logo = Url::parse("http://site.test/logo.gif").unwrap();
        fixture.retriever.insert(&logo, "GIF89a", Some(CacheSalt::new(3)));

        let html = r#"<img src="/logo.gif">"#;
        let switches = fixture.engine.switches_for(&page(), Some("pw=-enabled"));
        assert_eq!(optimize(&fixture.engine, html, &switches), html);
    }

    #[test]
    fn query_switches_override_the_cookie() {
        let fixture = fixture();
        let page = Url::parse("http://site.test/?pw=images").unwrap();
        let switches = fixture.engine.switches_for(&page, Some("theme=dark; pw=-images"));
        assert!(switches.is_on("images", false));
    }

    #[test]
    fn signing_rejects_unverifiable_urls() {
        let fixture = fixture();
        let foreign = Url::parse("https://elsewhere.test/a.png").unwrap();
        assert!(matches!(
            fixture.engine.sign_url(&foreign, Service::Images),
            Err(EngineError::Ineligible(url)) if url == foreign.as_str()
        ));

        let local = Url::parse("http://site.test/a.css").unwrap();
        fixture.retriever.insert(&local, "a{}", Some(CacheSalt::new(1)));
        let signed = fixture.engine.sign_url(&local, Service::Css).unwrap();
        assert!(signed.as_str().starts_with("http://site.test/_pw/?"));
        assert!(signed.as_str().contains("service=css"));
    }

    #[test]
    fn bundles_refuse_ineligible_parts() {
        let fixture = fixture();
        let local = Url::parse("http://site.test/a.js").unwrap();
        fixture.retriever.insert(&local, "a()", Some(CacheSalt::new(1)));
        let foreign = Url::parse("https://elsewhere.test/b.js").unwrap();

        assert!(matches!(
            fixture.engine.bundle_url(&[local.clone(), foreign]),
            Err(EngineError::Ineligible(_))
        ));
        let bundle = fixture.engine.bundle_url(&[local]).unwrap();
        assert!(bundle.as_str().contains("service=bundler"));
    }

    #[test]
    fn cache_can_be_inspected_and_cleared() {
        let fixture = fixture();
        let local = Url::parse("http://site.test/a.js").unwrap();
        fixture.retriever.insert(&local, "a()", Some(CacheSalt::new(1)));
        let signed = fixture.engine.sign_url(&local, Service::Scripts).unwrap();
        let response = fixture.engine.handle_request(&IncomingRequest::new(signed));
        assert_eq!(response.status, 200);

        assert!(fixture.engine.cache_stats().unwrap().entries > 0);
        fixture.engine.clear_cache().unwrap();
        assert_eq!(fixture.engine.cache_stats().unwrap().entries, 0);
    }

    #[test]
    fn unknown_filter_keys_fail_construction() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = config::from_toml(SITE).unwrap();
        settings.cache.root = dir.path().to_path_buf();
        settings.filters.enabled.push("sharpen".into());

        let result = Engine::with_retriever(settings, Arc::new(StaticRetriever::new()));
        assert!(matches!(
            result,
            Err(EngineError::Pipeline(PipelineError::UnknownFilter(key))) if key == "sharpen"
        ));
    }

    #[test]
    fn shutdown_closes_pooled_connections() {
        let fixture = fixture();
        fixture.engine.cache_stats().unwrap();
        fixture.engine.shutdown();
        assert_eq!(fixture.engine.pool.open_count(), 0);
    }
}
