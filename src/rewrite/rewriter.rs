//! Per-reference policy: leave alone, inline, or route through the service.

use std::sync::Arc;

use metrics::counter;
use tracing::{debug, warn};
use url::Url;

use super::allowlist::AllowList;
use super::inline::InlineCache;
use crate::domain::{CacheSalt, RequestFormat, Resource, ResourceRetriever, Service};
use crate::protocol::{ProtocolError, SALT_PARAM, SRC_PARAM, ServiceRequest, Signature, TokenRefs};

const METRIC_REWRITE_PROXIED: &str = "pagewright_rewrite_proxied_total";
const METRIC_REWRITE_INLINED: &str = "pagewright_rewrite_inlined_total";

/// Schemes that never name a fetchable resource.
const OPAQUE_SCHEMES: &[&str] = &["data:", "javascript:", "mailto:", "tel:", "about:", "blob:"];

/// Outcome of considering one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    Unchanged,
    Proxied(String),
    Inlined(String),
}

impl Rewrite {
    pub fn into_replacement(self) -> Option<String> {
        match self {
            Rewrite::Unchanged => None,
            Rewrite::Proxied(url) | Rewrite::Inlined(url) => Some(url),
        }
    }
}

/// A reference that may be rewritten, with the version it was seen at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligible {
    pub url: Url,
    pub salt: Option<CacheSalt>,
}

pub struct UrlRewriter {
    signature: Arc<Signature>,
    allow: AllowList,
    retriever: Arc<dyn ResourceRetriever>,
    inline: InlineCache,
    service_base: Url,
    format: RequestFormat,
    refs: Option<TokenRefs>,
}

impl UrlRewriter {
    pub fn new(
        signature: Arc<Signature>,
        allow: AllowList,
        retriever: Arc<dyn ResourceRetriever>,
        inline: InlineCache,
        service_base: Url,
        format: RequestFormat,
    ) -> Self {
        Self {
            signature,
            allow,
            retriever,
            inline,
            service_base,
            format,
            refs: None,
        }
    }

    /// Write stylesheet and script references as token refs instead of
    /// signed parameter sets.
    pub fn with_token_refs(mut self, refs: TokenRefs) -> Self {
        self.refs = Some(refs);
        self
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn retriever(&self) -> &dyn ResourceRetriever {
        self.retriever.as_ref()
    }

    pub fn inline_cache(&self) -> &InlineCache {
        &self.inline
    }

    pub fn service_base(&self) -> &Url {
        &self.service_base
    }

    pub fn format(&self) -> RequestFormat {
        self.format
    }

    /// Absolute http(s) URL for `raw`, or `None` for fragments, opaque
    /// schemes and anything that does not parse.
    pub fn resolve(&self, raw: &str, base: &Url) -> Option<Url> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            return None;
        }
        let lowered = raw.get(..12).unwrap_or(raw).to_ascii_lowercase();
        if OPAQUE_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
            return None;
        }
        let url = base.join(raw).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(url)
    }

    /// A URL may be rewritten when it is allow-listed or locally retrievable
    /// with a derivable cache salt. Service URLs are never rewritten again.
    pub fn eligibility(&self, url: &Url) -> Option<Eligible> {
        if url.as_str().starts_with(self.service_base.as_str()) {
            return None;
        }
        let salt = self.retriever.cache_salt(url);
        (salt.is_some() || self.allow.matches(url)).then(|| Eligible {
            url: url.clone(),
            salt,
        })
    }

    pub fn is_eligible(&self, url: &Url) -> bool {
        self.eligibility(url).is_some()
    }

    pub fn rewrite(&self, raw: &str, base: &Url, service: Service) -> Rewrite {
        let Some(url) = self.resolve(raw, base) else {
            return Rewrite::Unchanged;
        };
        let Some(eligible) = self.eligibility(&url) else {
            debug!(
                target = "rewrite::rewriter",
                op = "rewrite",
                result = "ineligible",
                url = %url,
                "Leaving unverifiable reference untouched"
            );
            return Rewrite::Unchanged;
        };

        if service == Service::Images
            && let Some(data) = self.inline_candidate(&eligible)
        {
            counter!(METRIC_REWRITE_INLINED).increment(1);
            return Rewrite::Inlined(data);
        }

        match self.document_url(&eligible, service) {
            Ok(proxied) => {
                counter!(METRIC_REWRITE_PROXIED).increment(1);
                Rewrite::Proxied(proxied)
            }
            Err(err) => {
                warn!(
                    target = "rewrite::rewriter",
                    op = "rewrite",
                    result = "encode_failed",
                    url = %url,
                    error = %err,
                    "Could not build service url"
                );
                Rewrite::Unchanged
            }
        }
    }

    /// The unsigned request for `eligible` through `service`.
    pub fn service_request(&self, eligible: &Eligible, service: Service) -> ServiceRequest {
        let mut request = ServiceRequest::for_service(service)
            .with_param(SRC_PARAM, eligible.url.as_str())
            .with_base(self.service_base.clone());
        if let Some(salt) = eligible.salt {
            request = request.with_param(SALT_PARAM, salt.to_string());
        }
        request
    }

    pub fn service_url(&self, eligible: &Eligible, service: Service) -> Result<String, ProtocolError> {
        self.service_request(eligible, service)
            .signed(&self.signature)
            .to_url(self.format)
            .map(String::from)
    }

    /// The URL written into a document. Images keep the signed form so the
    /// service can derive their extension from `src`.
    fn document_url(&self, eligible: &Eligible, service: Service) -> Result<String, ProtocolError> {
        match &self.refs {
            Some(refs) if service != Service::Images => refs
                .store(&self.service_request(eligible, service))?
                .to_url(self.format)
                .map(String::from),
            _ => self.service_url(eligible, service),
        }
    }

    fn inline_candidate(&self, eligible: &Eligible) -> Option<String> {
        let resource = Resource::new(eligible.url.clone());
        match resource.mime() {
            "image/svg+xml" => self
                .inline
                .svg(&eligible.url, eligible.salt, self.retriever.as_ref()),
            mime if mime.starts_with("image/") => self.inline.lookup(&eligible.url, eligible.salt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheConfig, CachePool};
    use crate::infra::retrieval::StaticRetriever;
    use crate::protocol::Identity;

    struct Fixture {
        _dir: tempfile::TempDir,
        cache: Cache,
        retriever: Arc<StaticRetriever>,
        rewriter: UrlRewriter,
    }

    fn fixture(allow: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            root: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        let cache = Cache::new(Arc::new(CachePool::new()), config, "inline");
        let retriever = Arc::new(StaticRetriever::new());
        let rewriter = UrlRewriter::new(
            Arc::new(Signature::new(Identity::new("t", "secret"))),
            AllowList::new(allow).unwrap(),
            retriever.clone(),
            InlineCache::new(cache.clone(), 64),
            Url::parse("http://site.test/_pw/").unwrap(),
            RequestFormat::Query,
        );
        Fixture {
            _dir: dir,
            cache,
            retriever,
            rewriter,
        }
    }

    fn page() -> Url {
        Url::parse("http://site.test/blog/post.html").unwrap()
    }

    #[test]
    fn skips_fragments_data_and_opaque_schemes() {
        let fixture = fixture(&["*"]);
        for raw in ["", "#top", "data:image/png;base64,AA", "JavaScript:void(0)", "mailto:a@b"] {
            assert_eq!(
                fixture.rewriter.rewrite(raw, &page(), Service::Images),
                Rewrite::Unchanged,
                "{raw}"
            );
        }
    }

    #[test]
    fn unverifiable_third_party_is_left_alone() {
        let fixture = fixture(&[]);
        let rewrite = fixture
            .rewriter
            .rewrite("https://elsewhere.test/a.png", &page(), Service::Images);
        assert_eq!(rewrite, Rewrite::Unchanged);
    }

    #[test]
    fn local_resources_are_proxied_with_their_salt() {
        let fixture = fixture(&[]);
        let url = Url::parse("http://site.test/blog/a.png").unwrap();
        fixture.retriever.insert(&url, "png", Some(CacheSalt::new(42)));

        let Rewrite::Proxied(proxied) = fixture.rewriter.rewrite("a.png", &page(), Service::Images)
        else {
            panic!("expected a proxied url");
        };
        let proxied = Url::parse(&proxied).unwrap();
        let request =
            ServiceRequest::from_url(&proxied, fixture.rewriter.service_base()).unwrap();
        assert_eq!(request.service(), Some("images"));
        assert_eq!(request.src(), Some(url.as_str()));
        assert_eq!(request.param(SALT_PARAM), Some("42"));
        assert!(request.verify(fixture.rewriter.signature()));
    }

    #[test]
    fn allow_listed_remote_is_proxied_without_salt() {
        let fixture = fixture(&["https://cdn.test/*"]);
        let rewrite = fixture
            .rewriter
            .rewrite("https://cdn.test/lib.js", &page(), Service::Scripts);
        let Rewrite::Proxied(proxied) = rewrite else {
            panic!("expected a proxied url");
        };
        assert!(proxied.contains("service=scripts"));
        assert!(!proxied.contains("cs="));
    }

    #[test]
    fn raster_images_inline_only_after_being_recorded() {
        let fixture = fixture(&[]);
        let url = Url::parse("http://site.test/blog/dot.gif").unwrap();
        let salt = Some(CacheSalt::new(7));
        fixture.retriever.insert(&url, "GIF89a", salt);

        let first = fixture.rewriter.rewrite("dot.gif", &page(), Service::Images);
        assert!(matches!(first, Rewrite::Proxied(_)));

        fixture
            .rewriter
            .inline_cache()
            .record(&url, salt, "image/gif", b"GIF89a");
        let second = fixture.rewriter.rewrite("dot.gif", &page(), Service::Images);
        assert_eq!(second, Rewrite::Inlined("data:image/gif;base64,R0lGODlh".into()));
    }

    #[test]
    fn small_svg_is_inlined_immediately() {
        let fixture = fixture(&[]);
        let url = Url::parse("http://site.test/i.svg").unwrap();
        fixture.retriever.insert(&url, "<svg/>", Some(CacheSalt::new(1)));

        let rewrite = fixture.rewriter.rewrite("/i.svg", &page(), Service::Images);
        assert!(matches!(rewrite, Rewrite::Inlined(data) if data.starts_with("data:image/svg+xml")));
    }

    #[test]
    fn service_urls_are_not_rewritten_twice() {
        let fixture = fixture(&["*"]);
        let rewrite = fixture.rewriter.rewrite(
            "http://site.test/_pw/?service=images&src=x",
            &page(),
            Service::Images,
        );
        assert_eq!(rewrite, Rewrite::Unchanged);
    }

    #[test]
    fn token_refs_replace_signed_parameters_except_for_images() {
        let fixture = fixture(&[]);
        let script = Url::parse("http://site.test/app.js").unwrap();
        let image = Url::parse("http://site.test/a.png").unwrap();
        fixture.retriever.insert(&script, "run()", Some(CacheSalt::new(2)));
        fixture.retriever.insert(&image, "png", Some(CacheSalt::new(3)));
        let refs = TokenRefs::new(fixture.cache.with_namespace("refs"));
        let rewriter = fixture.rewriter.with_token_refs(refs.clone());

        let Rewrite::Proxied(proxied) = rewriter.rewrite("/app.js", &page(), Service::Scripts) else {
            panic!("expected a proxied url");
        };
        let short = ServiceRequest::from_url(&Url::parse(&proxied).unwrap(), rewriter.service_base())
            .unwrap();
        assert_eq!(short.src(), None);
        let resolved = refs.resolve(&short).unwrap();
        assert_eq!(resolved.src(), Some(script.as_str()));
        assert_eq!(resolved.param(SALT_PARAM), Some("2"));

        let Rewrite::Proxied(proxied) = rewriter.rewrite("/a.png", &page(), Service::Images) else {
            panic!("expected a proxied url");
        };
        let request = ServiceRequest::from_url(&Url::parse(&proxied).unwrap(), rewriter.service_base())
            .unwrap();
        assert!(request.verify(rewriter.signature()));
    }
}
