//! HTTP response shaping for service results.

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::warn;

use super::caching::CachedOutput;
use super::error::ServiceError;

const ONE_YEAR: Duration = Duration::from_secs(365 * 24 * 60 * 60);
const ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// A request as the host received it.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub url: url::Url,
    pub headers: Vec<(String, String)>,
}

impl IncomingRequest {
    pub fn new(url: url::Url) -> Self {
        Self {
            url,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ServiceResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn push_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_string(), value.into()));
    }

    /// Minimal plain-text rejection.
    pub fn rejected(err: &ServiceError) -> Self {
        let mut response = Self {
            status: err.status(),
            headers: Vec::new(),
            body: Bytes::from(format!("{err}\n")),
        };
        response.push_header("Content-Type", "text/plain; charset=utf-8");
        response.push_header("Cache-Control", "no-store");
        response
    }
}

/// How long clients may keep a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The URL carries a cache salt, so its content never changes.
    Versioned,
    Unversioned,
    NoStore,
}

impl Freshness {
    fn cache_control(self) -> &'static str {
        match self {
            Freshness::Versioned => "public, max-age=31536000, immutable",
            Freshness::Unversioned => "public, max-age=86400",
            Freshness::NoStore => "no-store",
        }
    }

    fn lifetime(self) -> Option<Duration> {
        match self {
            Freshness::Versioned => Some(ONE_YEAR),
            Freshness::Unversioned => Some(ONE_DAY),
            Freshness::NoStore => None,
        }
    }
}

/// Build the response for `output`. `canonical` is the original resource
/// URL advertised through a `Link` header.
pub fn shape(
    output: CachedOutput,
    freshness: Freshness,
    canonical: Option<&str>,
    incoming: &IncomingRequest,
) -> ServiceResponse {
    let etag = entity_tag(&output.body);
    let mut response = ServiceResponse {
        status: 200,
        headers: Vec::new(),
        body: Bytes::new(),
    };
    response.push_header("Cache-Control", freshness.cache_control());
    if let Some(expires) = freshness.lifetime().and_then(http_date_after) {
        response.push_header("Expires", expires);
    }
    response.push_header("ETag", etag.clone());
    response.push_header("Vary", "Accept-Encoding");
    if let Some(canonical) = canonical {
        response.push_header("Link", format!("<{canonical}>; rel=\"canonical\""));
    }

    if incoming
        .header("If-None-Match")
        .is_some_and(|candidates| etag_matches(candidates, &etag))
    {
        response.status = 304;
        return response;
    }

    response.push_header("Content-Type", output.mime.clone());
    let accepts_gzip = incoming.header("Accept-Encoding").is_some_and(accepts_gzip);
    let body = if accepts_gzip && is_textual(&output.mime) {
        match gzip(&output.body) {
            Ok(compressed) => {
                response.push_header("Content-Encoding", "gzip");
                Bytes::from(compressed)
            }
            Err(err) => {
                warn!(
                    target = "service::response",
                    op = "gzip",
                    result = "failed",
                    error = %err,
                    "Serving uncompressed body"
                );
                Bytes::from(output.body)
            }
        }
    } else {
        Bytes::from(output.body)
    };
    response.push_header("Content-Length", body.len().to_string());
    response.body = body;
    response
}

/// Strong validator from a digest of the uncompressed body.
pub fn entity_tag(body: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(body));
    format!("\"{}\"", &digest[..32])
}

fn etag_matches(candidates: &str, etag: &str) -> bool {
    candidates
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

fn accepts_gzip(header: &str) -> bool {
    header.split(',').any(|coding| {
        let mut parts = coding.split(';').map(str::trim);
        let name = parts.next().unwrap_or_default();
        let refused = parts.any(|param| {
            param
                .strip_prefix("q=")
                .and_then(|q| q.parse::<f32>().ok())
                .is_some_and(|q| q == 0.0)
        });
        (name.eq_ignore_ascii_case("gzip") || name == "*") && !refused
    })
}

fn is_textual(mime: &str) -> bool {
    mime.starts_with("text/")
        || matches!(
            mime,
            "application/javascript" | "application/json" | "application/xml" | "image/svg+xml"
        )
}

fn gzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::default());
    encoder.write_all(body)?;
    encoder.finish()
}

fn http_date_after(lifetime: Duration) -> Option<String> {
    let format = format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    );
    (OffsetDateTime::now_utc() + lifetime).format(&format).ok()
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use flate2::read::GzDecoder;

    use super::*;

    fn incoming() -> IncomingRequest {
        IncomingRequest::new(url::Url::parse("http://site.test/_pw/?service=css").unwrap())
    }

    fn css() -> CachedOutput {
        CachedOutput::new("a{color:red}", "text/css")
    }

    #[test]
    fn versioned_responses_are_immutable_for_a_year() {
        let response = shape(css(), Freshness::Versioned, None, &incoming());
        assert_eq!(response.status, 200);
        assert_eq!(
            response.header("cache-control"),
            Some("public, max-age=31536000, immutable")
        );
        assert!(response.header("Expires").is_some_and(|date| date.ends_with(" GMT")));
        assert_eq!(response.header("Vary"), Some("Accept-Encoding"));
        assert_eq!(response.header("Content-Type"), Some("text/css"));
        assert_eq!(response.body, Bytes::from_static(b"a{color:red}"));
        assert_eq!(response.header("Link"), None);
    }

    #[test]
    fn no_store_has_no_expiry() {
        let response = shape(css(), Freshness::NoStore, None, &incoming());
        assert_eq!(response.header("Cache-Control"), Some("no-store"));
        assert_eq!(response.header("Expires"), None);
        let unversioned = shape(css(), Freshness::Unversioned, None, &incoming());
        assert_eq!(unversioned.header("Cache-Control"), Some("public, max-age=86400"));
    }

    #[test]
    fn matching_etag_is_not_modified() {
        let etag = entity_tag(b"a{color:red}");
        let request = incoming().with_header("if-none-match", format!("\"zzz\", {etag}"));
        let response = shape(css(), Freshness::Versioned, None, &request);
        assert_eq!(response.status, 304);
        assert!(response.body.is_empty());
        assert_eq!(response.header("ETag"), Some(etag.as_str()));
    }

    #[test]
    fn textual_bodies_are_gzipped_when_accepted() {
        let request = incoming().with_header("Accept-Encoding", "br, gzip;q=0.8");
        let response = shape(css(), Freshness::Versioned, None, &request);
        assert_eq!(response.header("Content-Encoding"), Some("gzip"));

        let mut decoded = String::new();
        GzDecoder::new(&response.body[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "a{color:red}");

        let refused = incoming().with_header("Accept-Encoding", "gzip;q=0");
        let plain = shape(css(), Freshness::Versioned, None, &refused);
        assert_eq!(plain.header("Content-Encoding"), None);

        let image = CachedOutput::new(vec![0u8; 16], "image/png");
        let binary = shape(image, Freshness::Versioned, None, &request);
        assert_eq!(binary.header("Content-Encoding"), None);
    }

    #[test]
    fn images_advertise_their_canonical_url() {
        let image = CachedOutput::new(vec![1u8, 2, 3], "image/png");
        let response = shape(image, Freshness::Versioned, Some("http://site.test/a.png"), &incoming());
        assert_eq!(
            response.header("Link"),
            Some("<http://site.test/a.png>; rel=\"canonical\"")
        );
    }

    #[test]
    fn rejections_are_plain_text() {
        let response = ServiceResponse::rejected(&ServiceError::Unauthorized);
        assert_eq!(response.status, 401);
        assert_eq!(response.header("Cache-Control"), Some("no-store"));
        assert_eq!(response.body, Bytes::from_static(b"signature does not match the request\n"));
    }
}
