//! Service requests and their two wire formats.
//!
//! Query format: `<base>?cs=1&service=images&src=...&sig=<token>`.
//!
//! Path format: the same query string, base64url-encoded, split into path
//! segments of at most 255 bytes. The last segment carries an optional stem
//! (`@2x`) and the extension of the `src` resource, so
//! `<base>/<chunk>/<chunk>@2x.png` looks like an image to servers and CDNs.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use percent_encoding::percent_decode_str;
use url::{Url, form_urlencoded};

use super::error::ProtocolError;
use super::signature::Signature;
use super::switches::{SWITCH_PARAM, Switches};
use crate::domain::{RequestFormat, Service};

pub const SERVICE_PARAM: &str = "service";
pub const SRC_PARAM: &str = "src";
pub const SIGNATURE_PARAM: &str = "sig";
pub const REF_PARAM: &str = "ref";
/// Cache salt of the `src` resource at rewrite time.
pub const SALT_PARAM: &str = "cs";

const CHUNK_LEN: usize = 255;

/// An immutable request value; `with_*` methods return modified copies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceRequest {
    params: Vec<(String, String)>,
    base: Option<Url>,
    token: Option<String>,
    stem: Option<String>,
    switches: Switches,
}

impl ServiceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_service(service: Service) -> Self {
        Self::new().with_param(SERVICE_PARAM, service.as_str())
    }

    /// Set `key` to `value`, replacing the first existing value in place.
    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.params.iter_mut().find(|(existing, _)| existing == key) {
            Some(slot) => slot.1 = value,
            None => self.params.push((key.to_string(), value)),
        }
        self
    }

    pub fn without_param(mut self, key: &str) -> Self {
        self.params.retain(|(existing, _)| existing != key);
        self
    }

    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_stem(mut self, stem: Option<String>) -> Self {
        self.stem = stem.filter(|stem| !stem.is_empty());
        self
    }

    pub fn with_switches(mut self, switches: Switches) -> Self {
        self.switches = switches;
        self
    }

    /// First value of `key`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// Parameters in insertion order, duplicates included.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn service(&self) -> Option<&str> {
        self.param(SERVICE_PARAM)
    }

    pub fn src(&self) -> Option<&str> {
        self.param(SRC_PARAM)
    }

    pub fn base(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn stem(&self) -> Option<&str> {
        self.stem.as_deref()
    }

    pub fn switches(&self) -> &Switches {
        &self.switches
    }

    /// Key-sorted parameters, first occurrence of each key only.
    pub fn canonical_params(&self) -> BTreeMap<&str, &str> {
        let mut canonical = BTreeMap::new();
        for (key, value) in &self.params {
            canonical.entry(key.as_str()).or_insert(value.as_str());
        }
        canonical
    }

    /// The string a token commits to: the canonical parameters, form-encoded.
    pub fn canonical(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.canonical_params() {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }

    pub fn signed(self, signature: &Signature) -> Self {
        let token = signature.sign(&self.canonical());
        self.with_token(token)
    }

    /// Check the token against the parameters as given, then against the
    /// parameters with any `@2x`-style stem removed from `src`.
    pub fn verify(&self, signature: &Signature) -> bool {
        let Some(token) = self.token() else {
            return false;
        };
        if signature.verify(token, &self.canonical()) {
            return true;
        }
        match self.src().and_then(strip_stem) {
            Some(stripped) => {
                let relaxed = self.clone().with_param(SRC_PARAM, stripped);
                signature.verify(token, &relaxed.canonical())
            }
            None => false,
        }
    }

    fn payload(&self) -> String {
        let mut payload = self.canonical();
        if let Some(token) = &self.token {
            form_urlencoded::Serializer::for_suffix(&mut payload, 0)
                .append_pair(SIGNATURE_PARAM, token);
        }
        payload
    }

    pub fn to_url(&self, format: RequestFormat) -> Result<Url, ProtocolError> {
        match format {
            RequestFormat::Query => self.to_query_url(),
            RequestFormat::Path => self.to_path_url(),
        }
    }

    pub fn to_query_url(&self) -> Result<Url, ProtocolError> {
        let mut url = self.base.clone().ok_or(ProtocolError::MissingBase)?;
        url.set_query(Some(&self.payload()));
        Ok(url)
    }

    pub fn to_path_url(&self) -> Result<Url, ProtocolError> {
        let mut url = self.base.clone().ok_or(ProtocolError::MissingBase)?;
        url.set_query(None);

        let suffix = self.path_suffix();
        let room = CHUNK_LEN
            .checked_sub(suffix.len())
            .filter(|room| *room > 0)
            .ok_or_else(|| ProtocolError::malformed("stem does not fit in a path segment"))?;

        let encoded = URL_SAFE_NO_PAD.encode(self.payload());
        // base64url output is ASCII, so any byte offset is a char boundary.
        let mut chunks: Vec<String> = Vec::new();
        let mut rest = encoded.as_str();
        while rest.len() > room {
            let cut = if rest.len() > CHUNK_LEN {
                CHUNK_LEN
            } else {
                rest.len() - room
            };
            let (chunk, tail) = rest.split_at(cut);
            chunks.push(chunk.to_string());
            rest = tail;
        }
        chunks.push(format!("{rest}{suffix}"));

        url.path_segments_mut()
            .map_err(|()| ProtocolError::malformed("base url cannot carry a path"))?
            .pop_if_empty()
            .extend(chunks.iter().map(String::as_str));
        Ok(url)
    }

    /// Stem and `.extension` carried by the last path segment.
    fn path_suffix(&self) -> String {
        let mut suffix = self.stem.clone().unwrap_or_default();
        if let Some(extension) = self.src().and_then(src_extension) {
            suffix.push('.');
            suffix.push_str(&extension);
        }
        suffix
    }

    /// Decode a request addressed to `base` in either wire format.
    pub fn from_url(url: &Url, base: &Url) -> Result<Self, ProtocolError> {
        let base_path = base.path().trim_end_matches('/');
        let relative = url
            .path()
            .strip_prefix(base_path)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .map(|rest| rest.trim_start_matches('/'))
            .ok_or_else(|| ProtocolError::malformed("url is outside the service base"))?;

        let mut route = url.clone();
        route.set_query(None);
        route.set_fragment(None);

        let mut request = if relative.is_empty() {
            Self::from_payload(url.query().unwrap_or_default())
        } else {
            route.set_path(base.path());
            let mut request = Self::from_path(relative)?;
            let switches = url
                .query_pairs()
                .find(|(key, _)| key == SWITCH_PARAM)
                .map(|(_, value)| Switches::parse(&value));
            if let Some(switches) = switches {
                request.switches = request.switches.merge(&switches);
            }
            request
        };
        request.base = Some(route);
        Ok(request)
    }

    fn from_path(relative: &str) -> Result<Self, ProtocolError> {
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, leading)) = segments.split_last() else {
            return Err(ProtocolError::malformed("empty path payload"));
        };

        let last = percent_decode_str(last)
            .decode_utf8()
            .map_err(|_| ProtocolError::malformed("path segment is not utf-8"))?;
        let body = last.split_once('.').map_or(last.as_ref(), |(body, _)| body);
        let (chunk, stem) = match body.split_once('@') {
            Some((chunk, stem)) => (chunk, Some(format!("@{stem}"))),
            None => (body, None),
        };

        let mut encoded = leading.concat();
        encoded.push_str(chunk);
        let decoded = URL_SAFE_NO_PAD.decode(encoded.as_bytes())?;
        let payload = String::from_utf8(decoded)
            .map_err(|_| ProtocolError::malformed("path payload is not utf-8"))?;

        Ok(Self::from_payload(&payload).with_stem(stem))
    }

    fn from_payload(payload: &str) -> Self {
        let mut request = Self::new();
        for (key, value) in form_urlencoded::parse(payload.as_bytes()) {
            match key.as_ref() {
                SIGNATURE_PARAM => {
                    if request.token.is_none() {
                        request.token = Some(value.into_owned());
                    }
                }
                SWITCH_PARAM => {
                    request.switches = request.switches.merge(&Switches::parse(&value));
                }
                _ => request.params.push((key.into_owned(), value.into_owned())),
            }
        }
        request
    }
}

/// Remove an `@2x`-style stem from the file name in `value`, if present.
pub fn strip_stem(value: &str) -> Option<String> {
    let file_start = value.rfind('/').map_or(0, |index| index + 1);
    let (directory, file) = value.split_at(file_start);
    let (name, stem) = file.rsplit_once('@')?;
    let (density, extension) = stem.split_once('x')?;
    let valid = !name.is_empty()
        && density.as_bytes().first().is_some_and(u8::is_ascii_digit)
        && density.bytes().all(|byte| byte.is_ascii_digit() || byte == b'.')
        && (extension.is_empty() || extension.starts_with('.'));
    valid.then(|| format!("{directory}{name}{extension}"))
}

fn src_extension(src: &str) -> Option<String> {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    let file = path.rsplit('/').next().unwrap_or(path);
    let (stem, extension) = file.rsplit_once('.')?;
    let valid = !stem.is_empty()
        && !extension.is_empty()
        && extension.len() <= 8
        && extension.bytes().all(|byte| byte.is_ascii_alphanumeric());
    valid.then(|| extension.to_ascii_lowercase())
}
