//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    fmt,
    num::NonZeroU64,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::short_hash;
use crate::domain::RequestFormat;
use crate::protocol::Switches;

pub use cli::{
    CacheArgs, CacheCommand, CliArgs, Command, OptimizeArgs, Overrides, RequestArgs, SignArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagewright";
const DEFAULT_ORIGIN: &str = "http://localhost/";
const DEFAULT_DOCUMENT_ROOT: &str = "public";
const DEFAULT_CACHE_ROOT: &str = "cache";
const DEFAULT_CACHE_STORE: &str = "pagewright";
const DEFAULT_CACHE_MAX_SIZE_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_CACHE_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_SERVICE_PATH: &str = "_pagewright/";
const DEFAULT_FILTERS: &[&str] = &["images", "css", "scripts"];
const DEFAULT_INLINE_MAX_BYTES: usize = 2048;
const DEFAULT_LAZY_SKIP: usize = 2;
const DEFAULT_DOCUMENT_MAX_BYTES: usize = 4 * 1024 * 1024;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_FETCH_RETRIES: u32 = 2;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub cache: CacheSettings,
    pub service: ServiceSettings,
    pub filters: FilterSettings,
    pub document: DocumentSettings,
    pub fetch: FetchSettings,
    /// Site-wide switch defaults, overridden by cookie and query switches.
    pub switches: Switches,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    /// Same-origin URLs under this prefix map to `document_root`.
    pub origin: Url,
    pub document_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub root: PathBuf,
    pub store: String,
    pub max_size_bytes: NonZeroU64,
    pub autorecover: bool,
    /// Zero means entries never expire.
    pub default_ttl: Duration,
}

#[derive(Clone, PartialEq, Eq)]
pub struct IdentitySettings {
    pub name: String,
    pub secret: String,
}

impl fmt::Debug for IdentitySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySettings")
            .field("name", &self.name)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Absolute URL the service endpoint is mounted at, ending in `/`.
    pub url: Url,
    pub format: RequestFormat,
    /// Signing identity; `None` signs anonymously with a generated secret.
    pub identity: Option<IdentitySettings>,
    /// Additional identities accepted when verifying.
    pub verifiers: Vec<IdentitySettings>,
    /// Requests carrying this header are trusted without a signature.
    pub trusted_header: Option<String>,
    pub token_refs: bool,
}

#[derive(Debug, Clone)]
pub struct FilterSettings {
    /// Filter keys enabled by default, in run order.
    pub enabled: Vec<String>,
    /// Glob patterns of remote URLs that may be rewritten.
    pub allow: Vec<String>,
    pub inline_max_bytes: usize,
    pub lazy_skip: usize,
}

#[derive(Debug, Clone)]
pub struct DocumentSettings {
    /// Larger documents pass through untouched.
    pub max_bytes: usize,
    pub timing_comment: bool,
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub timeout: Duration,
    pub retries: u32,
}

impl Settings {
    /// Short digest identifying this configuration, secrets excluded.
    pub fn digest(&self) -> String {
        short_hash(&format!("{self:?}"), 16)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PAGEWRIGHT").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve settings from a TOML document alone, with defaults for the rest.
pub fn from_toml(source: &str) -> Result<Settings, LoadError> {
    let raw: RawSettings = Config::builder()
        .add_source(File::from_str(source, FileFormat::Toml))
        .build()?
        .try_deserialize()?;
    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    cache: RawCacheSettings,
    service: RawServiceSettings,
    filters: RawFilterSettings,
    document: RawDocumentSettings,
    fetch: RawFetchSettings,
    switches: Option<String>,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(origin) = overrides.site_origin.as_ref() {
            self.site.origin = Some(origin.clone());
        }
        if let Some(root) = overrides.document_root.as_ref() {
            self.site.document_root = Some(root.clone());
        }
        if let Some(root) = overrides.cache_root.as_ref() {
            self.cache.root = Some(root.clone());
        }
        if let Some(url) = overrides.service_url.as_ref() {
            self.service.url = Some(url.clone());
        }
        if let Some(format) = overrides.request_format.as_ref() {
            self.service.format = Some(format.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            site,
            cache,
            service,
            filters,
            document,
            fetch,
            switches,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let site = build_site_settings(site)?;
        let cache = build_cache_settings(cache)?;
        let service = build_service_settings(service, &site.origin)?;
        let filters = build_filter_settings(filters)?;
        let document = build_document_settings(document)?;
        let fetch = build_fetch_settings(fetch)?;
        let switches = switches
            .as_deref()
            .map(Switches::parse)
            .unwrap_or_default();

        Ok(Self {
            logging,
            site,
            cache,
            service,
            filters,
            document,
            fetch,
            switches,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let raw_origin = site.origin.unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
    let mut origin = Url::parse(raw_origin.trim())
        .map_err(|err| LoadError::invalid("site.origin", format!("invalid url: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(LoadError::invalid("site.origin", "scheme must be http or https"));
    }
    if !origin.path().ends_with('/') {
        let path = format!("{}/", origin.path());
        origin.set_path(&path);
    }

    let document_root = site
        .document_root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENT_ROOT));
    if document_root.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "site.document_root",
            "path must not be empty",
        ));
    }

    Ok(SiteSettings {
        origin,
        document_root,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let root = cache
        .root
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_ROOT));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("cache.root", "path must not be empty"));
    }

    let store = cache
        .store
        .unwrap_or_else(|| DEFAULT_CACHE_STORE.to_string());
    if store.is_empty()
        || !store
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_'))
    {
        return Err(LoadError::invalid(
            "cache.store",
            "must be a non-empty name of letters, digits, `-` or `_`",
        ));
    }

    let max_size_bytes = NonZeroU64::new(
        cache
            .max_size_bytes
            .unwrap_or(DEFAULT_CACHE_MAX_SIZE_BYTES),
    )
    .ok_or_else(|| LoadError::invalid("cache.max_size_bytes", "must be greater than zero"))?;

    Ok(CacheSettings {
        root,
        store,
        max_size_bytes,
        autorecover: cache.autorecover.unwrap_or(true),
        default_ttl: Duration::from_secs(cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS)),
    })
}

fn build_identity(
    raw: RawIdentitySettings,
    key: &'static str,
) -> Result<IdentitySettings, LoadError> {
    let name = raw.name.unwrap_or_default();
    if !name
        .bytes()
        .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_'))
    {
        return Err(LoadError::invalid(
            key,
            "identity name may only contain letters, digits, `-` or `_`",
        ));
    }
    let secret = raw.secret.unwrap_or_default();
    if secret.trim().is_empty() {
        return Err(LoadError::invalid(key, "identity secret must not be empty"));
    }
    Ok(IdentitySettings { name, secret })
}

fn build_service_settings(
    service: RawServiceSettings,
    origin: &Url,
) -> Result<ServiceSettings, LoadError> {
    let raw_url = service
        .url
        .unwrap_or_else(|| DEFAULT_SERVICE_PATH.to_string());
    let mut url = origin
        .join(raw_url.trim())
        .map_err(|err| LoadError::invalid("service.url", format!("invalid url: {err}")))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid("service.url", "must be an http(s) url"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);

    let format = match service.format {
        Some(format) => RequestFormat::from_str(&format)
            .map_err(|reason| LoadError::invalid("service.format", reason))?,
        None => RequestFormat::default(),
    };

    let identity = service
        .identity
        .map(|raw| build_identity(raw, "service.identity"))
        .transpose()?;
    let verifiers = service
        .verifiers
        .unwrap_or_default()
        .into_iter()
        .map(|raw| build_identity(raw, "service.verifiers"))
        .collect::<Result<Vec<_>, _>>()?;

    let trusted_header = service.trusted_header.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    Ok(ServiceSettings {
        url,
        format,
        identity,
        verifiers,
        trusted_header,
        token_refs: service.token_refs.unwrap_or(true),
    })
}

fn build_filter_settings(filters: RawFilterSettings) -> Result<FilterSettings, LoadError> {
    let enabled = filters
        .enabled
        .unwrap_or_else(|| DEFAULT_FILTERS.iter().map(|key| key.to_string()).collect());
    if let Some(bad) = enabled.iter().find(|key| {
        key.is_empty()
            || !key
                .bytes()
                .all(|byte| byte.is_ascii_lowercase() || byte == b'_')
    }) {
        return Err(LoadError::invalid(
            "filters.enabled",
            format!("`{bad}` is not a filter key"),
        ));
    }

    Ok(FilterSettings {
        enabled,
        allow: filters.allow.unwrap_or_default(),
        inline_max_bytes: filters.inline_max_bytes.unwrap_or(DEFAULT_INLINE_MAX_BYTES),
        lazy_skip: filters.lazy_skip.unwrap_or(DEFAULT_LAZY_SKIP),
    })
}

fn build_document_settings(document: RawDocumentSettings) -> Result<DocumentSettings, LoadError> {
    let max_bytes = document.max_bytes.unwrap_or(DEFAULT_DOCUMENT_MAX_BYTES);
    if max_bytes == 0 {
        return Err(LoadError::invalid(
            "document.max_bytes",
            "must be greater than zero",
        ));
    }
    Ok(DocumentSettings {
        max_bytes,
        timing_comment: document.timing_comment.unwrap_or(false),
    })
}

fn build_fetch_settings(fetch: RawFetchSettings) -> Result<FetchSettings, LoadError> {
    let connect_ms = fetch.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);
    let timeout_ms = fetch.timeout_ms.unwrap_or(DEFAULT_FETCH_TIMEOUT_MS);
    if connect_ms == 0 {
        return Err(LoadError::invalid(
            "fetch.connect_timeout_ms",
            "must be greater than zero",
        ));
    }
    if timeout_ms < connect_ms {
        return Err(LoadError::invalid(
            "fetch.timeout_ms",
            "must not be shorter than the connect timeout",
        ));
    }

    Ok(FetchSettings {
        connect_timeout: Duration::from_millis(connect_ms),
        timeout: Duration::from_millis(timeout_ms),
        retries: fetch.retries.unwrap_or(DEFAULT_FETCH_RETRIES),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    origin: Option<String>,
    document_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    root: Option<PathBuf>,
    store: Option<String>,
    max_size_bytes: Option<u64>,
    autorecover: Option<bool>,
    default_ttl_seconds: Option<u64>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawIdentitySettings {
    name: Option<String>,
    secret: Option<String>,
}

impl fmt::Debug for RawIdentitySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawIdentitySettings")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServiceSettings {
    url: Option<String>,
    format: Option<String>,
    identity: Option<RawIdentitySettings>,
    verifiers: Option<Vec<RawIdentitySettings>>,
    trusted_header: Option<String>,
    token_refs: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFilterSettings {
    enabled: Option<Vec<String>>,
    allow: Option<Vec<String>>,
    inline_max_bytes: Option<usize>,
    lazy_skip: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDocumentSettings {
    max_bytes: Option<usize>,
    timing_comment: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFetchSettings {
    connect_timeout_ms: Option<u64>,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
}
