use bytes::Bytes;
use reqwest::blocking::Client;
use tracing::{debug, warn};
use url::Url;

use super::RetrievalError;
use crate::config::FetchSettings;
use crate::domain::{CacheSalt, ResourceRetriever};
use crate::infra::error::InfraError;

/// Fetches remote resources with bounded time and retries. Remote resources
/// have no derivable cache salt.
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    client: Client,
    retries: u32,
}

impl HttpRetriever {
    pub fn new(settings: &FetchSettings) -> Result<Self, InfraError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .user_agent(Self::user_agent())
            .build()
            .map_err(|err| InfraError::http(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            retries: settings.retries,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("pagewright/", env!("CARGO_PKG_VERSION"))
    }

    fn fetch_once(&self, url: &Url) -> Result<Bytes, RetrievalError> {
        let response = self.client.get(url.as_str()).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalError::Status(status.as_u16()));
        }
        Ok(response.bytes()?)
    }
}

/// Timeouts, connection failures and server errors are worth another try.
fn is_transient(err: &RetrievalError) -> bool {
    match err {
        RetrievalError::Http(err) => err.is_timeout() || err.is_connect(),
        RetrievalError::Status(status) => *status >= 500,
        _ => false,
    }
}

impl ResourceRetriever for HttpRetriever {
    fn retrieve(&self, url: &Url) -> Option<Bytes> {
        if !matches!(url.scheme(), "http" | "https") {
            debug!(
                target = "infra::retrieval::http",
                op = "retrieve",
                result = "skipped",
                error = %RetrievalError::Scheme(url.scheme().to_string()),
                "Unsupported scheme for remote retrieval"
            );
            return None;
        }

        let mut attempt = 0;
        loop {
            match self.fetch_once(url) {
                Ok(bytes) => return Some(bytes),
                Err(err) if is_transient(&err) && attempt < self.retries => {
                    attempt += 1;
                    debug!(
                        target = "infra::retrieval::http",
                        op = "retrieve",
                        result = "retrying",
                        url = %url,
                        attempt,
                        error = %err,
                        "Retrying remote fetch"
                    );
                }
                Err(err) => {
                    warn!(
                        target = "infra::retrieval::http",
                        op = "retrieve",
                        result = "unavailable",
                        url = %url,
                        attempts = attempt + 1,
                        error = %err,
                        "Remote resource unavailable"
                    );
                    return None;
                }
            }
        }
    }

    fn cache_salt(&self, _url: &Url) -> Option<CacheSalt> {
        None
    }
}
