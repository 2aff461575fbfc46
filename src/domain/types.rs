//! Enumerations used on the wire and in configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resource services addressable through a service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Images,
    Css,
    Scripts,
    Bundler,
    Diagnostics,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::Images,
        Service::Css,
        Service::Scripts,
        Service::Bundler,
        Service::Diagnostics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Service::Images => "images",
            Service::Css => "css",
            Service::Scripts => "scripts",
            Service::Bundler => "bundler",
            Service::Diagnostics => "diagnostics",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown service `{0}`")]
pub struct UnknownService(pub String);

impl FromStr for Service {
    type Err = UnknownService;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|service| service.as_str() == value)
            .ok_or_else(|| UnknownService(value.to_string()))
    }
}

/// Wire encoding used when building service URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestFormat {
    /// `?service=images&src=...&sig=...`
    #[default]
    Query,
    /// Parameters base64url-encoded into path segments.
    Path,
}

impl FromStr for RequestFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "query" => Ok(Self::Query),
            "path" => Ok(Self::Path),
            other => Err(format!("unknown request format `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_names_parse_back() {
        for service in Service::ALL {
            assert_eq!(service.as_str().parse::<Service>(), Ok(service));
        }
        assert!("thumbnails".parse::<Service>().is_err());
    }

    #[test]
    fn request_format_is_case_insensitive() {
        assert_eq!("PATH".parse::<RequestFormat>(), Ok(RequestFormat::Path));
        assert!("fragment".parse::<RequestFormat>().is_err());
    }
}
