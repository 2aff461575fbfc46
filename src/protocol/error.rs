use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed service request: {0}")]
    Malformed(String),
    #[error("service request has no base url")]
    MissingBase,
    #[error("invalid path encoding: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("unknown token ref `{0}`")]
    UnknownRef(String),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ProtocolError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }
}
