use thiserror::Error;

use crate::protocol::ProtocolError;

/// Why a service request was refused. Every variant maps to a 4xx status.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("unknown service `{0}`")]
    UnknownService(String),
    #[error("request names no resource")]
    MissingSource,
    #[error("signature does not match the request")]
    Unauthorized,
    #[error("`{0}` may not be served")]
    Forbidden(String),
    #[error("`{0}` is unavailable")]
    Unavailable(String),
    #[error("cannot process resource: {0}")]
    Unprocessable(String),
}

impl ServiceError {
    pub fn unprocessable(reason: impl Into<String>) -> Self {
        Self::Unprocessable(reason.into())
    }

    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Protocol(ProtocolError::UnknownRef(_) | ProtocolError::Cache(_)) => 404,
            ServiceError::Protocol(_) => 400,
            ServiceError::UnknownService(_) | ServiceError::MissingSource => 404,
            ServiceError::Unavailable(_) => 404,
            ServiceError::Unauthorized => 401,
            ServiceError::Forbidden(_) => 403,
            ServiceError::Unprocessable(_) => 422,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Protocol(ProtocolError::UnknownRef(_)) => "unknown_ref",
            ServiceError::Protocol(_) => "malformed",
            ServiceError::UnknownService(_) => "unknown_service",
            ServiceError::MissingSource => "missing_source",
            ServiceError::Unauthorized => "unauthorized",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Unavailable(_) => "unavailable",
            ServiceError::Unprocessable(_) => "unprocessable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_are_client_errors() {
        let cases = [
            (ServiceError::Protocol(ProtocolError::malformed("x")), 400),
            (ServiceError::Protocol(ProtocolError::UnknownRef("r".into())), 404),
            (ServiceError::MissingSource, 404),
            (ServiceError::Unauthorized, 401),
            (ServiceError::Forbidden("u".into()), 403),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }
}
