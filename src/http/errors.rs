//! Error classification for third-party HTTP calls.

use thiserror::Error;

/// Classified failure of a [`ResilientClient`](super::ResilientClient) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HttpError {
    /// A 4xx other than 401/429. Never retried.
    #[error("{service} rejected the request with HTTP {status}: {body}")]
    ClientError {
        service: String,
        status: u16,
        body: String,
    },

    /// HTTP 429. Never retried.
    #[error("{service} quota exceeded (HTTP 429)")]
    QuotaExceeded { service: String },

    /// HTTP 401. Never retried.
    #[error("{service} rejected the configured credentials (HTTP 401)")]
    CredentialInvalid { service: String },

    /// 5xx or network failure after the retry budget is spent, or any other
    /// non-2xx status.
    #[error("{service} transient failure{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Transient {
        service: String,
        status: Option<u16>,
        message: String,
    },

    /// A 2xx whose body was not the JSON the caller expected.
    #[error("{service} returned a malformed response: {message}")]
    MalformedResponse { service: String, message: String },
}

impl HttpError {
    /// Name of the upstream service the error came from.
    pub fn service(&self) -> &str {
        match self {
            HttpError::ClientError { service, .. }
            | HttpError::QuotaExceeded { service }
            | HttpError::CredentialInvalid { service }
            | HttpError::Transient { service, .. }
            | HttpError::MalformedResponse { service, .. } => service,
        }
    }

    /// Upstream HTTP status, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::ClientError { status, .. } => Some(*status),
            HttpError::QuotaExceeded { .. } => Some(429),
            HttpError::CredentialInvalid { .. } => Some(401),
            HttpError::Transient { status, .. } => *status,
            HttpError::MalformedResponse { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_message_includes_status_when_known() {
        let err = HttpError::Transient {
            service: "airnow".to_string(),
            status: Some(503),
            message: "Service Unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "airnow transient failure (HTTP 503): Service Unavailable"
        );
        assert_eq!(err.status(), Some(503));

        let network = HttpError::Transient {
            service: "airnow".to_string(),
            status: None,
            message: "connection reset".to_string(),
        };
        assert_eq!(
            network.to_string(),
            "airnow transient failure: connection reset"
        );
        assert_eq!(network.service(), "airnow");
    }
}
