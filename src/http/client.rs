//! Resilient per-provider HTTP client.
//!
//! Every capability owns one [`ResilientClient`]. A call goes through:
//!
//! 1. the client's [`RateLimiter`] (minimum spacing between sends),
//! 2. the [`HttpTransport`],
//! 3. status classification, retrying 5xx and network failures with
//!    exponential backoff (`base * 2^attempt`).
//!
//! 401, 429 and every other 4xx fail immediately.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::errors::HttpError;
use super::rate_limiter::RateLimiter;
use super::transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};
use crate::config::HttpSettings;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Retry budget for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled for each subsequent one.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt with zero-based index `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

impl From<&HttpSettings> for RetryPolicy {
    fn from(settings: &HttpSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// ResilientClient
// ---------------------------------------------------------------------------

/// Rate-limited, retrying JSON client bound to one upstream service.
pub struct ResilientClient {
    service: String,
    base_url: String,
    transport: Arc<dyn HttpTransport>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    default_query: Vec<(String, String)>,
    default_headers: Vec<(String, String)>,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("service", &self.service)
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("min_interval", &self.limiter.min_interval())
            .finish()
    }
}

impl ResilientClient {
    /// Build a client that talks to `base_url` over `reqwest`, configured from
    /// the shared HTTP settings.
    pub fn new(service: &str, base_url: &str, settings: &HttpSettings) -> Self {
        let transport = ReqwestTransport::new(Duration::from_secs(settings.timeout_secs));
        Self::with_transport(service, base_url, Arc::new(transport))
            .with_retry_policy(RetryPolicy::from(settings))
            .with_calls_per_second(settings.calls_per_second)
    }

    /// Build a client over an arbitrary transport, with default retry policy
    /// and no spacing.
    pub fn with_transport(
        service: &str,
        base_url: &str,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            service: service.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            limiter: RateLimiter::unlimited(),
            retry: RetryPolicy::default(),
            default_query: Vec::new(),
            default_headers: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_calls_per_second(mut self, calls_per_second: f64) -> Self {
        self.limiter = RateLimiter::per_second(calls_per_second);
        self
    }

    /// Attach a query parameter to every request (e.g. an API key).
    pub fn with_default_query(mut self, name: &str, value: &str) -> Self {
        self.default_query.push((name.to_string(), value.to_string()));
        self
    }

    /// Attach a header to every request.
    pub fn with_default_header(mut self, name: &str, value: &str) -> Self {
        self.default_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// `GET path?params`.
    pub async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, HttpError> {
        self.call(HttpMethod::Get, path, Some(params)).await
    }

    /// Perform one logical call, retrying transient failures.
    pub async fn call(
        &self,
        method: HttpMethod,
        path: &str,
        params: Option<&[(&str, String)]>,
    ) -> Result<Value, HttpError> {
        let request = self.build_request(method, path, params.unwrap_or_default());
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                log::warn!(
                    "{} {} {} retry attempt {} after {:?}",
                    self.service,
                    method,
                    path,
                    attempt,
                    delay
                );
                tokio::time::sleep(delay).await;
            }

            self.limiter.acquire().await;

            let outcome = self.transport.send(request.clone()).await;
            match self.classify(outcome) {
                Attempt::Done(result) => return result,
                Attempt::Retry(error) => last_error = Some(error),
            }
        }

        Err(last_error.unwrap_or_else(|| HttpError::Transient {
            service: self.service.clone(),
            status: None,
            message: "no attempts were made".to_string(),
        }))
    }

    fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        params: &[(&str, String)],
    ) -> HttpRequest {
        let url = if path.is_empty() {
            self.base_url.clone()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        };

        let mut query = self.default_query.clone();
        query.extend(params.iter().map(|(k, v)| (k.to_string(), v.clone())));

        HttpRequest {
            method,
            url,
            query,
            headers: self.default_headers.clone(),
            body: None,
        }
    }

    fn classify(&self, outcome: Result<HttpResponse, TransportError>) -> Attempt {
        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry(HttpError::Transient {
                    service: self.service.clone(),
                    status: None,
                    message: e.to_string(),
                })
            }
        };

        let status = response.status;
        match status {
            200..=299 => Attempt::Done(self.parse_body(&response.body)),
            401 => Attempt::Done(Err(HttpError::CredentialInvalid {
                service: self.service.clone(),
            })),
            429 => Attempt::Done(Err(HttpError::QuotaExceeded {
                service: self.service.clone(),
            })),
            400..=499 => Attempt::Done(Err(HttpError::ClientError {
                service: self.service.clone(),
                status,
                body: truncate(&response.body, 500),
            })),
            500..=599 => Attempt::Retry(HttpError::Transient {
                service: self.service.clone(),
                status: Some(status),
                message: truncate(&response.body, 500),
            }),
            _ => Attempt::Done(Err(HttpError::Transient {
                service: self.service.clone(),
                status: Some(status),
                message: format!("unexpected status {}", status),
            })),
        }
    }

    fn parse_body(&self, body: &str) -> Result<Value, HttpError> {
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(body).map_err(|e| HttpError::MalformedResponse {
            service: self.service.clone(),
            message: format!("{} - Body: {}", e, truncate(body, 200)),
        })
    }
}

enum Attempt {
    Done(Result<Value, HttpError>),
    Retry(HttpError),
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedTransport;
    use serde_json::json;

    fn client(transport: &Arc<ScriptedTransport>) -> ResilientClient {
        ResilientClient::with_transport("test-api", "https://api.example.com/v1/", transport.clone())
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                backoff_base: Duration::from_millis(1),
            })
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_base: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_success_parses_json_and_builds_url() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"score": 87}));
        let client = client(&transport).with_default_query("apikey", "secret");

        let value = client
            .get("/score", &[("lat", "40.7128".to_string())])
            .await
            .unwrap();
        assert_eq!(value["score"], 87);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "https://api.example.com/v1/score");
        assert_eq!(requests[0].query_param("apikey"), Some("secret"));
        assert_eq!(requests[0].query_param("lat"), Some("40.7128"));
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_status(503, "busy")
            .push_error(TransportError::Timeout)
            .push_json(json!({"ok": true}));

        let value = client(&transport).get("status", &[]).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_transient() {
        let transport = Arc::new(ScriptedTransport::new());
        transport
            .push_status(500, "a")
            .push_status(502, "b")
            .push_status(504, "c");

        let err = client(&transport).get("x", &[]).await.unwrap_err();
        assert_eq!(
            err,
            HttpError::Transient {
                service: "test-api".to_string(),
                status: Some(504),
                message: "c".to_string(),
            }
        );
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        for (status, expected) in [
            (
                401,
                HttpError::CredentialInvalid {
                    service: "test-api".to_string(),
                },
            ),
            (
                429,
                HttpError::QuotaExceeded {
                    service: "test-api".to_string(),
                },
            ),
            (
                404,
                HttpError::ClientError {
                    service: "test-api".to_string(),
                    status: 404,
                    body: "missing".to_string(),
                },
            ),
        ] {
            let transport = Arc::new(ScriptedTransport::new());
            transport.push_status(status, "missing");
            let err = client(&transport).get("x", &[]).await.unwrap_err();
            assert_eq!(err, expected);
            assert_eq!(transport.request_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_redirect_status_is_generic_transient() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(302, "");
        let err = client(&transport).get("x", &[]).await.unwrap_err();
        assert!(matches!(
            err,
            HttpError::Transient {
                status: Some(302),
                ..
            }
        ));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(200, "<html>not json</html>");
        let err = client(&transport).get("x", &[]).await.unwrap_err();
        assert!(matches!(err, HttpError::MalformedResponse { .. }));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_success_body_is_null() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_status(204, "");
        let value = client(&transport).get("x", &[]).await.unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("short", 10), "short");
    }
}
