//! Scripted transport for unit tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

/// Replays queued responses in order and records every request it receives.
///
/// When the queue is empty the fallback response is returned, or a connection
/// error if no fallback was set.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    fallback: Mutex<Option<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: u16, body: &str) -> &Self {
        self.responses
            .lock()
            .push_back(Ok(HttpResponse::new(status, body)));
        self
    }

    pub fn push_json(&self, body: Value) -> &Self {
        self.responses
            .lock()
            .push_back(Ok(HttpResponse::json(200, &body)));
        self
    }

    pub fn push_error(&self, error: TransportError) -> &Self {
        self.responses.lock().push_back(Err(error));
        self
    }

    pub fn always_json(&self, body: Value) -> &Self {
        *self.fallback.lock() = Some(HttpResponse::json(200, &body));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);
        if let Some(next) = self.responses.lock().pop_front() {
            return next;
        }
        match self.fallback.lock().clone() {
            Some(response) => Ok(response),
            None => Err(TransportError::Connection("no scripted response".to_string())),
        }
    }
}
