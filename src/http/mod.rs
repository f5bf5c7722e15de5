//! # Resilient HTTP substrate
//!
//! Per-provider network client used by every capability: minimum call
//! spacing, request timeout, retry with exponential backoff, and
//! classification of upstream failures into [`HttpError`].

pub mod client;
pub mod errors;
pub mod rate_limiter;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ResilientClient, RetryPolicy};
pub use errors::HttpError;
pub use rate_limiter::RateLimiter;
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};
