use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for outbound transport operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when the connection to an origin fails (refused, DNS, reset)
    #[error("connection error: {0}")]
    Connection(String),

    /// Error when the origin does not produce response headers in time
    #[error("no response headers after {0:?}")]
    ResponseHeaderTimeout(Duration),

    /// Error when the outbound request cannot be constructed
    #[error("invalid outbound request: {0}")]
    InvalidRequest(String),
}

/// Result type alias for outbound transport operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for forwarding requests to origins.
///
/// There is one implementation per process; every service shares it so the
/// underlying connection pool is shared too. Implementations must be
/// internally thread-safe and must cancel the in-flight exchange when the
/// returned future is dropped.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send one HTTP request to an origin and return its response.
    ///
    /// The request URI must be absolute. The response body is streamed; only
    /// the status and headers have arrived when this resolves.
    async fn send_request(&self, req: Request<Body>) -> HttpClientResult<Response<Body>>;
}
