//! Generic HTTP transport abstraction
//!
//! The [`HttpTransport`] trait is the seam between the resilient request
//! client and the actual HTTP stack. The runtime ships a reqwest-backed
//! implementation; tests use scripted mocks. The client applies its own
//! timeout around `send`, so the local deadline always wins over whatever
//! the transport does internally.

use crate::error::FaultError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// HTTP method for outbound requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Uppercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single outbound HTTP request
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute request URL
    pub url: String,
    /// Headers to pass through
    pub headers: Vec<(String, String)>,
    /// Query parameters to append
    pub query: Vec<(String, String)>,
    /// Optional request body
    pub body: Option<Bytes>,
    /// Per-attempt timeout hint for the transport
    ///
    /// Advisory: the client enforces the same deadline externally.
    pub timeout: Duration,
}

/// Response from a completed HTTP exchange
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Bytes,
}

impl TransportResponse {
    /// Whether the status represents success for retry/circuit purposes
    ///
    /// 2xx and 3xx succeed; anything >= 400 is a failure (4xx permanent
    /// except 429, 5xx retryable).
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Generic HTTP transport - sends one request, returns one response
///
/// Implementations map their own failure modes into [`FaultError`]:
/// timeouts to `Timeout`, connect/DNS/reset failures to `Network`. Status
/// codes are not errors at this layer; the transport returns the response
/// and the client decides.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform one HTTP exchange
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, FaultError>;
}
