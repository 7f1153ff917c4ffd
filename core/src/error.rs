//! Error types for SISU fault-tolerance operations

use thiserror::Error;

/// Error type for fault-tolerance operations
///
/// This is the standard error type used by both SISU subsystems: the
/// resilient request client and the dead letter manager. Variants map to
/// the failure taxonomy that drives retry and circuit-breaker decisions,
/// so classification can match on structure instead of string parsing
/// wherever a structured error is available.
///
/// # Example
///
/// ```
/// use sisu_core::FaultError;
///
/// fn call_backend() -> Result<(), FaultError> {
///     Err(FaultError::Network("connection refused".to_string()))
/// }
///
/// match call_backend() {
///     Ok(_) => println!("ok"),
///     Err(FaultError::Network(msg)) => println!("network failure: {}", msg),
///     Err(e) => println!("other failure: {}", e),
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FaultError {
    /// Local per-attempt timeout fired
    ///
    /// The caller-side deadline always wins over the transport's own
    /// timeout, so a slow transport surfaces as this variant.
    #[error("request timed out")]
    Timeout,

    /// Network-level transport failure
    ///
    /// Examples: DNS lookup failed, connection refused, connection reset,
    /// TLS handshake error.
    #[error("network error: {0}")]
    Network(String),

    /// HTTP response with a non-success status
    ///
    /// Transport succeeded but the remote answered with an error status.
    /// Status >= 500 and 429 are treated as failures eligible for retry;
    /// other 4xx classify permanent.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// Response status code
        status: u16,
        /// Response body, truncated for error reporting
        body: String,
    },

    /// Rejected by an open circuit, without any network attempt
    #[error("circuit open for target '{target}'")]
    CircuitOpen {
        /// Normalized target whose circuit rejected the request
        target: String,
    },

    /// Bulkhead admission wait elapsed before a slot freed
    #[error("bulkhead timeout for target '{target}'")]
    BulkheadTimeout {
        /// Normalized target whose bulkhead rejected the request
        target: String,
    },

    /// Message handler reported a processing failure
    #[error("handler failed: {0}")]
    Handler(String),

    /// Retry budget exhausted; carries the last attempt's error
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made before giving up
        attempts: u32,
        /// Rendering of the error from the final attempt
        last: String,
    },

    /// Durable stream operation failed
    ///
    /// A failed dead-letter write is never treated as success; it surfaces
    /// through this variant.
    #[error("broker error: {0}")]
    Broker(String),

    /// Invalid policy or configuration
    ///
    /// Examples: `max_delay` below `initial_delay`, non-positive backoff
    /// multiplier, unparseable target URL.
    #[error("configuration error: {0}")]
    Config(String),
}
