//! Error classification for retry eligibility
//!
//! Every caught error is sorted into one of three classes:
//!
//! - **Transient**: timeouts, connection failures, 503, 429 - retry
//! - **Permanent**: validation errors, 404, 400, 401/403 - never retry
//! - **Unknown**: anything else - retryable by default, same budget as
//!   Transient
//!
//! Structured [`FaultError`] variants classify directly; free-form error
//! text (handler failures, broker messages) falls back to pattern matching.

use sisu_core::FaultError;

/// Retry eligibility class for a caught error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure; retrying may succeed
    Transient,
    /// Deterministic failure; retrying will not help
    Permanent,
    /// Unclassifiable; treated as retryable by default
    Unknown,
}

impl ErrorClass {
    /// Classify a structured fault
    pub fn of(error: &FaultError) -> Self {
        match error {
            FaultError::Timeout => ErrorClass::Transient,
            FaultError::Network(_) => ErrorClass::Transient,
            FaultError::HttpStatus { status, .. } => Self::of_status(*status),
            // Rejected before any work happened; retrying inside the same
            // call would only hammer the guard again.
            FaultError::CircuitOpen { .. } => ErrorClass::Permanent,
            FaultError::BulkheadTimeout { .. } => ErrorClass::Permanent,
            FaultError::Handler(msg) => classify_text(msg),
            FaultError::Broker(msg) => classify_text(msg),
            FaultError::RetriesExhausted { .. } => ErrorClass::Permanent,
            FaultError::Config(_) => ErrorClass::Permanent,
        }
    }

    /// Classify an HTTP status code
    pub fn of_status(status: u16) -> Self {
        match status {
            503 | 429 => ErrorClass::Transient,
            500..=599 => ErrorClass::Transient,
            400 | 401 | 403 | 404 => ErrorClass::Permanent,
            405..=499 => ErrorClass::Permanent,
            _ => ErrorClass::Unknown,
        }
    }

    /// Whether a retry may be attempted
    ///
    /// Unknown shares the Transient retry budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

/// Classify free-form error text by pattern matching
///
/// Matches the failure vocabulary seen from Node/Go/JVM peers as well as
/// OS-level errno names, case-insensitively.
pub fn classify_text(text: &str) -> ErrorClass {
    let lower = text.to_lowercase();

    const TRANSIENT: &[&str] = &[
        "timeout",
        "timed out",
        "etimedout",
        "econnrefused",
        "econnreset",
        "ehostunreach",
        "enetunreach",
        "connection refused",
        "connection reset",
        "unreachable",
        "503",
        "service unavailable",
        "429",
        "too many requests",
    ];
    const PERMANENT: &[&str] = &[
        "validation",
        "invalid",
        "malformed",
        "404",
        "not found",
        "400",
        "bad request",
        "401",
        "unauthorized",
        "403",
        "forbidden",
    ];

    if TRANSIENT.iter().any(|pat| lower.contains(pat)) {
        return ErrorClass::Transient;
    }
    if PERMANENT.iter().any(|pat| lower.contains(pat)) {
        return ErrorClass::Permanent;
    }
    ErrorClass::Unknown
}
