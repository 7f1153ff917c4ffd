//! Resilient request client
//!
//! Composes the fault-tolerance primitives around one outbound HTTP call:
//!
//! ```text
//! request ──► bulkhead (FIFO slot) ──► circuit check ──► timed attempt
//!                 │                        │                 │ failure
//!                 │                        │                 ▼
//!                 │                        │          classify ──► backoff ──► retry
//!                 │                        ▼
//!                 │                 fail fast (no I/O)
//!                 ▼
//!          slot released on every exit path (RAII)
//! ```
//!
//! One circuit and one bulkhead per normalized target (URL origin), so a
//! failing dependency cannot starve healthy ones. The breaker sees one
//! outcome per logical request - the final result after retries - never
//! per-attempt noise, and never its own rejections.

use crate::bulkhead::{BulkheadRegistry, BulkheadStats};
use crate::circuit::{CircuitRegistry, CircuitStats};
use crate::classify::ErrorClass;
use crate::config::ClientConfig;
use crate::transport::ReqwestTransport;
use bytes::Bytes;
use serde::Serialize;
use sisu_core::{FaultError, HttpTransport, Method, TransportRequest, TransportResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Per-request options: header/query/body passthrough and local deadlines
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Headers to pass through
    pub headers: Vec<(String, String)>,
    /// Query parameters to append
    pub query: Vec<(String, String)>,
    /// Optional request body
    pub body: Option<Bytes>,
    /// Per-attempt timeout override
    pub timeout: Option<Duration>,
    /// Whole-call deadline covering queuing, every attempt, and backoff;
    /// firing it cancels the in-flight attempt and suppresses further retries
    pub deadline: Option<Duration>,
    /// Bulkhead queue wait override
    pub queue_timeout: Option<Duration>,
}

impl RequestOptions {
    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a query parameter
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a raw body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body with the matching content type
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self, FaultError> {
        let body = serde_json::to_vec(value)
            .map_err(|e| FaultError::Config(format!("unserializable JSON body: {e}")))?;
        Ok(self
            .header("content-type", "application/json")
            .body(body))
    }

    /// Override the per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set a whole-call deadline
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// HTTP client hardened with timeouts, retries, circuit breaking and
/// bulkheading
///
/// Construct once and share (`Arc` or by reference); per-target state lives
/// for the process lifetime and is never persisted.
pub struct ResilientClient {
    transport: Arc<dyn HttpTransport>,
    config: ClientConfig,
    circuits: CircuitRegistry,
    bulkheads: BulkheadRegistry,
}

impl ResilientClient {
    /// Create a client over the given transport
    pub fn new(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, FaultError> {
        config.validate()?;
        let circuits = CircuitRegistry::new(config.circuit.clone());
        let bulkheads = BulkheadRegistry::new(config.max_concurrent_requests);
        Ok(Self {
            transport,
            config,
            circuits,
            bulkheads,
        })
    }

    /// Create a client over the production reqwest transport
    pub fn with_reqwest(config: ClientConfig) -> Result<Self, FaultError> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Self::new(config, transport)
    }

    /// GET request
    pub async fn get(&self, url: &str, opts: RequestOptions) -> Result<TransportResponse, FaultError> {
        self.request(Method::Get, url, opts).await
    }

    /// POST request
    pub async fn post(&self, url: &str, opts: RequestOptions) -> Result<TransportResponse, FaultError> {
        self.request(Method::Post, url, opts).await
    }

    /// PUT request
    pub async fn put(&self, url: &str, opts: RequestOptions) -> Result<TransportResponse, FaultError> {
        self.request(Method::Put, url, opts).await
    }

    /// PATCH request
    pub async fn patch(&self, url: &str, opts: RequestOptions) -> Result<TransportResponse, FaultError> {
        self.request(Method::Patch, url, opts).await
    }

    /// DELETE request
    pub async fn delete(&self, url: &str, opts: RequestOptions) -> Result<TransportResponse, FaultError> {
        self.request(Method::Delete, url, opts).await
    }

    /// Perform a resilient request
    ///
    /// Success is a 2xx/3xx response. HTTP >= 500 and 429 count as failures
    /// for retry and circuit purposes even though transport succeeded;
    /// other 4xx fail immediately without retry.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        opts: RequestOptions,
    ) -> Result<TransportResponse, FaultError> {
        match opts.deadline {
            Some(deadline) => {
                // Cancelling the pipeline drops the bulkhead permit, so the
                // slot frees immediately and no further retry is scheduled.
                match tokio::time::timeout(deadline, self.execute(method, url, &opts)).await {
                    Ok(result) => result,
                    Err(_) => Err(FaultError::Timeout),
                }
            }
            None => self.execute(method, url, &opts).await,
        }
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        opts: &RequestOptions,
    ) -> Result<TransportResponse, FaultError> {
        let target = normalize_target(url)?;

        let bulkhead = self.bulkheads.bulkhead(&target);
        let queue_timeout = opts.queue_timeout.or(self.config.bulkhead_queue_timeout);
        let _slot = bulkhead.acquire(queue_timeout).await?;

        let breaker = self.circuits.breaker(&target);
        let Some(admission) = breaker.try_acquire() else {
            debug!(target = %target, method = %method, "circuit open, failing fast");
            return Err(FaultError::CircuitOpen { target });
        };

        // One outcome per logical request, including permanent failures -
        // the remote is unhealthy or malformed either way. Cancellation
        // drops the admission unreported, returning any probe slot.
        let outcome = self.attempt_loop(method, url, &target, opts).await;
        match &outcome {
            Ok(_) => admission.success(),
            Err(_) => admission.failure(),
        }
        outcome
        // _slot drops here: released regardless of outcome
    }

    async fn attempt_loop(
        &self,
        method: Method,
        url: &str,
        target: &str,
        opts: &RequestOptions,
    ) -> Result<TransportResponse, FaultError> {
        let policy = &self.config.retry;
        let attempt_timeout = opts.timeout.unwrap_or(self.config.timeout);
        let total_attempts = policy.max_retries + 1;
        let mut last_error = FaultError::RetriesExhausted {
            attempts: 0,
            last: "no attempts made".to_string(),
        };

        for attempt in 1..=total_attempts {
            if attempt > 1 {
                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    target = %target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            if self.config.verbose {
                info!(target = %target, method = %method, attempt, "sending request");
            } else {
                debug!(target = %target, method = %method, attempt, "sending request");
            }

            let request = TransportRequest {
                method,
                url: url.to_string(),
                headers: opts.headers.clone(),
                query: opts.query.clone(),
                body: opts.body.clone(),
                timeout: attempt_timeout,
            };

            // The local timeout always wins over the transport's own
            let result = match tokio::time::timeout(attempt_timeout, self.transport.send(request))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(FaultError::Timeout),
            };

            let error = match result {
                Ok(response) if response.is_success() => {
                    if attempt > 1 {
                        info!(target = %target, method = %method, attempt, "request recovered after retry");
                    }
                    return Ok(response);
                }
                Ok(response) => FaultError::HttpStatus {
                    status: response.status,
                    body: truncate_body(&response.body),
                },
                Err(e) => e,
            };

            let class = ErrorClass::of(&error);
            warn!(
                target = %target,
                method = %method,
                attempt,
                max_attempts = total_attempts,
                class = ?class,
                error = %error,
                "request attempt failed"
            );

            if !class.is_retryable() {
                return Err(error);
            }
            last_error = error;
        }

        Err(FaultError::RetriesExhausted {
            attempts: total_attempts,
            last: last_error.to_string(),
        })
    }

    /// Snapshot circuit state for one target or all targets
    pub fn circuit_stats(&self, target: Option<&str>) -> Vec<CircuitStats> {
        self.circuits.stats(target.map(normalize_lenient).as_deref())
    }

    /// Snapshot bulkhead usage for one target or all targets
    pub fn bulkhead_stats(&self, target: Option<&str>) -> Vec<BulkheadStats> {
        self.bulkheads.stats(target.map(normalize_lenient).as_deref())
    }

    /// Reset a target's circuit to closed with zeroed counters
    pub fn reset_circuit(&self, target: &str) {
        self.circuits.breaker(&normalize_lenient(target)).reset();
    }

    /// Force a target's circuit open (operator control)
    pub fn open_circuit(&self, target: &str) {
        self.circuits.breaker(&normalize_lenient(target)).force_open();
    }

    /// Force a target's circuit closed (operator control)
    pub fn close_circuit(&self, target: &str) {
        self.circuits.breaker(&normalize_lenient(target)).force_close();
    }
}

/// Normalize a request URL to its logical target: the URL origin
/// (`scheme://host[:port]`, default ports elided, host lowercased)
fn normalize_target(url: &str) -> Result<String, FaultError> {
    let parsed =
        Url::parse(url).map_err(|e| FaultError::Config(format!("invalid URL '{url}': {e}")))?;
    if !parsed.has_host() {
        return Err(FaultError::Config(format!("URL '{url}' has no host")));
    }
    Ok(parsed.origin().ascii_serialization())
}

/// Normalize operator-supplied target strings, accepting either a full URL
/// or an already-normalized origin
fn normalize_lenient(target: &str) -> String {
    normalize_target(target).unwrap_or_else(|_| target.to_string())
}

fn truncate_body(body: &Bytes) -> String {
    const MAX: usize = 200;
    let text = String::from_utf8_lossy(body);
    if text.chars().count() > MAX {
        let truncated: String = text.chars().take(MAX).collect();
        format!("{truncated}...")
    } else {
        text.into_owned()
    }
}
