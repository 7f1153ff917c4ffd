//! Configuration for the resilient client and the dead letter manager

use crate::backoff::RetryPolicy;
use crate::circuit::CircuitConfig;
use sisu_core::FaultError;
use std::time::Duration;

/// Configuration for [`ResilientClient`](crate::client::ResilientClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hard per-attempt timeout; the local deadline wins over the transport
    pub timeout: Duration,
    /// Retry budget and backoff between attempts
    pub retry: RetryPolicy,
    /// Per-target circuit breaker parameters
    pub circuit: CircuitConfig,
    /// Bulkhead slot capacity per target
    pub max_concurrent_requests: usize,
    /// Default wait limit in the bulkhead queue; `None` waits indefinitely
    pub bulkhead_queue_timeout: Option<Duration>,
    /// Log every attempt at info level instead of debug
    pub verbose: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::exponential(),
            circuit: CircuitConfig::default(),
            max_concurrent_requests: 10,
            bulkhead_queue_timeout: Some(Duration::from_secs(10)),
            verbose: false,
        }
    }
}

impl ClientConfig {
    /// Validate configuration invariants
    pub fn validate(&self) -> Result<(), FaultError> {
        self.retry.validate()?;
        if self.max_concurrent_requests == 0 {
            return Err(FaultError::Config(
                "max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(FaultError::Config("timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Configuration for [`DlqManager`](crate::dlq::DlqManager)
#[derive(Debug, Clone)]
pub struct DlqConfig {
    /// Durable stream holding dead-lettered messages
    pub stream: String,
    /// Subject dead letters are published to
    pub subject: String,
    /// Consumer name used for operator inspection fetches
    pub consumer: String,
    /// Retry budget and backoff between handler invocations
    pub retry: RetryPolicy,
    /// Log every handler attempt at info level instead of debug
    pub verbose: bool,
}

impl Default for DlqConfig {
    fn default() -> Self {
        Self {
            stream: "SISU_DLQ".to_string(),
            subject: "dlq.dead-letters".to_string(),
            consumer: "dlq-operator".to_string(),
            retry: RetryPolicy::exponential(),
            verbose: false,
        }
    }
}

impl DlqConfig {
    /// Validate configuration invariants
    pub fn validate(&self) -> Result<(), FaultError> {
        self.retry.validate()?;
        if self.retry.max_retries == 0 {
            return Err(FaultError::Config(
                "DLQ max_retries must be at least 1 (every message gets one attempt)".to_string(),
            ));
        }
        if self.stream.is_empty() || self.subject.is_empty() {
            return Err(FaultError::Config(
                "DLQ stream and subject must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}
