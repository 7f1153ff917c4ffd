//! Durable stream broker abstraction
//!
//! The [`StreamBroker`] trait is the narrow contract SISU consumes from a
//! log-based message broker: create-stream-if-absent, publish, and
//! pull-based fetch with explicit ack/nak. No dependency on a specific
//! wire protocol - a NATS JetStream adapter, a Kafka adapter, and the
//! in-memory broker shipped with the runtime all implement the same trait.

use crate::error::FaultError;
use async_trait::async_trait;
use bytes::Bytes;

/// A message pulled from a stream, awaiting ack or nak
///
/// The `id` is broker-assigned and only meaningful for acknowledging this
/// delivery back to the same broker.
#[derive(Debug, Clone)]
pub struct PulledMessage {
    /// Broker-assigned delivery id
    pub id: u64,
    /// Subject the message was published to
    pub subject: String,
    /// Message payload
    pub payload: Bytes,
}

/// Stream-level counters for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Messages currently retained in the stream (including unacked)
    pub message_count: u64,
    /// Consumers known to the stream
    pub consumer_count: u32,
}

/// Durable log-based broker contract
///
/// # Implementation Requirements
///
/// - Implementations must be `Send + Sync` for use across async tasks
/// - `ensure_stream` must be idempotent: calling it for an existing stream
///   is a no-op, never an error
/// - `fetch` must not redeliver a message to another fetch until it is
///   nak'd (pull semantics with a pending window)
/// - All failures must surface as [`FaultError::Broker`]-compatible errors;
///   silent loss is never acceptable
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Create a stream bound to the given subjects if it does not exist
    async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<(), FaultError>;

    /// Publish a payload to a subject
    ///
    /// The broker routes the message to every stream whose subject filter
    /// matches.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), FaultError>;

    /// Pull up to `max` messages from a stream for the named consumer
    ///
    /// Fetched messages are held pending until explicitly acked or nak'd.
    async fn fetch(
        &self,
        stream: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<PulledMessage>, FaultError>;

    /// Acknowledge a pending delivery, removing it from the stream
    async fn ack(&self, stream: &str, id: u64) -> Result<(), FaultError>;

    /// Negatively acknowledge a pending delivery, returning it for redelivery
    async fn nak(&self, stream: &str, id: u64) -> Result<(), FaultError>;

    /// Delete all messages in a stream (destructive)
    async fn purge(&self, stream: &str) -> Result<(), FaultError>;

    /// Fetch stream-level counters
    async fn stream_info(&self, stream: &str) -> Result<StreamInfo, FaultError>;
}
