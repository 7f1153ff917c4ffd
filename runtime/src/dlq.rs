//! Dead letter manager for at-least-once message processing
//!
//! Drives each message through an explicit retry state machine:
//!
//! ```text
//! Received ──► Processing ──► Success
//!                  │
//!                  ├──► ScheduledRetry ──► Processing (loop)
//!                  │
//!                  └──► DeadLettered (budget exhausted or permanent)
//! ```
//!
//! Exhausted messages are persisted into a durable stream as
//! [`DlqMessage`] envelopes with full attempt metadata, and an alert hook
//! fires on every dead-letter write. Operators inspect with
//! [`DlqManager::get_dlq_messages`] (ack-on-read) and either reprocess or
//! discard. A failed dead-letter write is never treated as success.
//!
//! Retry waits are `tokio::select!`ed against a shutdown signal, so retry
//! chains stay cancellable; distinct messages retry independently and
//! concurrently.

use crate::classify::ErrorClass;
use crate::config::DlqConfig;
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use sisu_core::{AlertHook, DlqMessage, FaultError, MessageHandler, StreamBroker};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Counters for the dead-letter stream
#[derive(Debug, Clone, Serialize)]
pub struct DlqStats {
    /// Dead-letter stream name
    pub stream: String,
    /// Messages currently persisted
    pub message_count: u64,
    /// Consumers known to the stream
    pub consumer_count: u32,
}

/// Dead letter manager
///
/// Construct once, call [`initialize`](Self::initialize), share via `Arc`,
/// and [`shutdown`](Self::shutdown) on teardown to cancel pending retry
/// waits.
pub struct DlqManager {
    broker: Arc<dyn StreamBroker>,
    config: DlqConfig,
    alert: Option<Arc<dyn AlertHook>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl DlqManager {
    /// Create a manager over the given broker
    pub fn new(config: DlqConfig, broker: Arc<dyn StreamBroker>) -> Result<Self, FaultError> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            broker,
            config,
            alert: None,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Attach a hook fired on every dead-letter write
    pub fn with_alert_hook(mut self, hook: Arc<dyn AlertHook>) -> Self {
        self.alert = Some(hook);
        self
    }

    /// Create the dead-letter stream if absent
    ///
    /// Idempotent; safe to call on every startup.
    pub async fn initialize(&self) -> Result<(), FaultError> {
        self.broker
            .ensure_stream(&self.config.stream, &[self.config.subject.clone()])
            .await?;
        info!(
            stream = %self.config.stream,
            subject = %self.config.subject,
            "dead-letter stream ready"
        );
        Ok(())
    }

    /// Process a message with retry, dead-lettering on exhaustion
    ///
    /// Invokes the handler up to `max_retries` times with backoff between
    /// invocations. A permanent-classified failure dead-letters immediately.
    /// Returns the handler's success, or the terminal error after the
    /// message was persisted to the dead-letter stream.
    pub async fn process_with_retry(
        &self,
        subject: &str,
        payload: Bytes,
        handler: &dyn MessageHandler,
    ) -> Result<(), FaultError> {
        let policy = &self.config.retry;
        let first_attempt_at = Utc::now();
        let mut attempt: u32 = 1;

        loop {
            if self.config.verbose {
                info!(subject, attempt, "invoking handler");
            } else {
                debug!(subject, attempt, "invoking handler");
            }

            let error = match handler.handle(subject, &payload).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(subject, attempt, "handler recovered after retry");
                    }
                    return Ok(());
                }
                Err(e) => e,
            };

            let class = ErrorClass::of(&error);
            let exhausted = attempt >= policy.max_retries;

            if exhausted || !class.is_retryable() {
                warn!(
                    subject,
                    attempt,
                    class = ?class,
                    error = %error,
                    "message failed terminally, dead-lettering"
                );
                self.dead_letter(subject, &payload, attempt, first_attempt_at, &error)
                    .await?;
                return Err(if exhausted && class.is_retryable() {
                    FaultError::RetriesExhausted {
                        attempts: attempt,
                        last: error.to_string(),
                    }
                } else {
                    error
                });
            }

            let delay = policy.delay_for_attempt(attempt);
            warn!(
                subject,
                attempt,
                max_retries = policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "handler failed, scheduling retry"
            );

            let mut shutdown = self.shutdown_rx.clone();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    debug!(subject, attempt, "retry chain cancelled by shutdown");
                    return Err(FaultError::Handler(format!(
                        "shutdown during scheduled retry of '{subject}'"
                    )));
                }
            }
            attempt += 1;
        }
    }

    /// Run [`process_with_retry`](Self::process_with_retry) as a background
    /// task, for fire-and-forget consumers
    pub fn spawn_with_retry(
        self: &Arc<Self>,
        subject: String,
        payload: Bytes,
        handler: Arc<dyn MessageHandler>,
    ) -> JoinHandle<Result<(), FaultError>> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager
                .process_with_retry(&subject, payload, handler.as_ref())
                .await
        })
    }

    /// Fetch up to `limit` dead-lettered messages for inspection
    ///
    /// Messages are acknowledged on read: fetching consumes them from the
    /// stream, and the operator must explicitly reprocess or discard.
    /// Undecodable payloads are logged and skipped, never passed off as
    /// valid dead letters. If an ack fails mid-batch, the unacked
    /// remainder is nak'd back for redelivery and the messages already
    /// consumed are still returned; nothing is left pending forever.
    pub async fn get_dlq_messages(&self, limit: usize) -> Result<Vec<DlqMessage>, FaultError> {
        let pulled = self
            .broker
            .fetch(&self.config.stream, &self.config.consumer, limit)
            .await?;

        let mut messages = Vec::with_capacity(pulled.len());
        let mut deliveries = pulled.into_iter();
        while let Some(delivery) = deliveries.next() {
            if let Err(e) = self.broker.ack(&self.config.stream, delivery.id).await {
                error!(
                    stream = %self.config.stream,
                    delivery_id = delivery.id,
                    error = %e,
                    "ack failed mid-batch, returning remainder for redelivery"
                );
                for stranded in std::iter::once(delivery).chain(deliveries.by_ref()) {
                    if let Err(nak_err) = self.broker.nak(&self.config.stream, stranded.id).await {
                        warn!(
                            stream = %self.config.stream,
                            delivery_id = stranded.id,
                            error = %nak_err,
                            "nak failed, delivery stays pending"
                        );
                    }
                }
                // Acked messages are consumed; dropping them would be loss
                if messages.is_empty() {
                    return Err(e);
                }
                return Ok(messages);
            }
            match DlqMessage::from_bytes(&delivery.payload) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    error!(
                        stream = %self.config.stream,
                        delivery_id = delivery.id,
                        error = %e,
                        "skipping undecodable dead-letter payload"
                    );
                }
            }
        }
        Ok(messages)
    }

    /// Reprocess a dead-lettered message with a fresh retry budget
    ///
    /// Resets the attempt count and re-enters the normal retry pipeline; a
    /// now-succeeding handler returns success without re-persisting.
    pub async fn reprocess_dlq_message(
        &self,
        message: &DlqMessage,
        handler: &dyn MessageHandler,
    ) -> Result<(), FaultError> {
        info!(
            subject = %message.original_subject,
            previous_attempts = message.attempt_count,
            "reprocessing dead-lettered message"
        );
        self.process_with_retry(&message.original_subject, message.payload.clone(), handler)
            .await
    }

    /// Counters for the dead-letter stream
    pub async fn get_dlq_stats(&self) -> Result<DlqStats, FaultError> {
        let info = self.broker.stream_info(&self.config.stream).await?;
        Ok(DlqStats {
            stream: self.config.stream.clone(),
            message_count: info.message_count,
            consumer_count: info.consumer_count,
        })
    }

    /// Delete all persisted dead letters (operator-only, destructive)
    pub async fn purge_dlq(&self) -> Result<(), FaultError> {
        warn!(stream = %self.config.stream, "purging dead-letter stream");
        self.broker.purge(&self.config.stream).await
    }

    /// Cancel pending retry waits and stop accepting scheduled retries
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        info!(stream = %self.config.stream, "dead letter manager shut down");
    }

    async fn dead_letter(
        &self,
        subject: &str,
        payload: &Bytes,
        attempt_count: u32,
        first_attempt_at: chrono::DateTime<Utc>,
        error: &FaultError,
    ) -> Result<(), FaultError> {
        let now = Utc::now();
        let message = DlqMessage {
            original_subject: subject.to_string(),
            payload: payload.clone(),
            attempt_count,
            first_attempt_at,
            last_attempt_at: now,
            error_message: error.to_string(),
            error_chain: format!("{error:?}"),
            dead_lettered_at: now,
        };

        let encoded = message.to_bytes()?;
        if let Err(e) = self.broker.publish(&self.config.subject, encoded).await {
            // A lost dead letter is data loss; surface it loudly
            error!(
                subject,
                stream = %self.config.stream,
                error = %e,
                "failed to persist dead-letter message"
            );
            return Err(FaultError::Broker(format!(
                "dead-letter write for '{subject}' failed: {e}"
            )));
        }

        warn!(
            subject,
            attempts = attempt_count,
            stream = %self.config.stream,
            "message dead-lettered"
        );
        if let Some(hook) = &self.alert {
            hook.on_dead_letter(&message);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backoff::RetryPolicy;
    use crate::broker::MemoryBroker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Handler that fails N times then succeeds
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn failing_first(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _subject: &str, _payload: &Bytes) -> Result<(), FaultError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(FaultError::Handler("db connection timed out".to_string()))
            } else {
                Ok(())
            }
        }
    }

    /// Handler that always fails with the given message
    struct FailingHandler {
        message: &'static str,
        calls: AtomicU32,
    }

    impl FailingHandler {
        fn new(message: &'static str) -> Self {
            Self {
                message,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for FailingHandler {
        async fn handle(&self, _subject: &str, _payload: &Bytes) -> Result<(), FaultError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(FaultError::Handler(self.message.to_string()))
        }
    }

    /// Broker that drops the Nth ack, once, to exercise mid-batch failures
    struct FailingAckBroker {
        inner: MemoryBroker,
        fail_on_ack: u32,
        acks: AtomicU32,
    }

    impl FailingAckBroker {
        fn new(fail_on_ack: u32) -> Self {
            Self {
                inner: MemoryBroker::new(),
                fail_on_ack,
                acks: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl StreamBroker for FailingAckBroker {
        async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<(), FaultError> {
            self.inner.ensure_stream(name, subjects).await
        }

        async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), FaultError> {
            self.inner.publish(subject, payload).await
        }

        async fn fetch(
            &self,
            stream: &str,
            consumer: &str,
            max: usize,
        ) -> Result<Vec<sisu_core::PulledMessage>, FaultError> {
            self.inner.fetch(stream, consumer, max).await
        }

        async fn ack(&self, stream: &str, id: u64) -> Result<(), FaultError> {
            let call = self.acks.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on_ack {
                return Err(FaultError::Broker("ack lost".to_string()));
            }
            self.inner.ack(stream, id).await
        }

        async fn nak(&self, stream: &str, id: u64) -> Result<(), FaultError> {
            self.inner.nak(stream, id).await
        }

        async fn purge(&self, stream: &str) -> Result<(), FaultError> {
            self.inner.purge(stream).await
        }

        async fn stream_info(&self, stream: &str) -> Result<sisu_core::StreamInfo, FaultError> {
            self.inner.stream_info(stream).await
        }
    }

    struct CountingAlert {
        fired: AtomicU32,
    }

    impl AlertHook for CountingAlert {
        fn on_dead_letter(&self, _message: &DlqMessage) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> DlqConfig {
        DlqConfig {
            retry: RetryPolicy {
                max_retries: 3,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    async fn make_manager() -> (Arc<DlqManager>, Arc<MemoryBroker>) {
        let broker = Arc::new(MemoryBroker::new());
        let manager = Arc::new(DlqManager::new(fast_config(), broker.clone()).unwrap());
        manager.initialize().await.unwrap();
        (manager, broker)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (manager, _) = make_manager().await;
        manager.initialize().await.unwrap();
        manager.initialize().await.unwrap();
        assert_eq!(manager.get_dlq_stats().await.unwrap().message_count, 0);
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let (manager, _) = make_manager().await;
        let handler = FlakyHandler::failing_first(0);

        manager
            .process_with_retry("orders.created", Bytes::from_static(b"{}"), &handler)
            .await
            .unwrap();

        assert_eq!(handler.calls(), 1);
        assert_eq!(manager.get_dlq_stats().await.unwrap().message_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_within_budget() {
        let (manager, _) = make_manager().await;
        let handler = FlakyHandler::failing_first(2);

        manager
            .process_with_retry("orders.created", Bytes::from_static(b"{}"), &handler)
            .await
            .unwrap();

        assert_eq!(handler.calls(), 3);
        assert_eq!(manager.get_dlq_stats().await.unwrap().message_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_dead_letters_once() {
        let (manager, _) = make_manager().await;
        let handler = FailingHandler::new("db connection timed out");

        let err = manager
            .process_with_retry("orders.created", Bytes::from_static(b"{\"id\":7}"), &handler)
            .await
            .unwrap_err();

        // max_retries = 3: exactly 3 handler invocations
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, FaultError::RetriesExhausted { attempts: 3, .. }));

        let messages = manager.get_dlq_messages(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        let dead = &messages[0];
        assert_eq!(dead.original_subject, "orders.created");
        assert_eq!(dead.attempt_count, 3);
        assert_eq!(dead.payload, Bytes::from_static(b"{\"id\":7}"));
        assert!(dead.error_message.contains("timed out"));
        assert!(dead.first_attempt_at <= dead.last_attempt_at);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let (manager, _) = make_manager().await;
        let handler = FailingHandler::new("validation failed: missing order id");

        let err = manager
            .process_with_retry("orders.created", Bytes::from_static(b"{}"), &handler)
            .await
            .unwrap_err();

        // No retries burned on a permanent failure
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, FaultError::Handler(_)));

        let messages = manager.get_dlq_messages(10).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].attempt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reprocess_success_does_not_repersist() {
        let (manager, _) = make_manager().await;

        let failing = FailingHandler::new("db connection timed out");
        let _ = manager
            .process_with_retry("orders.created", Bytes::from_static(b"{}"), &failing)
            .await;
        let messages = manager.get_dlq_messages(10).await.unwrap();
        assert_eq!(messages.len(), 1);

        // Handler fixed; reprocessing succeeds and the stream stays empty
        let fixed = FlakyHandler::failing_first(0);
        manager
            .reprocess_dlq_message(&messages[0], &fixed)
            .await
            .unwrap();
        assert_eq!(fixed.calls(), 1);
        assert_eq!(manager.get_dlq_stats().await.unwrap().message_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_messages_ack_on_read() {
        let (manager, _) = make_manager().await;
        let handler = FailingHandler::new("db connection timed out");
        let _ = manager
            .process_with_retry("a.b", Bytes::from_static(b"1"), &handler)
            .await;

        assert_eq!(manager.get_dlq_messages(10).await.unwrap().len(), 1);
        // Consumed on first read
        assert!(manager.get_dlq_messages(10).await.unwrap().is_empty());
        assert_eq!(manager.get_dlq_stats().await.unwrap().message_count, 0);
    }

    #[tokio::test]
    async fn test_ack_failure_mid_batch_redelivers_remainder() {
        let broker = Arc::new(FailingAckBroker::new(2));
        let manager = DlqManager::new(fast_config(), broker).unwrap();
        manager.initialize().await.unwrap();

        // Permanent failures dead-letter three messages immediately
        let handler = FailingHandler::new("validation failed");
        for subject in ["a.x", "a.y", "a.z"] {
            let _ = manager
                .process_with_retry(subject, Bytes::from_static(b"1"), &handler)
                .await;
        }

        // The second ack fails: the first message is consumed and
        // returned, the rest go back for redelivery
        let first = manager.get_dlq_messages(10).await.unwrap();
        assert_eq!(first.len(), 1);

        let rest = manager.get_dlq_messages(10).await.unwrap();
        assert_eq!(rest.len(), 2);

        let mut subjects: Vec<_> = first
            .iter()
            .chain(&rest)
            .map(|m| m.original_subject.clone())
            .collect();
        subjects.sort();
        assert_eq!(subjects, ["a.x", "a.y", "a.z"]);

        // Nothing stranded in the pending window
        assert_eq!(manager.get_dlq_stats().await.unwrap().message_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_hook_fires_per_dead_letter() {
        let broker = Arc::new(MemoryBroker::new());
        let alert = Arc::new(CountingAlert {
            fired: AtomicU32::new(0),
        });
        let manager = DlqManager::new(fast_config(), broker)
            .unwrap()
            .with_alert_hook(alert.clone());
        manager.initialize().await.unwrap();

        let handler = FailingHandler::new("db connection timed out");
        let _ = manager
            .process_with_retry("a.b", Bytes::from_static(b"1"), &handler)
            .await;
        let _ = manager
            .process_with_retry("a.c", Bytes::from_static(b"2"), &handler)
            .await;

        assert_eq!(alert.fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dead_letter_write_surfaces() {
        // No initialize(): the stream doesn't exist, so the publish fails
        let broker = Arc::new(MemoryBroker::new());
        let manager = DlqManager::new(fast_config(), broker).unwrap();

        let handler = FailingHandler::new("db connection timed out");
        let err = manager
            .process_with_retry("a.b", Bytes::from_static(b"1"), &handler)
            .await
            .unwrap_err();

        assert!(matches!(err, FaultError::Broker(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_discards_everything() {
        let (manager, _) = make_manager().await;
        let handler = FailingHandler::new("db connection timed out");
        let _ = manager
            .process_with_retry("a.b", Bytes::from_static(b"1"), &handler)
            .await;
        assert_eq!(manager.get_dlq_stats().await.unwrap().message_count, 1);

        manager.purge_dlq().await.unwrap();
        assert_eq!(manager.get_dlq_stats().await.unwrap().message_count, 0);
        assert!(manager.get_dlq_messages(10).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_scheduled_retry() {
        let (manager, _) = make_manager().await;
        let handler = Arc::new(FailingHandler::new("db connection timed out"));

        let task = manager.spawn_with_retry(
            "a.b".to_string(),
            Bytes::from_static(b"1"),
            handler.clone(),
        );
        // Let the first attempt fail and the retry wait begin
        tokio::time::sleep(Duration::from_millis(1)).await;
        manager.shutdown();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(FaultError::Handler(_))));
        // First attempt only; the scheduled retry never ran
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_subjects_retry_concurrently() {
        let (manager, _) = make_manager().await;
        let h1 = Arc::new(FlakyHandler::failing_first(2));
        let h2 = Arc::new(FlakyHandler::failing_first(2));

        let t1 = manager.spawn_with_retry("a.b".into(), Bytes::from_static(b"1"), h1.clone());
        let t2 = manager.spawn_with_retry("a.c".into(), Bytes::from_static(b"2"), h2.clone());

        t1.await.unwrap().unwrap();
        t2.await.unwrap().unwrap();
        assert_eq!(h1.calls(), 3);
        assert_eq!(h2.calls(), 3);
    }
}
