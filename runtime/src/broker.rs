//! In-memory [`StreamBroker`] for tests and single-process deployments
//!
//! Implements the full broker contract over process-local state: streams
//! with NATS-style subject filters (`*` matches one token, `>` matches the
//! rest), pull-based fetch with a pending window, and explicit ack/nak.
//! Nothing survives a restart; production deployments plug a durable
//! broker into the same trait.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use sisu_core::{FaultError, PulledMessage, StreamBroker, StreamInfo};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    subject: String,
    payload: Bytes,
}

#[derive(Debug, Default)]
struct StreamState {
    subjects: Vec<String>,
    messages: VecDeque<StoredMessage>,
    pending: HashMap<u64, StoredMessage>,
    consumers: HashSet<String>,
}

/// Process-local broker with NATS-style subject routing
pub struct MemoryBroker {
    streams: RwLock<HashMap<String, StreamState>>,
    next_id: AtomicU64,
}

impl MemoryBroker {
    /// Create an empty broker with no streams
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Token-wise subject match: `*` matches exactly one token, a trailing `>`
/// matches one or more remaining tokens.
fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

fn no_such_stream(stream: &str) -> FaultError {
    FaultError::Broker(format!("stream '{stream}' does not exist"))
}

#[async_trait]
impl StreamBroker for MemoryBroker {
    async fn ensure_stream(&self, name: &str, subjects: &[String]) -> Result<(), FaultError> {
        let mut streams = self.streams.write();
        let state = streams.entry(name.to_string()).or_default();
        // Idempotent: re-ensuring unions the subject filters
        for subject in subjects {
            if !state.subjects.contains(subject) {
                state.subjects.push(subject.clone());
            }
        }
        debug!(stream = name, subjects = ?state.subjects, "stream ensured");
        Ok(())
    }

    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), FaultError> {
        let mut streams = self.streams.write();
        let mut routed = false;
        for (name, state) in streams.iter_mut() {
            if state.subjects.iter().any(|f| subject_matches(f, subject)) {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                state.messages.push_back(StoredMessage {
                    id,
                    subject: subject.to_string(),
                    payload: payload.clone(),
                });
                debug!(stream = %name, subject, id, "message stored");
                routed = true;
            }
        }
        if routed {
            Ok(())
        } else {
            Err(FaultError::Broker(format!(
                "no stream bound to subject '{subject}'"
            )))
        }
    }

    async fn fetch(
        &self,
        stream: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<PulledMessage>, FaultError> {
        let mut streams = self.streams.write();
        let state = streams.get_mut(stream).ok_or_else(|| no_such_stream(stream))?;
        state.consumers.insert(consumer.to_string());

        let mut pulled = Vec::new();
        while pulled.len() < max {
            let Some(message) = state.messages.pop_front() else {
                break;
            };
            pulled.push(PulledMessage {
                id: message.id,
                subject: message.subject.clone(),
                payload: message.payload.clone(),
            });
            state.pending.insert(message.id, message);
        }
        Ok(pulled)
    }

    async fn ack(&self, stream: &str, id: u64) -> Result<(), FaultError> {
        let mut streams = self.streams.write();
        let state = streams.get_mut(stream).ok_or_else(|| no_such_stream(stream))?;
        state.pending.remove(&id).ok_or_else(|| {
            FaultError::Broker(format!("delivery {id} is not pending on '{stream}'"))
        })?;
        Ok(())
    }

    async fn nak(&self, stream: &str, id: u64) -> Result<(), FaultError> {
        let mut streams = self.streams.write();
        let state = streams.get_mut(stream).ok_or_else(|| no_such_stream(stream))?;
        let message = state.pending.remove(&id).ok_or_else(|| {
            FaultError::Broker(format!("delivery {id} is not pending on '{stream}'"))
        })?;
        // Redeliver ahead of newer messages
        state.messages.push_front(message);
        Ok(())
    }

    async fn purge(&self, stream: &str) -> Result<(), FaultError> {
        let mut streams = self.streams.write();
        let state = streams.get_mut(stream).ok_or_else(|| no_such_stream(stream))?;
        state.messages.clear();
        state.pending.clear();
        Ok(())
    }

    async fn stream_info(&self, stream: &str) -> Result<StreamInfo, FaultError> {
        let streams = self.streams.read();
        let state = streams.get(stream).ok_or_else(|| no_such_stream(stream))?;
        Ok(StreamInfo {
            message_count: (state.messages.len() + state.pending.len()) as u64,
            consumer_count: state.consumers.len() as u32,
        })
    }
}
