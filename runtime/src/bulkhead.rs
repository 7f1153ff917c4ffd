//! Per-target concurrency limiter with FIFO admission
//!
//! A bulkhead caps in-flight requests per dependency so one slow target
//! cannot exhaust the whole process. Admission beyond the cap suspends the
//! caller in FIFO order until a slot frees or the caller's wait timeout
//! elapses. The granted slot is an RAII permit: it releases on every exit
//! path - success, error, timeout, cancellation - when dropped, and the
//! freed slot is handed to exactly one queued waiter.
//!
//! Built on `tokio::sync::Semaphore`, which queues waiters fairly and
//! removes a waiter when its acquire future is dropped, so a timed-out
//! caller never leaves a dangling queue entry.

use parking_lot::RwLock;
use serde::Serialize;
use sisu_core::FaultError;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Introspection snapshot for one target's bulkhead
#[derive(Debug, Clone, Serialize)]
pub struct BulkheadStats {
    /// Normalized target this bulkhead guards
    pub target: String,
    /// Slots currently held
    pub in_flight: usize,
    /// Slot capacity
    pub max: usize,
    /// Callers suspended waiting for a slot
    pub queued: usize,
}

/// RAII slot guard; dropping it releases the slot to the next FIFO waiter
#[derive(Debug)]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Decrements the queued counter when the waiting future completes or is
/// dropped mid-wait (timeout, caller cancellation).
struct QueueGuard<'a>(&'a AtomicUsize);

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Concurrency limiter for one logical target
pub struct Bulkhead {
    target: String,
    max: usize,
    semaphore: Arc<Semaphore>,
    queued: AtomicUsize,
}

impl Bulkhead {
    /// Create a bulkhead with `max` slots for the given target
    pub fn new(target: impl Into<String>, max: usize) -> Self {
        Self {
            target: target.into(),
            max,
            semaphore: Arc::new(Semaphore::new(max)),
            queued: AtomicUsize::new(0),
        }
    }

    /// Acquire a slot, suspending FIFO behind earlier waiters when full
    ///
    /// With a `wait_timeout`, gives up after that long in the queue and
    /// returns [`FaultError::BulkheadTimeout`]; the abandoned wait removes
    /// the queue entry.
    pub async fn acquire(
        &self,
        wait_timeout: Option<Duration>,
    ) -> Result<BulkheadPermit, FaultError> {
        // Fast path: free slot, no queuing
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(BulkheadPermit { _permit: permit });
        }

        self.queued.fetch_add(1, Ordering::SeqCst);
        let queue_guard = QueueGuard(&self.queued);
        debug!(
            target = %self.target,
            queued = self.queued.load(Ordering::SeqCst),
            "bulkhead full, queuing"
        );

        let wait = Arc::clone(&self.semaphore).acquire_owned();
        let acquired = match wait_timeout {
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(FaultError::BulkheadTimeout {
                        target: self.target.clone(),
                    });
                }
            },
            None => wait.await,
        };
        drop(queue_guard);

        // The semaphore is owned by this bulkhead and never closed
        let permit = acquired
            .map_err(|_| FaultError::Config(format!("bulkhead for '{}' closed", self.target)))?;
        Ok(BulkheadPermit { _permit: permit })
    }

    /// Snapshot of slot usage and queue depth
    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            target: self.target.clone(),
            in_flight: self.max - self.semaphore.available_permits(),
            max: self.max,
            queued: self.queued.load(Ordering::SeqCst),
        }
    }
}

/// Registry of bulkheads keyed by normalized target
pub struct BulkheadRegistry {
    max_per_target: usize,
    bulkheads: RwLock<HashMap<String, Arc<Bulkhead>>>,
}

impl BulkheadRegistry {
    /// Create an empty registry granting `max_per_target` slots per target
    pub fn new(max_per_target: usize) -> Self {
        Self {
            max_per_target,
            bulkheads: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the bulkhead for a target
    pub fn bulkhead(&self, target: &str) -> Arc<Bulkhead> {
        if let Some(bulkhead) = self.bulkheads.read().get(target) {
            return Arc::clone(bulkhead);
        }
        let mut bulkheads = self.bulkheads.write();
        Arc::clone(
            bulkheads
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(Bulkhead::new(target, self.max_per_target))),
        )
    }

    /// Snapshot one target's bulkhead, or every known bulkhead
    pub fn stats(&self, target: Option<&str>) -> Vec<BulkheadStats> {
        let bulkheads = self.bulkheads.read();
        match target {
            Some(t) => bulkheads.get(t).map(|b| b.stats()).into_iter().collect(),
            None => {
                let mut all: Vec<BulkheadStats> = bulkheads.values().map(|b| b.stats()).collect();
                all.sort_by(|a, b| a.target.cmp(&b.target));
                all
            }
        }
    }
}
