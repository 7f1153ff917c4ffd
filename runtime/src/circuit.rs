//! Per-target circuit breaker
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: target assumed down, requests fail fast with no network attempt
//! - Half-Open: bounded probes test whether the target recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= failure_threshold within the window
//! Open → Half-Open: first admission check at/after opened_until
//! Half-Open → Closed: success_threshold consecutive probe successes
//! Half-Open → Open: any probe failure (new window, new opened_until)
//! ```
//!
//! Admission is an RAII [`CircuitPermit`]: the caller reports the outcome
//! through it, and dropping it without an outcome (caller cancelled
//! mid-flight) returns the half-open probe slot instead of leaking it.
//!
//! One breaker per normalized target, held in a [`CircuitRegistry`] with
//! per-key locking so a failing dependency cannot starve others. Rejections
//! while Open never touch the failure counter.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker state machine position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Requests flow through
    Closed,
    /// Requests fail fast
    Open,
    /// Limited probe requests allowed
    HalfOpen,
}

impl CircuitState {
    /// Short lowercase name for logs and stats
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Failures within the window to open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes to close the circuit
    pub success_threshold: u32,
    /// How long the circuit stays open before probing
    pub open_duration: Duration,
    /// Failure-counting window; the counter restarts when it elapses
    pub window: Duration,
    /// Maximum concurrent trial requests in half-open
    pub half_open_max_probes: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
            window: Duration::from_secs(60),
            half_open_max_probes: 3,
        }
    }
}

/// Introspection snapshot for one target's circuit
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    /// Normalized target this circuit guards
    pub target: String,
    /// Current state
    pub state: CircuitState,
    /// Failures recorded in the current window
    pub failure_count: u32,
    /// Consecutive successes recorded in half-open
    pub success_count: u32,
    /// Requests rejected without a network attempt
    pub rejected: u64,
    /// Milliseconds until the open circuit becomes eligible for probing
    pub open_remaining_ms: Option<u64>,
}

/// Mutable state behind the per-breaker lock
struct CircuitInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    window_started: Instant,
    opened_until: Option<Instant>,
    half_open_in_flight: u32,
}

impl CircuitInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            window_started: Instant::now(),
            opened_until: None,
            half_open_in_flight: 0,
        }
    }

    fn enter_closed(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.success_count = 0;
        self.window_started = Instant::now();
        self.opened_until = None;
        self.half_open_in_flight = 0;
    }

    fn enter_open(&mut self, open_duration: Duration) {
        self.state = CircuitState::Open;
        self.opened_until = Some(Instant::now() + open_duration);
        self.success_count = 0;
        self.half_open_in_flight = 0;
    }
}

/// Admission token for one request through the breaker
///
/// Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure), exactly once. Dropping the permit without
/// reporting returns a half-open probe slot; a cancelled probe must not
/// consume the probe budget, or the circuit could never leave half-open.
#[must_use]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    reported: bool,
}

impl CircuitPermit<'_> {
    /// Record a success outcome for this admitted request
    pub fn success(mut self) {
        self.reported = true;
        self.breaker.record_success();
    }

    /// Record a failure outcome for this admitted request
    pub fn failure(mut self) {
        self.reported = true;
        self.breaker.record_failure();
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if self.reported || !self.probe {
            return;
        }
        let mut inner = self.breaker.inner.lock();
        // The probe never completed; only return the slot if a transition
        // has not already zeroed the in-flight count.
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

/// Circuit breaker for one logical target
pub struct CircuitBreaker {
    target: String,
    config: CircuitConfig,
    inner: Mutex<CircuitInner>,
    /// Metrics: times the circuit opened
    open_count: AtomicU64,
    /// Metrics: requests rejected without a network attempt
    rejected_count: AtomicU64,
}

impl CircuitBreaker {
    /// Create a breaker for the given target
    pub fn new(target: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            target: target.into(),
            config,
            inner: Mutex::new(CircuitInner::new()),
            open_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
        }
    }

    /// Check whether a request may proceed, applying time-based transitions
    ///
    /// Returns a [`CircuitPermit`] on admission, `None` for a fail-fast
    /// rejection. Rejections are counted separately and never increment the
    /// failure counter.
    pub fn try_acquire(&self) -> Option<CircuitPermit<'_>> {
        let mut inner = self.inner.lock();

        let probe = match inner.state {
            CircuitState::Closed => false,

            CircuitState::Open => {
                let eligible = inner
                    .opened_until
                    .map(|until| Instant::now() >= until)
                    .unwrap_or(false);
                if eligible {
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.half_open_in_flight = 1; // this request is the first probe
                    info!(target = %self.target, "circuit transitioning to half-open");
                    true
                } else {
                    self.rejected_count.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }

            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_probes {
                    inner.half_open_in_flight += 1;
                    true
                } else {
                    self.rejected_count.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };

        Some(CircuitPermit {
            breaker: self,
            probe,
            reported: false,
        })
    }

    /// Record the success outcome of an admitted request
    fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    inner.enter_closed();
                    info!(target = %self.target, "circuit closed - target recovered");
                }
            }
            // Late outcome from a request admitted before a force-open;
            // the open state already reflects the operator's decision.
            CircuitState::Open => {}
        }
    }

    /// Record the failure outcome of an admitted request
    fn record_failure(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                if inner.window_started.elapsed() >= self.config.window {
                    inner.failure_count = 0;
                    inner.window_started = Instant::now();
                }
                inner.failure_count += 1;
                inner.success_count = 0;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.enter_open(self.config.open_duration);
                    self.open_count.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target = %self.target,
                        failures = inner.failure_count,
                        "circuit opened - too many failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.enter_open(self.config.open_duration);
                self.open_count.fetch_add(1, Ordering::Relaxed);
                warn!(target = %self.target, "circuit re-opened - probe failed");
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit open (operator control)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        inner.enter_open(self.config.open_duration);
        self.open_count.fetch_add(1, Ordering::Relaxed);
        warn!(target = %self.target, "circuit forced open");
    }

    /// Force the circuit closed (operator control)
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        inner.enter_closed();
        info!(target = %self.target, "circuit forced closed");
    }

    /// Reset to the initial closed state with zeroed counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.enter_closed();
        self.rejected_count.store(0, Ordering::Relaxed);
        info!(target = %self.target, "circuit reset");
    }

    /// Current state (for monitoring)
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Times the circuit has opened
    pub fn open_count(&self) -> u64 {
        self.open_count.load(Ordering::Relaxed)
    }

    /// Snapshot of counters and state
    pub fn stats(&self) -> CircuitStats {
        let inner = self.inner.lock();
        let now = Instant::now();
        CircuitStats {
            target: self.target.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            rejected: self.rejected_count.load(Ordering::Relaxed),
            open_remaining_ms: inner
                .opened_until
                .filter(|_| inner.state == CircuitState::Open)
                .map(|until| until.saturating_duration_since(now).as_millis() as u64),
        }
    }
}

/// Registry of circuit breakers keyed by normalized target
///
/// The outer map lock is held only for lookup/insert; all state updates go
/// through the per-breaker lock, so unrelated targets never serialize.
pub struct CircuitRegistry {
    config: CircuitConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    /// Create an empty registry
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the breaker for a target
    pub fn breaker(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(target) {
            return Arc::clone(breaker);
        }
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(target.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.config.clone()))),
        )
    }

    /// Snapshot one target's circuit, or every known circuit
    pub fn stats(&self, target: Option<&str>) -> Vec<CircuitStats> {
        let breakers = self.breakers.read();
        match target {
            Some(t) => breakers.get(t).map(|b| b.stats()).into_iter().collect(),
            None => {
                let mut all: Vec<CircuitStats> = breakers.values().map(|b| b.stats()).collect();
                all.sort_by(|a, b| a.target.cmp(&b.target));
                all
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_config() -> CircuitConfig {
        CircuitConfig {
            failure_threshold: 3,
            success_threshold: 2,
            open_duration: Duration::from_millis(100),
            window: Duration::from_secs(60),
            half_open_max_probes: 2,
        }
    }

    fn fail_once(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().failure();
    }

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..3 {
            fail_once(cb);
        }
    }

    #[tokio::test]
    async fn test_starts_closed_and_admits() {
        let cb = CircuitBreaker::new("svc-a", test_config());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new("svc-a", test_config());

        trip(&cb);

        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.open_count(), 1);
        assert!(cb.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_rejections_do_not_count_as_failures() {
        let cb = CircuitBreaker::new("svc-a", test_config());
        trip(&cb);
        let tripped_at = cb.stats().failure_count;

        for _ in 0..10 {
            assert!(cb.try_acquire().is_none());
        }

        let stats = cb.stats();
        assert_eq!(stats.failure_count, tripped_at);
        assert_eq!(stats.rejected, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_open_duration() {
        let cb = CircuitBreaker::new("svc-a", test_config());
        trip(&cb);
        assert!(cb.try_acquire().is_none());

        tokio::time::sleep(Duration::from_millis(150)).await;

        let permit = cb.try_acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        drop(permit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens() {
        let cb = CircuitBreaker::new("svc-a", test_config());
        trip(&cb);
        tokio::time::sleep(Duration::from_millis(150)).await;

        cb.try_acquire().unwrap().failure();

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
        assert_eq!(cb.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_after_success_threshold_with_zeroed_counters() {
        let cb = CircuitBreaker::new("svc-a", test_config());
        trip(&cb);
        tokio::time::sleep(Duration::from_millis(150)).await;

        cb.try_acquire().unwrap().success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.try_acquire().unwrap().success();
        assert_eq!(cb.state(), CircuitState::Closed);

        let stats = cb.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_bounds_concurrent_probes() {
        let cb = CircuitBreaker::new("svc-a", test_config());
        trip(&cb);
        tokio::time::sleep(Duration::from_millis(150)).await;

        // max_probes = 2: two in-flight probes admitted, third rejected
        let p1 = cb.try_acquire().unwrap();
        let p2 = cb.try_acquire().unwrap();
        assert!(cb.try_acquire().is_none());

        // An outcome frees a probe slot
        p1.success();
        assert!(cb.try_acquire().is_some());
        drop(p2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_returns_slot() {
        let cb = CircuitBreaker::new("svc-a", test_config());
        trip(&cb);
        tokio::time::sleep(Duration::from_millis(150)).await;

        // Both probe slots taken, then abandoned without an outcome
        let p1 = cb.try_acquire().unwrap();
        let p2 = cb.try_acquire().unwrap();
        drop(p1);
        drop(p2);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Slots returned: fresh probes are admitted and can close the circuit
        cb.try_acquire().unwrap().success();
        cb.try_acquire().unwrap().success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_restarts_failure_count() {
        let config = CircuitConfig {
            window: Duration::from_millis(50),
            ..test_config()
        };
        let cb = CircuitBreaker::new("svc-a", config);

        fail_once(&cb);
        fail_once(&cb);
        assert_eq!(cb.stats().failure_count, 2);

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Stale window: this failure starts a fresh count
        fail_once(&cb);
        assert_eq!(cb.stats().failure_count, 1);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_success_resets_closed_failure_count() {
        let cb = CircuitBreaker::new("svc-a", test_config());
        fail_once(&cb);
        fail_once(&cb);

        cb.try_acquire().unwrap().success();

        assert_eq!(cb.stats().failure_count, 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_force_controls() {
        let cb = CircuitBreaker::new("svc-a", test_config());

        cb.force_open();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());

        cb.force_close();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire().is_some());

        fail_once(&cb);
        cb.reset();
        let stats = cb.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.rejected, 0);
    }

    #[tokio::test]
    async fn test_registry_isolates_targets() {
        let registry = CircuitRegistry::new(test_config());

        let a = registry.breaker("https://svc-a.internal");
        trip(&a);
        assert_eq!(a.state(), CircuitState::Open);

        let b = registry.breaker("https://svc-b.internal");
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_registry_stats_global_and_scoped() {
        let registry = CircuitRegistry::new(test_config());
        registry.breaker("https://svc-a.internal");
        registry.breaker("https://svc-b.internal");

        assert_eq!(registry.stats(None).len(), 2);
        let scoped = registry.stats(Some("https://svc-a.internal"));
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].target, "https://svc-a.internal");
        assert!(registry.stats(Some("unknown")).is_empty());
    }
}
