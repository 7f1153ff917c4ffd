//! Retry policy and backoff delay calculation
//!
//! Pure and deterministic: `delay = min(initial * multiplier^(attempt-1), max)`.
//! Attempt numbers are 1-based - the delay after the first failed attempt is
//! `delay_for_attempt(1) = initial_delay`.

use sisu_core::FaultError;
use std::time::Duration;

/// Retry budget and backoff parameters
///
/// Shared by the resilient request client (attempts beyond the first) and
/// the dead letter manager (handler re-invocations). Named presets are
/// parameterizations only; there is no behavioral difference between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retry budget: the client makes `max_retries + 1` total attempts,
    /// the DLQ manager makes `max_retries` total handler invocations
    pub max_retries: u32,
    /// Delay after the first failed attempt
    pub initial_delay: Duration,
    /// Ceiling for the computed delay
    pub max_delay: Duration,
    /// Growth factor per attempt; 1.0 gives a constant (linear) delay
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Standard exponential backoff: 3 retries, doubling from 1s, capped at 30s
    pub fn exponential() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Constant delay: multiplier 1 keeps every wait at `initial_delay`
    pub fn linear() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 1.0,
        }
    }

    /// Many fast retries for latency-sensitive calls: 5 retries from 100ms
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 1.5,
        }
    }

    /// Few, widely-spaced retries for expensive operations: 2 retries from 2s
    pub fn conservative() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 3.0,
        }
    }

    /// Validate policy invariants
    ///
    /// `max_delay >= initial_delay` and `multiplier > 0`.
    pub fn validate(&self) -> Result<(), FaultError> {
        if self.max_delay < self.initial_delay {
            return Err(FaultError::Config(format!(
                "max_delay ({:?}) must be >= initial_delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        if self.multiplier <= 0.0 || !self.multiplier.is_finite() {
            return Err(FaultError::Config(format!(
                "backoff multiplier must be positive, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Calculate the delay after the given 1-based attempt number
    ///
    /// Attempt 0 is invalid input and returns zero. Computed in
    /// microseconds for precision with sub-millisecond initial delays.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        debug_assert!(attempt >= 1, "backoff attempt numbers are 1-based");
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_us =
            self.initial_delay.as_micros() as f64 * self.multiplier.powi((attempt - 1) as i32);
        let capped_us = base_us.min(self.max_delay.as_micros() as f64);

        Duration::from_micros(capped_us as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}
