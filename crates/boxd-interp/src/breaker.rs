//! Circuit breaker for the interpreter surface.
//!
//! Sustained kernel-level failures (launch errors, dead connections — not
//! user code exceptions) trip the circuit; while open, interpreter calls
//! fail fast with a retry hint instead of piling onto a broken kernel
//! manager.

use boxd_core::{Result, SandboxError};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// Defaults matching the public contract: trip after 5 consecutive
    /// failures, hold open for 60 seconds.
    pub fn with_defaults() -> Self {
        Self::new(5, Duration::from_secs(60))
    }

    /// Fail fast while the circuit is open; half-opens after the cooldown.
    pub fn check(&self) -> Result<()> {
        let mut opened = self.opened_at.lock().unwrap();
        match *opened {
            Some(at) if at.elapsed() < self.cooldown => {
                let remaining = self.cooldown - at.elapsed();
                Err(SandboxError::CircuitOpen {
                    retry_after: remaining.as_secs().max(1),
                })
            }
            Some(_) => {
                // Half-open: let the next call probe the kernel manager.
                *opened = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
        *self.opened_at.lock().unwrap() = None;
    }

    pub fn record_failure(&self) {
        let count = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.threshold {
            let mut opened = self.opened_at.lock().unwrap();
            if opened.is_none() {
                warn!(failures = count, "interpreter circuit opened");
                *opened = Some(Instant::now());
            }
            self.failures.store(0, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trips_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        assert!(breaker.check().is_ok());
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.check().is_ok());
        breaker.record_failure();

        let err = breaker.check().unwrap_err();
        match err {
            SandboxError::CircuitOpen { retry_after } => assert!(retry_after >= 1),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn success_resets_the_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert!(breaker.check().is_ok());
    }

    #[test]
    fn half_opens_after_cooldown() {
        let breaker = CircuitBreaker::new(1, Duration::from_millis(0));
        breaker.record_failure();
        // Zero cooldown: immediately half-open again.
        assert!(breaker.check().is_ok());
        assert!(breaker.check().is_ok());
    }
}
