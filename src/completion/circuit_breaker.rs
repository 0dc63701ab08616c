//! Per-model circuit breaker for the completion service

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,   // Normal operation
    Open,     // Failing, model is skipped
    HalfOpen, // One trial request allowed
}

#[derive(Debug, Clone)]
struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

impl BreakerEntry {
    fn closed() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Tracks consecutive failures per model
#[derive(Debug)]
pub struct CircuitBreaker {
    models: Mutex<HashMap<String, BreakerEntry>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            models: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, BreakerEntry>> {
        self.models.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether requests to `model` should be skipped right now
    ///
    /// An open breaker turns half-open once the reset timeout has elapsed.
    pub fn is_open(&self, model: &str) -> bool {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(model) else {
            return false;
        };

        if entry.state != BreakerState::Open {
            return false;
        }
        match entry.opened_at {
            Some(opened_at) if opened_at.elapsed() >= self.config.reset_timeout => {
                entry.state = BreakerState::HalfOpen;
                false
            }
            _ => true,
        }
    }

    pub fn mark_success(&self, model: &str) {
        self.entries().insert(model.to_string(), BreakerEntry::closed());
    }

    pub fn mark_failure(&self, model: &str) {
        let mut entries = self.entries();
        let entry = entries.entry(model.to_string()).or_insert_with(BreakerEntry::closed);
        entry.consecutive_failures += 1;

        // A failed trial request reopens immediately
        if entry.state == BreakerState::HalfOpen
            || entry.consecutive_failures >= self.config.failure_threshold
        {
            entry.state = BreakerState::Open;
            entry.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self, model: &str) -> BreakerState {
        self.entries()
            .get(model)
            .map(|e| e.state)
            .unwrap_or(BreakerState::Closed)
    }

    pub fn failure_count(&self, model: &str) -> usize {
        self.entries()
            .get(model)
            .map(|e| e.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn reset_all(&self) {
        self.entries().clear();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "llama-3.3-70b-versatile";

    fn breaker(threshold: usize, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: reset,
        })
    }

    #[test]
    fn test_closed_by_default() {
        let breaker = CircuitBreaker::default();
        assert!(!breaker.is_open(MODEL));
        assert_eq!(breaker.state(MODEL), BreakerState::Closed);
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = breaker(3, Duration::from_secs(30));

        breaker.mark_failure(MODEL);
        breaker.mark_failure(MODEL);
        assert!(!breaker.is_open(MODEL));

        breaker.mark_failure(MODEL);
        assert!(breaker.is_open(MODEL));
        assert_eq!(breaker.state(MODEL), BreakerState::Open);
        assert!(!breaker.is_open("gemma2-9b-it"));
    }

    #[test]
    fn test_success_resets() {
        let breaker = breaker(3, Duration::from_secs(30));
        breaker.mark_failure(MODEL);
        breaker.mark_failure(MODEL);
        breaker.mark_success(MODEL);

        assert_eq!(breaker.failure_count(MODEL), 0);
        assert_eq!(breaker.state(MODEL), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout_and_reopens_on_failure() {
        let breaker = breaker(2, Duration::from_millis(50));
        breaker.mark_failure(MODEL);
        breaker.mark_failure(MODEL);
        assert!(breaker.is_open(MODEL));

        std::thread::sleep(Duration::from_millis(80));
        assert!(!breaker.is_open(MODEL));
        assert_eq!(breaker.state(MODEL), BreakerState::HalfOpen);

        breaker.mark_failure(MODEL);
        assert!(breaker.is_open(MODEL));
    }

    #[test]
    fn test_reset_all() {
        let breaker = breaker(1, Duration::from_secs(30));
        breaker.mark_failure(MODEL);
        assert!(breaker.is_open(MODEL));
        breaker.reset_all();
        assert!(!breaker.is_open(MODEL));
    }
}
