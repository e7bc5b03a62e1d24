//! Generic circuit breaker (§4.7, and reused by §6's "circuit breaker
//! around every call" to the key-value store). States: `closed -> open ->
//! half_open -> closed`. Shared so the workflow engine's per-step breaker
//! and the cache's per-store-call breaker behave identically.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Lock-free breaker: consecutive failures counted with an atomic, the
/// `open`-since timestamp likewise, so `before_call`/`on_result` can be
/// called from any number of concurrent callers without an outer mutex.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: AtomicU32,
    opened_at_ms: AtomicU64,
    probing: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            consecutive_failures: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            probing: AtomicU32::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        let opened_at = self.opened_at_ms.load(Ordering::SeqCst);
        if opened_at == 0 {
            return CircuitState::Closed;
        }
        if now_ms().saturating_sub(opened_at) >= self.config.reset_timeout_ms {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Call before invoking the underlying operation. Returns `false` when
    /// the breaker is open and the call should fail fast with
    /// `CircuitOpen` without touching the wrapped tool/store.
    pub fn allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                // Only a single probe is admitted per half-open window.
                self.probing.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).is_ok()
            }
        }
    }

    pub fn on_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.opened_at_ms.store(0, Ordering::SeqCst);
        self.probing.store(0, Ordering::SeqCst);
    }

    pub fn on_failure(&self) {
        if self.state() == CircuitState::HalfOpen {
            // Probe failed: reopen immediately.
            self.opened_at_ms.store(now_ms(), Ordering::SeqCst);
            self.probing.store(0, Ordering::SeqCst);
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_threshold {
            self.opened_at_ms.store(now_ms(), Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout_ms: 60_000,
        });
        assert!(breaker.allow());
        breaker.on_failure();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn success_resets_failure_count() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout_ms: 60_000,
        });
        breaker.on_failure();
        breaker.on_success();
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_admits_single_probe() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout_ms: 0,
        });
        breaker.on_failure();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.allow());
        assert!(!breaker.allow());
    }
}
