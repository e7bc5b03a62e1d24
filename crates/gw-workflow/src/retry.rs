//! Retry backoff scheduling (§4.7): only transient failures
//! (`GatewayError::is_transient`) are retried, up to `max_attempts`, with
//! delay computed per the step's [`BackoffType`].

use rand::Rng;

use crate::definition::{BackoffType, RetryPolicy};

/// Delay before the attempt that follows a failed attempt numbered
/// `attempt` (0-indexed: the delay before the 2nd attempt overall is
/// `delay_for_attempt(policy, 0)`).
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> std::time::Duration {
    let base = match policy.backoff_type {
        BackoffType::Fixed => policy.initial_delay_ms,
        BackoffType::Linear => policy.initial_delay_ms.saturating_mul((attempt + 1) as u64),
        BackoffType::Exponential => policy.initial_delay_ms.saturating_mul(1u64 << attempt.min(32)),
    };
    let capped = if policy.max_delay_ms > 0 { base.min(policy.max_delay_ms) } else { base };
    let delay_ms = if policy.jitter && capped > 0 {
        rand::thread_rng().gen_range(0..=capped)
    } else {
        capped
    };
    std::time::Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            backoff_type: BackoffType::Exponential,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            jitter: false,
        };
        assert_eq!(delay_for_attempt(&policy, 0).as_millis(), 100);
        assert_eq!(delay_for_attempt(&policy, 1).as_millis(), 200);
        assert_eq!(delay_for_attempt(&policy, 2).as_millis(), 400);
        assert_eq!(delay_for_attempt(&policy, 10).as_millis(), 1000);
    }

    #[test]
    fn linear_backoff_increases_by_fixed_step() {
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff_type: BackoffType::Linear,
            initial_delay_ms: 50,
            max_delay_ms: 0,
            jitter: false,
        };
        assert_eq!(delay_for_attempt(&policy, 0).as_millis(), 50);
        assert_eq!(delay_for_attempt(&policy, 1).as_millis(), 100);
        assert_eq!(delay_for_attempt(&policy, 2).as_millis(), 150);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_type: BackoffType::Fixed,
            initial_delay_ms: 50,
            max_delay_ms: 0,
            jitter: false,
        };
        assert_eq!(delay_for_attempt(&policy, 0).as_millis(), 50);
        assert_eq!(delay_for_attempt(&policy, 5).as_millis(), 50);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_type: BackoffType::Fixed,
            initial_delay_ms: 100,
            max_delay_ms: 0,
            jitter: true,
        };
        for _ in 0..20 {
            let d = delay_for_attempt(&policy, 0).as_millis();
            assert!(d <= 100);
        }
    }
}
