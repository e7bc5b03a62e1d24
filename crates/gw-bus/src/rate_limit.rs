//! Per-subscription token-bucket rate limiting (§4.5 matching order: filter
//! → rate limit → aggregation/delivery).

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use governor::{Quota, RateLimiter};
use gw_core::subscription::RateLimitConfig;
use nonzero_ext::nonzero;

pub struct SubscriptionLimiter {
    limiter: RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
    dropped: AtomicU64,
}

impl SubscriptionLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let per_second = NonZeroU32::new(config.max_per_second).unwrap_or(nonzero!(1u32));
        let burst = NonZeroU32::new(config.burst.max(config.max_per_second)).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);
        SubscriptionLimiter {
            limiter: RateLimiter::direct(quota),
            dropped: AtomicU64::new(0),
        }
    }

    /// `true` if the event may be delivered now. On exhaustion the caller
    /// applies the subscription's `backpressure_mode`; this type only
    /// tracks the drop counter for the default `drop_oldest` mode.
    pub fn try_acquire(&self) -> bool {
        let allowed = self.limiter.check().is_ok();
        if !allowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_throttle() {
        let limiter = SubscriptionLimiter::new(RateLimitConfig { max_per_second: 2, burst: 2 });
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.dropped_count(), 1);
    }
}
