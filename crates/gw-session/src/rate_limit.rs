//! Token-bucket rate limiting at two scopes (§4.2, §4.10):
//! [`SessionLimiter`] bounds one connection, [`TenantLimiter`] bounds the
//! aggregate of every session belonging to one tenant. Both reuse the same
//! governor-backed shape as `gw_bus::rate_limit::SubscriptionLimiter`.

use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use gw_core::tenant::TenantId;
use gw_core::RateLimitSpec;
use nonzero_ext::nonzero;

type DirectLimiter = RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>;

fn build(spec: &RateLimitSpec) -> DirectLimiter {
    let per_second = NonZeroU32::new(spec.per_second).unwrap_or(nonzero!(1u32));
    let burst = NonZeroU32::new(spec.burst.max(spec.per_second)).unwrap_or(per_second);
    RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst))
}

/// Per-connection token bucket (default 200 req/s, burst 400).
pub struct SessionLimiter {
    limiter: DirectLimiter,
}

impl SessionLimiter {
    pub fn new(spec: &RateLimitSpec) -> Self {
        SessionLimiter { limiter: build(spec) }
    }

    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

/// One bucket per tenant, shared across every session belonging to that
/// tenant, so a tenant with many open connections can't starve others by
/// spreading load across sockets.
pub struct TenantLimiter {
    spec: RateLimitSpec,
    buckets: DashMap<TenantId, DirectLimiter>,
}

impl TenantLimiter {
    pub fn new(spec: RateLimitSpec) -> Self {
        TenantLimiter { spec, buckets: DashMap::new() }
    }

    pub fn try_acquire(&self, tenant: TenantId) -> bool {
        self.buckets
            .entry(tenant)
            .or_insert_with(|| build(&self.spec))
            .check()
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_limiter_throttles_after_burst() {
        let spec = RateLimitSpec { per_second: 1, burst: 2 };
        let limiter = SessionLimiter::new(&spec);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn tenant_limiter_tracks_buckets_independently_per_tenant() {
        let spec = RateLimitSpec { per_second: 1, burst: 1 };
        let limiter = TenantLimiter::new(spec);
        let a = TenantId::new();
        let b = TenantId::new();
        assert!(limiter.try_acquire(a));
        assert!(!limiter.try_acquire(a));
        assert!(limiter.try_acquire(b));
    }
}
