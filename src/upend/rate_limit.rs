//! Per-IP connection rate limiting.
//!
//! Uses governor's token bucket: one new channel per second per address with
//! a configurable burst, so a reconnect storm from one host cannot starve
//! the gateway.

use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use nonzero_ext::nonzero;
use std::net::IpAddr;
use std::num::NonZeroU32;
use tracing::debug;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

const DEFAULT_BURST: NonZeroU32 = nonzero!(10u32);

#[derive(Debug)]
pub struct ConnectionRateLimiter {
    limiters: DashMap<IpAddr, DirectRateLimiter>,
    burst: NonZeroU32,
}

impl ConnectionRateLimiter {
    /// `burst` of 0 falls back to the default.
    pub fn new(burst: u32) -> Self {
        Self {
            limiters: DashMap::new(),
            burst: NonZeroU32::new(burst).unwrap_or(DEFAULT_BURST),
        }
    }

    /// Check if an IP can open a new channel.
    ///
    /// Returns `true` if allowed, `false` if rate limited.
    pub fn check(&self, ip: IpAddr) -> bool {
        let limiter = self.limiters.entry(ip).or_insert_with(|| {
            GovRateLimiter::direct(Quota::per_second(nonzero!(1u32)).allow_burst(self.burst))
        });

        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(ip = %ip, "connection rate limit exceeded");
        }
        allowed
    }

    /// Drop limiter state for every address.
    pub fn clear(&self) {
        self.limiters.clear();
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_BURST.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_limited() {
        let limiter = ConnectionRateLimiter::new(3);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));

        let other: IpAddr = "10.0.0.2".parse().unwrap();
        assert!(limiter.check(other));
    }

    #[test]
    fn test_zero_burst_uses_default() {
        let limiter = ConnectionRateLimiter::new(0);
        let ip: IpAddr = "10.0.0.3".parse().unwrap();
        for _ in 0..10 {
            assert!(limiter.check(ip));
        }
        assert!(!limiter.check(ip));
    }
}
