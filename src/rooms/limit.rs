//! Per-connection flood protection.

use std::num::NonZeroU32;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

/// Client-originated events admitted per second.
pub const EVENTS_PER_SECOND: u32 = 10;
/// Events admitted back to back before the rate applies.
pub const EVENT_BURST: u32 = 1;

/// Token bucket guarding one connection's broadcasts.
///
/// Events over the limit are dropped by the caller without telling the sender.
pub struct MessageLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl MessageLimiter {
    pub fn new(per_second: NonZeroU32, burst: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_second(per_second).allow_burst(burst)),
        }
    }

    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl Default for MessageLimiter {
    fn default() -> Self {
        let per_second = NonZeroU32::new(EVENTS_PER_SECOND).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(EVENT_BURST).unwrap_or(NonZeroU32::MIN);
        Self::new(per_second, burst)
    }
}
