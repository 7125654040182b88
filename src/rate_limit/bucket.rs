//! Token bucket with exact integer credit.

use std::time::Duration;

use crate::config::BucketConfig;

/// A token bucket with exact fractional accounting.
///
/// Replenishes one token every `refill_interval`, up to `capacity`. Internally the
/// balance is kept as integer nanoseconds of "credit" (one token equals one
/// `refill_interval` of credit), so rates such as 200/minute (one token every 300ms)
/// never drift, however the calls are spaced.
///
/// Rounding is floor: a partially refilled token never admits, and exactly one full
/// token does.
///
/// The bucket does not read a clock itself; callers pass the monotonic reading so the
/// whole read-modify-write happens under whatever lock owns the bucket.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    interval_nanos: u128,
    credit: u128,
    last_refill_nanos: u64,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: BucketConfig, now_nanos: u64) -> Self {
        let interval_nanos = config.refill_interval.as_nanos().max(1);
        Self {
            capacity: config.capacity,
            interval_nanos,
            credit: interval_nanos * u128::from(config.capacity),
            last_refill_nanos: now_nanos,
        }
    }

    /// Refill for the time elapsed since the last call, then try to spend one token.
    ///
    /// Returns `false` without touching the balance when less than one token is available.
    pub fn allow(&mut self, now_nanos: u64) -> bool {
        self.refill(now_nanos);
        if self.credit >= self.interval_nanos {
            self.credit -= self.interval_nanos;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now_nanos: u64) {
        // A reading older than the last refill adds nothing and does not rewind.
        let elapsed = now_nanos.saturating_sub(self.last_refill_nanos);
        self.credit = (self.credit + u128::from(elapsed)).min(self.ceiling());
        self.last_refill_nanos = self.last_refill_nanos.max(now_nanos);
    }

    fn ceiling(&self) -> u128 {
        self.interval_nanos * u128::from(self.capacity)
    }

    /// Fractional token balance as of the last call.
    pub fn tokens(&self) -> f64 {
        self.credit as f64 / self.interval_nanos as f64
    }

    /// Whole tokens available as of the last call.
    pub fn available(&self) -> u32 {
        u32::try_from(self.credit / self.interval_nanos).unwrap_or(self.capacity)
    }

    /// Burst capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Time to regain one token.
    pub fn refill_interval(&self) -> Duration {
        Duration::from_nanos(u64::try_from(self.interval_nanos).unwrap_or(u64::MAX))
    }
}
