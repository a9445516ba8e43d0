//! Token bucket permit counter.
//!
//! The bucket starts full with `capacity` permits. Each admitted call consumes
//! one permit via [`TokenBucket::try_acquire`]; a replenisher adds one permit
//! every `refill_interval` (`period / capacity`) via [`TokenBucket::refill`].
//! A refill on a full bucket is dropped, never queued.
//!
//! The counter is a single atomic updated with compare-and-swap, so acquiring
//! never blocks and never contends with the replenisher on a lock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Rate limit settings as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitSettings {
    /// Bucket size: the maximum burst of calls admitted at once.
    pub capacity: u32,
    /// Time to refill an empty bucket, in milliseconds.
    pub period_ms: u64,
}

impl RateLimitSettings {
    #[must_use]
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Fixed-capacity permit pool.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    available: AtomicU32,
    refill_interval: Duration,
}

impl TokenBucket {
    /// Creates a full bucket replenished to capacity once per `period`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when `capacity` is zero, `period` is zero, or the
    /// derived refill interval rounds down to zero.
    pub fn new(capacity: u32, period: Duration) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        let refill_interval = period / capacity;
        if refill_interval.is_zero() {
            return Err(ConfigError::RefillIntervalTooShort { period, capacity });
        }

        Ok(Self {
            capacity,
            available: AtomicU32::new(capacity),
            refill_interval,
        })
    }

    /// Creates a bucket from configuration settings.
    ///
    /// # Errors
    ///
    /// See [`TokenBucket::new`].
    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self, ConfigError> {
        Self::new(settings.capacity, settings.period())
    }

    /// Consumes one permit if any is available. Never blocks.
    pub fn try_acquire(&self) -> bool {
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Adds one permit. Returns `false` (and drops the permit) if the bucket is
    /// already full.
    pub fn refill(&self) -> bool {
        let capacity = self.capacity;
        self.available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    #[must_use]
    pub fn available(&self) -> u32 {
        self.available.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.available() == self.capacity
    }
}
