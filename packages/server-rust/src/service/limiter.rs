//! Self-replenishing rate limiter.
//!
//! Wraps a [`TokenBucket`] and owns the background task that adds one permit
//! every refill interval. The task runs until the limiter's cancellation token
//! fires: on [`RateLimiter::stop`], when the limiter is dropped, or when the
//! parent token passed to [`RateLimiter::start`] is cancelled.

use std::sync::Arc;

use parking_lot::Mutex;
use ringfence_core::{ConfigError, RateLimitSettings, TokenBucket};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Token-bucket rate limiter with its replenisher task.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Arc<TokenBucket>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimiter {
    /// Creates a full bucket and spawns its replenisher on the current tokio
    /// runtime. The replenisher stops when `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the settings are invalid; nothing is spawned.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime, since the replenisher is
    /// spawned with `tokio::spawn`.
    pub fn start(
        settings: &RateLimitSettings,
        shutdown: &CancellationToken,
    ) -> Result<Self, ConfigError> {
        let bucket = Arc::new(TokenBucket::from_settings(settings)?);
        let cancel = shutdown.child_token();
        let handle = tokio::spawn(replenish(Arc::clone(&bucket), cancel.clone()));

        tracing::debug!(
            capacity = bucket.capacity(),
            refill_interval_ms = u64::try_from(bucket.refill_interval().as_millis())
                .unwrap_or(u64::MAX),
            "rate limiter started"
        );

        Ok(Self {
            bucket,
            cancel,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Non-blocking admission check. Consumes a permit on success.
    pub fn allow(&self) -> bool {
        self.bucket.try_acquire()
    }

    #[must_use]
    pub fn available(&self) -> u32 {
        self.bucket.available()
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.bucket.capacity()
    }

    /// Whether the replenisher has not been asked to stop.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Cancels the replenisher and waits for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn replenish(bucket: Arc<TokenBucket>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(bucket.refill_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The bucket starts full; skip the immediate first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                bucket.refill();
            }
        }
    }

    tracing::debug!("rate limiter replenisher stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
