//! Rate limiting middleware.
//!
//! Rejects calls with `CallError::RateLimited` when the token bucket is
//! empty. Never queues or waits for a permit.

use std::sync::Arc;
use std::task::{Context, Poll};

use tower::{Layer, Service};

use crate::service::call::{CallError, CallFuture, UnaryCall};
use crate::service::limiter::RateLimiter;

// ---------------------------------------------------------------------------
// RateLimitLayer
// ---------------------------------------------------------------------------

/// Tower layer admitting calls through a shared [`RateLimiter`].
#[derive(Debug, Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: Arc::clone(&self.limiter),
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S, Req> Service<UnaryCall<Req>> for RateLimitService<S>
where
    S: Service<UnaryCall<Req>, Error = CallError> + Send,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = CallError;
    type Future = CallFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: UnaryCall<Req>) -> Self::Future {
        if !self.limiter.allow() {
            tracing::debug!(method = call.info.full_method(), "call rate limited");
            return Box::pin(async { Err(CallError::RateLimited) });
        }
        Box::pin(self.inner.call(call))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ringfence_core::RateLimitSettings;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::testing::{transfer, CountingHandler};

    fn limiter(capacity: u32, period_ms: u64) -> Arc<RateLimiter> {
        Arc::new(
            RateLimiter::start(
                &RateLimitSettings {
                    capacity,
                    period_ms,
                },
                &CancellationToken::new(),
            )
            .unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn denies_without_calling_inner_then_recovers() {
        let handler = CountingHandler::default();
        let svc = RateLimitLayer::new(limiter(2, 1000)).layer(handler.clone());

        assert!(svc.clone().oneshot(transfer(1)).await.is_ok());
        assert!(svc.clone().oneshot(transfer(1)).await.is_ok());
        let err = svc.clone().oneshot(transfer(1)).await.unwrap_err();
        assert_eq!(err, CallError::RateLimited);
        assert_eq!(handler.hits(), 2);

        tokio::time::sleep(Duration::from_millis(510)).await;
        assert!(svc.oneshot(transfer(1)).await.is_ok());
        assert_eq!(handler.hits(), 3);
    }
}
