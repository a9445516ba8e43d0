//! Metrics middleware for unary calls.
//!
//! Counts the request before delegating, then counts the response and records
//! its latency in seconds, both labelled by outcome and full method. A call
//! that panics or is dropped mid-flight is recorded as an `error` response, so
//! requests and responses always balance.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::FutureExt;
use tower::{Layer, Service};

use crate::observability::{CallOutcome, MetricsSink};
use crate::service::call::{CallError, CallFuture, UnaryCall};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that reports call counts and latency to a [`MetricsSink`].
#[derive(Clone)]
pub struct MetricsLayer {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsLayer {
    #[must_use]
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            sink: Arc::clone(&self.sink),
        }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    sink: Arc<dyn MetricsSink>,
}

impl<S, Req> Service<UnaryCall<Req>> for MetricsService<S>
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
        let method = call.info.full_method().to_owned();
        self.sink.inc_requests(&method);

        let mut response = ResponseGuard {
            sink: Some(Arc::clone(&self.sink)),
            method,
            start: Instant::now(),
        };
        let fut = self.inner.call(call);

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => {
                    response.record(CallOutcome::of(&result));
                    result
                }
                Err(panic) => {
                    response.record(CallOutcome::Error);
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}

/// Records the response exactly once; an error if dropped unrecorded.
struct ResponseGuard {
    sink: Option<Arc<dyn MetricsSink>>,
    method: String,
    start: Instant,
}

impl ResponseGuard {
    fn record(&mut self, outcome: CallOutcome) {
        if let Some(sink) = self.sink.take() {
            sink.inc_responses(outcome, &self.method);
            sink.observe_latency(outcome, &self.method, self.start.elapsed().as_secs_f64());
        }
    }
}

impl Drop for ResponseGuard {
    fn drop(&mut self) {
        self.record(CallOutcome::Error);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ringfence_core::{CallContext, CallInfo, Status};
    use tower::ServiceExt;

    use super::*;
    use crate::observability::InMemoryMetrics;
    use crate::service::handler::handler_fn;
    use crate::testing::{transfer, CountingHandler, TRANSFER};

    #[tokio::test]
    async fn records_success_and_error_by_method() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let svc = MetricsLayer::new(metrics.clone()).layer(CountingHandler::default());

        svc.clone().oneshot(transfer(10)).await.unwrap();
        svc.clone().oneshot(transfer(10)).await.unwrap();
        svc.oneshot(transfer(5000)).await.unwrap_err();

        assert_eq!(metrics.requests(TRANSFER), 3);
        assert_eq!(metrics.responses(CallOutcome::Success, TRANSFER), 2);
        assert_eq!(metrics.responses(CallOutcome::Error, TRANSFER), 1);
        assert_eq!(metrics.latencies(CallOutcome::Success, TRANSFER).len(), 2);
        assert!(metrics
            .latencies(CallOutcome::Error, TRANSFER)
            .iter()
            .all(|s| *s >= 0.0));
    }

    #[tokio::test]
    async fn panicking_call_is_recorded_as_error() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let handler = handler_fn(|_ctx, _req: (), _info| async move {
            if true {
                panic!("handler blew up");
            }
            Ok::<(), Status>(())
        });
        let svc = MetricsLayer::new(metrics.clone()).layer(handler);
        let call = UnaryCall::new(CallContext::new(), (), CallInfo::new(TRANSFER));

        let joined = tokio::spawn(svc.oneshot(call)).await;
        assert!(joined.unwrap_err().is_panic());

        assert_eq!(metrics.requests(TRANSFER), 1);
        assert_eq!(metrics.responses(CallOutcome::Error, TRANSFER), 1);
        assert_eq!(metrics.latencies(CallOutcome::Error, TRANSFER).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_call_is_recorded_as_error() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let handler = handler_fn(|_ctx, _req: (), _info| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), Status>(())
        });
        let svc = MetricsLayer::new(metrics.clone()).layer(handler);
        let call = UnaryCall::new(CallContext::new(), (), CallInfo::new(TRANSFER));

        let timed_out = tokio::time::timeout(Duration::from_millis(10), svc.oneshot(call)).await;
        assert!(timed_out.is_err());

        assert_eq!(metrics.requests(TRANSFER), 1);
        assert_eq!(metrics.responses(CallOutcome::Error, TRANSFER), 1);
        assert_eq!(metrics.responses(CallOutcome::Success, TRANSFER), 0);
    }
}
