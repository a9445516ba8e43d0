//! Pipeline composition: the canonical unary interceptor order.

use std::sync::Arc;

use ringfence_core::{CircuitBreaker, ConfigError, Message};
use tokio_util::sync::CancellationToken;
use tower::Service;

use super::breaker::CircuitBreakerLayer;
use super::chain::{InterceptorChain, Pipeline};
use super::logging::LoggingLayer;
use super::metrics::MetricsLayer;
use super::rate_limit::RateLimitLayer;
use super::trace::TracingLayer;
use super::validate::ValidationLayer;
use crate::observability::{CallLogger, MetricsSink, Tracer};
use crate::service::call::{CallError, UnaryCall};
use crate::service::config::PipelineConfig;
use crate::service::limiter::RateLimiter;

/// Everything the canonical pipeline needs besides the handler.
#[derive(Clone)]
pub struct PipelineComponents {
    pub tracer: Arc<dyn Tracer>,
    pub breaker: CircuitBreaker,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<dyn MetricsSink>,
    pub logger: Arc<dyn CallLogger>,
}

impl PipelineComponents {
    /// Builds the breaker and starts the rate limiter from `config`.
    ///
    /// The limiter's replenisher stops when `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if either engine's settings are invalid.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime; see [`RateLimiter::start`].
    pub fn from_config(
        config: &PipelineConfig,
        shutdown: &CancellationToken,
        tracer: Arc<dyn Tracer>,
        metrics: Arc<dyn MetricsSink>,
        logger: Arc<dyn CallLogger>,
    ) -> Result<Self, ConfigError> {
        let breaker = CircuitBreaker::new(&config.breaker)?;
        let limiter = Arc::new(RateLimiter::start(&config.rate_limit, shutdown)?);
        Ok(Self {
            tracer,
            breaker,
            limiter,
            metrics,
            logger,
        })
    }
}

/// Wraps `handler` in the unary interceptor chain.
///
/// Order (outermost to innermost):
/// 1. `TracingLayer` -- span and correlation id for every call, rejected or not
/// 2. `CircuitBreakerLayer` -- fail fast while the dependency is unhealthy
/// 3. `RateLimitLayer` -- shed excess load
/// 4. `MetricsLayer` -- count and time admitted calls
/// 5. `LoggingLayer` -- one record per admitted call
/// 6. `ValidationLayer` -- reject malformed requests right before the handler
#[must_use]
pub fn build_unary_pipeline<H, Req, Resp>(
    handler: H,
    components: PipelineComponents,
) -> Pipeline<Req, Resp>
where
    Req: Message,
    Resp: Send + 'static,
    H: Service<UnaryCall<Req>, Response = Resp, Error = CallError> + Clone + Send + 'static,
    H::Future: Send + 'static,
{
    InterceptorChain::new()
        .push(TracingLayer::new(components.tracer))
        .push(CircuitBreakerLayer::new(components.breaker))
        .push(RateLimitLayer::new(components.limiter))
        .push(MetricsLayer::new(components.metrics))
        .push(LoggingLayer::new(components.logger))
        .push(ValidationLayer)
        .compose(handler)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ringfence_core::{
        BreakerSettings, CallContext, CallInfo, CircuitState, Code, ManualClock,
        RateLimitSettings, ValidationError, TRACE_ID_HEADER,
    };

    use super::*;
    use crate::observability::{CallOutcome, InMemoryMetrics, LogLevel};
    use crate::testing::{
        CountingHandler, RecordingLogger, RecordingTracer, Transfer, TRANSFER,
    };

    struct Harness {
        pipeline: Pipeline<Transfer, i64>,
        handler: CountingHandler,
        tracer: RecordingTracer,
        metrics: Arc<InMemoryMetrics>,
        logger: RecordingLogger,
        breaker: CircuitBreaker,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new(capacity: u32) -> Self {
            let clock = Arc::new(ManualClock::new(0));
            let breaker = CircuitBreaker::builder(&BreakerSettings {
                name: "ledger".to_string(),
                failure_ratio: 0.6,
                min_samples: 5,
                open_timeout_ms: 5_000,
                max_half_open_requests: 3,
                interval_ms: None,
            })
            .clock(clock.clone())
            .build()
            .unwrap();
            let limiter = RateLimiter::start(
                &RateLimitSettings {
                    capacity,
                    period_ms: 60_000,
                },
                &CancellationToken::new(),
            )
            .unwrap();

            let handler = CountingHandler::default();
            let tracer = RecordingTracer::default();
            let metrics = Arc::new(InMemoryMetrics::new());
            let logger = RecordingLogger::default();

            let pipeline = build_unary_pipeline(
                handler.clone(),
                PipelineComponents {
                    tracer: Arc::new(tracer.clone()),
                    breaker: breaker.clone(),
                    limiter: Arc::new(limiter),
                    metrics: metrics.clone(),
                    logger: Arc::new(logger.clone()),
                },
            );

            Self {
                pipeline,
                handler,
                tracer,
                metrics,
                logger,
                breaker,
                clock,
            }
        }

        async fn call(&self, amount: i64) -> Result<i64, CallError> {
            self.pipeline
                .invoke(CallContext::new(), Transfer { amount }, CallInfo::new(TRANSFER))
                .await
        }
    }

    #[tokio::test]
    async fn successful_call_passes_every_unit() {
        let h = Harness::new(10);
        let ctx = CallContext::new();
        let headers = ctx.response_headers().clone();

        let resp = h
            .pipeline
            .invoke(ctx, Transfer { amount: 42 }, CallInfo::new(TRANSFER))
            .await
            .unwrap();

        assert_eq!(resp, 42);
        assert_eq!(h.handler.hits(), 1);
        assert_eq!(headers.get(TRACE_ID_HEADER).as_deref(), Some("trace-0"));
        assert_eq!(h.tracer.finished().len(), 1);
        assert_eq!(h.metrics.responses(CallOutcome::Success, TRANSFER), 1);
        assert_eq!(h.logger.records()[0].level, LogLevel::Info);
        assert_eq!(h.logger.records()[0].fields["trace_id"], "trace-0");
        assert_eq!(h.breaker.counts().total_successes, 1);
    }

    #[tokio::test]
    async fn limiter_denial_skips_inner_units_but_outer_units_observe() {
        let h = Harness::new(1);
        h.call(1).await.unwrap();

        let err = h.call(1).await.unwrap_err();
        assert_eq!(err, CallError::RateLimited);
        assert_eq!(err.code(), Code::ResourceExhausted);

        // Handler, metrics and logging only saw the admitted call.
        assert_eq!(h.handler.hits(), 1);
        assert_eq!(h.metrics.requests(TRANSFER), 1);
        assert_eq!(h.logger.records().len(), 1);

        // Tracing saw both and tagged the rejection.
        let spans = h.tracer.finished();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].tag("error"), Some("true"));
        assert_eq!(spans[1].tag("err"), Some("rate_limited: RESOURCE_EXHAUSTED"));

        // The breaker admitted both and holds the rejection against the
        // protected chain.
        let counts = h.breaker.counts();
        assert_eq!(counts.requests, 2);
        assert_eq!(counts.total_failures, 1);
        assert_eq!(h.breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn validation_failure_is_observed_then_returned_untouched() {
        let h = Harness::new(10);
        let err = h.call(-1).await.unwrap_err();

        assert_eq!(
            err,
            CallError::ValidationFailed(ValidationError::for_field("amount", "must be positive"))
        );
        assert_eq!(h.handler.hits(), 0);
        assert_eq!(h.metrics.responses(CallOutcome::Error, TRANSFER), 1);

        let records = h.logger.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Error);
        assert_eq!(records[0].fields["code"], "INVALID_ARGUMENT");
        assert_eq!(h.breaker.counts().total_failures, 1);
        assert_eq!(h.breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn breaker_trips_then_probes_after_timeout() {
        let h = Harness::new(100);

        for amount in [5000, 5000, 5000, 1, 1] {
            let _ = h.call(amount).await;
        }

        let err = h.call(1).await.unwrap_err();
        assert!(matches!(err, CallError::CircuitOpen(_)));
        assert_eq!(err.code(), Code::Unavailable);
        assert_eq!(h.handler.hits(), 5);
        // Breaker sits outside metrics: the rejected call was never counted.
        assert_eq!(h.metrics.requests(TRANSFER), 5);

        h.clock.advance(Duration::from_secs(5));
        assert_eq!(h.call(1).await.unwrap(), 1);
        assert_eq!(h.handler.hits(), 6);
        assert_eq!(h.breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn concurrent_invocations_share_engines() {
        let h = Harness::new(5);
        let calls: Vec<_> = (0..20)
            .map(|_| {
                let fut = h
                    .pipeline
                    .invoke(CallContext::new(), Transfer { amount: 1 }, CallInfo::new(TRANSFER));
                tokio::spawn(fut)
            })
            .collect();

        let mut admitted = 0;
        let mut limited = 0;
        let mut open = 0;
        for call in calls {
            match call.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(CallError::RateLimited) => limited += 1,
                Err(CallError::CircuitOpen(_)) => open += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        // 5 successes then 8 denials push the failure ratio past 0.6; the
        // remaining calls are refused by the breaker.
        assert_eq!((admitted, limited, open), (5, 8, 7));
        assert_eq!(h.breaker.state(), CircuitState::Open);
        assert_eq!(h.tracer.finished().len(), 20);
    }

    #[tokio::test]
    async fn components_from_config() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "rate_limit": { "capacity": 2, "period_ms": 1000 },
                "breaker": {
                    "name": "ledger",
                    "failure_ratio": 0.5,
                    "min_samples": 4,
                    "open_timeout_ms": 1000,
                    "max_half_open_requests": 1
                }
            }"#,
        )
        .unwrap();
        let shutdown = CancellationToken::new();
        let components = PipelineComponents::from_config(
            &config,
            &shutdown,
            Arc::new(RecordingTracer::default()),
            Arc::new(InMemoryMetrics::new()),
            Arc::new(RecordingLogger::default()),
        )
        .unwrap();

        assert_eq!(components.breaker.name(), "ledger");
        assert_eq!(components.limiter.capacity(), 2);
        shutdown.cancel();
        assert!(!components.limiter.is_running());
    }
}
