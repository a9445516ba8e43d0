//! Ringfence Server: tower interceptor pipeline for unary calls with tracing,
//! circuit breaking, rate limiting, metrics, logging and validation.

pub mod observability;
pub mod service;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod testing;

pub use observability::{
    CallLogger, CallOutcome, CallSpan, InMemoryMetrics, LogLevel, MetricsSink, RecorderSink,
    Tracer, TracingLogger, TracingTracer,
};
pub use service::{
    build_unary_pipeline, dependency_failures_only, handler_fn, CallError, InterceptorChain,
    MethodRouter, Pipeline, PipelineComponents, PipelineConfig, RateLimiter, RetryAdvice,
    UnaryCall,
};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
