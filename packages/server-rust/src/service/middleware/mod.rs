//! Tower middleware layers for the unary call pipeline.
//!
//! - [`trace`]: Per-call span and `x-trace-id` propagation
//! - [`breaker`]: Circuit breaker gate and outcome recording
//! - [`rate_limit`]: Token-bucket admission
//! - [`metrics`]: Request/response counters and latency histogram
//! - [`logging`]: One structured record per call
//! - [`validate`]: Request self-validation
//! - [`chain`]: Ordered composition of layers around a handler
//! - [`pipeline`]: The canonical layer order

pub mod breaker;
pub mod chain;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod trace;
pub mod validate;

pub use breaker::CircuitBreakerLayer;
pub use chain::{InterceptorChain, Pipeline};
pub use logging::LoggingLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_unary_pipeline, PipelineComponents};
pub use rate_limit::RateLimitLayer;
pub use trace::TracingLayer;
pub use validate::ValidationLayer;
