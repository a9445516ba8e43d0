//! Observability collaborators injected into the pipeline.
//!
//! - [`tracer`]: per-call spans and correlation ids
//! - [`sink`]: request/response counters and latency histogram
//! - [`logger`]: one structured record per call
//!
//! Each is a trait with a default implementation backed by the `tracing` or
//! `metrics` facades.

pub mod logger;
pub mod sink;
pub mod tracer;

pub use logger::{CallLogger, LogLevel, TracingLogger};
pub use sink::{CallOutcome, InMemoryMetrics, MethodSummary, MetricsSink, RecorderSink};
pub use tracer::{CallSpan, Tracer, TracingTracer};
