//! Tracer collaborator used by the tracing layer.

use std::time::Instant;

use ringfence_core::{CallContext, TRACE_ID_HEADER};
use tracing::field::Empty;

/// Starts one span per call.
pub trait Tracer: Send + Sync {
    /// Starts a span named `name` for the call described by `ctx`.
    fn start_span(&self, ctx: &CallContext, name: &str) -> Box<dyn CallSpan>;
}

/// A started span. Finished exactly once by the tracing layer.
pub trait CallSpan: Send {
    /// Correlation identifier propagated under `x-trace-id`.
    fn trace_id(&self) -> &str;

    fn set_tag(&mut self, key: &str, value: &str);

    /// The `tracing` span the downstream future is instrumented with, if the
    /// tracer is backed by one.
    fn tracing_span(&self) -> Option<tracing::Span> {
        None
    }

    fn finish(self: Box<Self>);
}

// ---------------------------------------------------------------------------
// TracingTracer
// ---------------------------------------------------------------------------

/// Default tracer backed by `tracing` spans.
///
/// Reuses an incoming `x-trace-id` so a call chain keeps one correlation id;
/// otherwise mints a fresh UUID.
#[derive(Debug, Clone, Default)]
pub struct TracingTracer;

impl Tracer for TracingTracer {
    fn start_span(&self, ctx: &CallContext, name: &str) -> Box<dyn CallSpan> {
        let trace_id = ctx
            .incoming
            .get(TRACE_ID_HEADER)
            .filter(|id| !id.is_empty())
            .map_or_else(|| uuid::Uuid::new_v4().simple().to_string(), str::to_owned);

        let span = tracing::info_span!(
            "rpc",
            method = name,
            trace_id = %trace_id,
            error = Empty,
            err = Empty,
        );

        Box::new(TracingSpan {
            span,
            trace_id,
            started: Instant::now(),
            tags: Vec::new(),
        })
    }
}

struct TracingSpan {
    span: tracing::Span,
    trace_id: String,
    started: Instant,
    tags: Vec<(String, String)>,
}

impl CallSpan for TracingSpan {
    fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn set_tag(&mut self, key: &str, value: &str) {
        match key {
            "error" | "err" => {
                self.span.record(key, value);
            }
            _ => self.tags.push((key.to_owned(), value.to_owned())),
        }
    }

    fn tracing_span(&self) -> Option<tracing::Span> {
        Some(self.span.clone())
    }

    fn finish(self: Box<Self>) {
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_us = self.started.elapsed().as_micros() as u64;
        tracing::debug!(
            parent: &self.span,
            elapsed_us,
            tags = ?self.tags,
            "span finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use ringfence_core::Metadata;

    use super::*;

    #[test]
    fn mints_trace_id_when_absent() {
        let tracer = TracingTracer;
        let a = tracer.start_span(&CallContext::new(), "/a.B/C");
        let b = tracer.start_span(&CallContext::new(), "/a.B/C");

        assert_eq!(a.trace_id().len(), 32);
        assert_ne!(a.trace_id(), b.trace_id());
        a.finish();
        b.finish();
    }

    #[test]
    fn reuses_incoming_trace_id() {
        let incoming: Metadata = [(TRACE_ID_HEADER, "abc123")].into_iter().collect();
        let ctx = CallContext::with_incoming(incoming);

        let mut span = TracingTracer.start_span(&ctx, "/a.B/C");
        assert_eq!(span.trace_id(), "abc123");
        span.set_tag("error", "true");
        span.set_tag("peer", "10.0.0.1");
        span.finish();
    }
}
