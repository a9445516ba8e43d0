//! Tracing middleware: one span per call and correlation-id propagation.
//!
//! Starts a span named by the full method, stores the span's trace id in the
//! call context, the outgoing metadata and the response headers under
//! `x-trace-id`, and tags the span with `error` and `err` when the call fails.
//! The `err` tag carries the error kind and status code only; messages may
//! echo request data and are left to the logging unit. When the tracer is
//! backed by a `tracing` span, the downstream future is instrumented with it.
//! The span is finished on every exit path: success, error, panic inside the
//! downstream future, and cancellation (the call future dropped mid-flight).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use ringfence_core::TRACE_ID_HEADER;
use tower::{Layer, Service};
use tracing::Instrument;

use crate::observability::{CallSpan, Tracer};
use crate::service::call::{CallError, CallFuture, UnaryCall};

// ---------------------------------------------------------------------------
// TracingLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps each call in a tracer span.
#[derive(Clone)]
pub struct TracingLayer {
    tracer: Arc<dyn Tracer>,
}

impl TracingLayer {
    #[must_use]
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService {
            inner,
            tracer: Arc::clone(&self.tracer),
        }
    }
}

// ---------------------------------------------------------------------------
// TracingService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
    tracer: Arc<dyn Tracer>,
}

impl<S, Req> Service<UnaryCall<Req>> for TracingService<S>
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

    fn call(&mut self, mut call: UnaryCall<Req>) -> Self::Future {
        let span = self.tracer.start_span(&call.ctx, call.info.full_method());
        let trace_id = span.trace_id().to_owned();

        call.ctx.outgoing.insert(TRACE_ID_HEADER, trace_id.clone());
        call.ctx.response_headers().insert(TRACE_ID_HEADER, trace_id.clone());
        call.ctx.trace_id = Some(trace_id);

        let current = span.tracing_span().unwrap_or_else(tracing::Span::none);
        let mut guard = SpanGuard { span: Some(span) };
        let fut = current.in_scope(|| self.inner.call(call));

        Box::pin(async move {
            match AssertUnwindSafe(fut.instrument(current)).catch_unwind().await {
                Ok(Ok(resp)) => {
                    guard.finish();
                    Ok(resp)
                }
                Ok(Err(err)) => {
                    guard.tag("error", "true");
                    guard.tag("err", &format!("{}: {}", err.kind(), err.code().as_str()));
                    guard.finish();
                    Err(err)
                }
                Err(panic) => {
                    guard.tag("error", "true");
                    guard.tag("err", "panic");
                    guard.finish();
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}

/// Finishes the span when dropped, so a cancelled call still closes it.
struct SpanGuard {
    span: Option<Box<dyn CallSpan>>,
}

impl SpanGuard {
    fn tag(&mut self, key: &str, value: &str) {
        if let Some(span) = self.span.as_mut() {
            span.set_tag(key, value);
        }
    }

    fn finish(&mut self) {
        if let Some(span) = self.span.take() {
            span.finish();
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Some(mut span) = self.span.take() {
            span.set_tag("cancelled", "true");
            span.finish();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
