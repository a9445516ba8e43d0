//! Logging middleware: one structured record per call.
//!
//! Successful calls log at info level with the method and duration. Failed
//! calls log at error level and add the error kind, code and message. A call
//! whose handler panics or whose future is dropped mid-flight still logs once,
//! at error level with `error_kind` set to `panic` or `cancelled`. Request and
//! response payloads are never logged.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::FutureExt;
use ringfence_core::Code;
use serde_json::{json, Map, Value};
use tower::{Layer, Service};

use crate::observability::{CallLogger, LogLevel};
use crate::service::call::{CallError, CallFuture, UnaryCall};

// ---------------------------------------------------------------------------
// LoggingLayer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LoggingLayer {
    logger: Arc<dyn CallLogger>,
}

impl LoggingLayer {
    #[must_use]
    pub fn new(logger: Arc<dyn CallLogger>) -> Self {
        Self { logger }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            logger: Arc::clone(&self.logger),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingService
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LoggingService<S> {
    inner: S,
    logger: Arc<dyn CallLogger>,
}

impl<S, Req> Service<UnaryCall<Req>> for LoggingService<S>
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
        let mut record = CallRecord {
            logger: Some(Arc::clone(&self.logger)),
            method: call.info.full_method().to_owned(),
            trace_id: call.ctx.trace_id.clone(),
            start: Instant::now(),
        };
        let fut = self.inner.call(call);

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => {
                    match &result {
                        Ok(_) => record.emit(None),
                        Err(err) => {
                            record.emit(Some((err.kind(), err.code(), err.to_string())));
                        }
                    }
                    result
                }
                Err(panic) => {
                    record.emit(Some(("panic", Code::Internal, "handler panicked".into())));
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}

/// Emits the call's single log record. Logs a cancellation when dropped
/// before `emit`.
struct CallRecord {
    logger: Option<Arc<dyn CallLogger>>,
    method: String,
    trace_id: Option<String>,
    start: Instant,
}

impl CallRecord {
    fn emit(&mut self, error: Option<(&str, Code, String)>) {
        let Some(logger) = self.logger.take() else {
            return;
        };

        let mut fields = Map::new();
        fields.insert("method".into(), json!(self.method));
        fields.insert(
            "duration_ms".into(),
            json!(self.start.elapsed().as_secs_f64() * 1000.0),
        );
        if let Some(trace_id) = &self.trace_id {
            fields.insert("trace_id".into(), json!(trace_id));
        }

        match error {
            None => logger.log(LogLevel::Info, "request", &fields),
            Some((kind, code, message)) => {
                fields.insert("error_kind".into(), json!(kind));
                fields.insert("code".into(), json!(code.as_str()));
                fields.insert("error".into(), Value::String(message));
                logger.log(LogLevel::Error, "request failed", &fields);
            }
        }
    }
}

impl Drop for CallRecord {
    fn drop(&mut self) {
        self.emit(Some((
            "cancelled",
            Code::Cancelled,
            "call dropped before completion".into(),
        )));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
