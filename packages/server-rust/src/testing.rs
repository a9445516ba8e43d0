//! Recording collaborators and request types shared by the layer tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use ringfence_core::{
    CallContext, CallInfo, Message, Status, Validate, ValidationError, TRACE_ID_HEADER,
};
use serde_json::{Map, Value};
use tower::Service;

use crate::observability::{CallLogger, CallSpan, LogLevel, Tracer};
use crate::service::call::{CallError, CallFuture, UnaryCall};

// ---------------------------------------------------------------------------
// RecordingTracer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSpan {
    pub name: String,
    pub trace_id: String,
    pub tags: Vec<(String, String)>,
}

impl FinishedSpan {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    started: Arc<AtomicUsize>,
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl RecordingTracer {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.finished.lock().clone()
    }
}

impl Tracer for RecordingTracer {
    fn start_span(&self, ctx: &CallContext, name: &str) -> Box<dyn CallSpan> {
        let n = self.started.fetch_add(1, Ordering::SeqCst);
        let trace_id = ctx
            .incoming
            .get(TRACE_ID_HEADER)
            .map_or_else(|| format!("trace-{n}"), str::to_owned);
        Box::new(RecordingSpan {
            name: name.to_owned(),
            trace_id,
            tags: Vec::new(),
            sink: Arc::clone(&self.finished),
        })
    }
}

struct RecordingSpan {
    name: String,
    trace_id: String,
    tags: Vec<(String, String)>,
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl CallSpan for RecordingSpan {
    fn trace_id(&self) -> &str {
        &self.trace_id
    }

    fn set_tag(&mut self, key: &str, value: &str) {
        self.tags.push((key.to_owned(), value.to_owned()));
    }

    fn finish(self: Box<Self>) {
        let span = *self;
        span.sink.lock().push(FinishedSpan {
            name: span.name,
            trace_id: span.trace_id,
            tags: span.tags,
        });
    }
}

// ---------------------------------------------------------------------------
// RecordingLogger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingLogger {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl RecordingLogger {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }
}

impl CallLogger for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &Map<String, Value>) {
        self.records.lock().push(LogRecord {
            level,
            message: message.to_owned(),
            fields: fields.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Requests and handlers
// ---------------------------------------------------------------------------

/// Request that validates its own amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub amount: i64,
}

impl Validate for Transfer {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.amount <= 0 {
            return Err(ValidationError::for_field("amount", "must be positive"));
        }
        Ok(())
    }
}

impl Message for Transfer {
    fn validator(&self) -> Option<&dyn Validate> {
        Some(self)
    }
}

pub const TRANSFER: &str = "/billing.Ledger/Transfer";

pub fn transfer(amount: i64) -> UnaryCall<Transfer> {
    UnaryCall::new(CallContext::new(), Transfer { amount }, CallInfo::new(TRANSFER))
}

/// Terminal service that counts invocations and fails for amounts above 1000.
#[derive(Debug, Clone, Default)]
pub struct CountingHandler {
    hits: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Service<UnaryCall<Transfer>> for CountingHandler {
    type Response = i64;
    type Error = CallError;
    type Future = CallFuture<i64>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: UnaryCall<Transfer>) -> Self::Future {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let amount = call.request.amount;
        Box::pin(async move {
            if amount > 1000 {
                Err(CallError::Handler(Status::unavailable("ledger backend down")))
            } else {
                Ok(amount)
            }
        })
    }
}
