//! Metrics collaborator: request/response counters and a latency histogram.

use std::fmt;

use dashmap::DashMap;

/// Outcome label attached to response metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallOutcome {
    Success,
    Error,
}

impl CallOutcome {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn of<T, E>(result: &Result<T, E>) -> Self {
        if result.is_ok() {
            Self::Success
        } else {
            Self::Error
        }
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorder for per-call metrics. Implementations must not fail the call.
pub trait MetricsSink: Send + Sync {
    fn inc_requests(&self, method: &str);
    fn inc_responses(&self, outcome: CallOutcome, method: &str);
    fn observe_latency(&self, outcome: CallOutcome, method: &str, seconds: f64);
}

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

pub const REQUESTS_TOTAL: &str = "rpc_requests_total";
pub const RESPONSES_TOTAL: &str = "rpc_responses_total";
pub const RESPONSE_TIME_SECONDS: &str = "rpc_response_time_seconds";

/// Sink that emits through the `metrics` facade to whichever recorder is
/// installed (e.g. the Prometheus exporter). A no-op without a recorder.
#[derive(Debug, Clone, Default)]
pub struct RecorderSink;

impl RecorderSink {
    /// Registers metric descriptions with the installed recorder.
    pub fn describe() {
        metrics::describe_counter!(REQUESTS_TOTAL, "Unary calls received");
        metrics::describe_counter!(RESPONSES_TOTAL, "Unary calls completed, by outcome");
        metrics::describe_histogram!(
            RESPONSE_TIME_SECONDS,
            metrics::Unit::Seconds,
            "Unary call latency, by outcome"
        );
    }
}

impl MetricsSink for RecorderSink {
    fn inc_requests(&self, method: &str) {
        metrics::counter!(REQUESTS_TOTAL, "method" => method.to_owned()).increment(1);
    }

    fn inc_responses(&self, outcome: CallOutcome, method: &str) {
        metrics::counter!(
            RESPONSES_TOTAL,
            "outcome" => outcome.as_str(),
            "method" => method.to_owned()
        )
        .increment(1);
    }

    fn observe_latency(&self, outcome: CallOutcome, method: &str, seconds: f64) {
        metrics::histogram!(
            RESPONSE_TIME_SECONDS,
            "outcome" => outcome.as_str(),
            "method" => method.to_owned()
        )
        .record(seconds);
    }
}

// ---------------------------------------------------------------------------
// InMemoryMetrics
// ---------------------------------------------------------------------------

/// Sink that keeps everything in memory. Used by tests and the demo summary.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    requests: DashMap<String, u64>,
    responses: DashMap<(CallOutcome, String), u64>,
    latencies: DashMap<(CallOutcome, String), Vec<f64>>,
}

/// Aggregated view of one method's calls.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSummary {
    pub method: String,
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
    pub mean_latency_seconds: Option<f64>,
}

impl InMemoryMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn requests(&self, method: &str) -> u64 {
        self.requests.get(method).map_or(0, |v| *v)
    }

    #[must_use]
    pub fn responses(&self, outcome: CallOutcome, method: &str) -> u64 {
        self.responses
            .get(&(outcome, method.to_owned()))
            .map_or(0, |v| *v)
    }

    #[must_use]
    pub fn latencies(&self, outcome: CallOutcome, method: &str) -> Vec<f64> {
        self.latencies
            .get(&(outcome, method.to_owned()))
            .map(|v| v.value().clone())
            .unwrap_or_default()
    }

    /// Per-method summary, sorted by method name.
    #[must_use]
    pub fn summary(&self) -> Vec<MethodSummary> {
        let mut out: Vec<MethodSummary> = self
            .requests
            .iter()
            .map(|entry| {
                let method = entry.key().clone();
                let samples: Vec<f64> = [CallOutcome::Success, CallOutcome::Error]
                    .into_iter()
                    .flat_map(|o| self.latencies(o, &method))
                    .collect();
                #[allow(clippy::cast_precision_loss)]
                let mean = (!samples.is_empty())
                    .then(|| samples.iter().sum::<f64>() / samples.len() as f64);
                MethodSummary {
                    requests: *entry.value(),
                    successes: self.responses(CallOutcome::Success, &method),
                    errors: self.responses(CallOutcome::Error, &method),
                    mean_latency_seconds: mean,
                    method,
                }
            })
            .collect();
        out.sort_by(|a, b| a.method.cmp(&b.method));
        out
    }
}

impl MetricsSink for InMemoryMetrics {
    fn inc_requests(&self, method: &str) {
        *self.requests.entry(method.to_owned()).or_insert(0) += 1;
    }

    fn inc_responses(&self, outcome: CallOutcome, method: &str) {
        *self
            .responses
            .entry((outcome, method.to_owned()))
            .or_insert(0) += 1;
    }

    fn observe_latency(&self, outcome: CallOutcome, method: &str, seconds: f64) {
        self.latencies
            .entry((outcome, method.to_owned()))
            .or_default()
            .push(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_counts_by_method_and_outcome() {
        let m = InMemoryMetrics::new();
        m.inc_requests("/a.B/C");
        m.inc_requests("/a.B/C");
        m.inc_responses(CallOutcome::Success, "/a.B/C");
        m.inc_responses(CallOutcome::Error, "/a.B/C");
        m.observe_latency(CallOutcome::Success, "/a.B/C", 0.25);
        m.observe_latency(CallOutcome::Error, "/a.B/C", 0.75);

        assert_eq!(m.requests("/a.B/C"), 2);
        assert_eq!(m.requests("/other"), 0);
        assert_eq!(m.responses(CallOutcome::Success, "/a.B/C"), 1);
        assert_eq!(m.latencies(CallOutcome::Error, "/a.B/C"), vec![0.75]);

        let summary = m.summary();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].errors, 1);
        assert_eq!(summary[0].mean_latency_seconds, Some(0.5));
    }

    #[test]
    fn recorder_sink_without_recorder_is_noop() {
        let sink = RecorderSink;
        RecorderSink::describe();
        sink.inc_requests("/a.B/C");
        sink.inc_responses(CallOutcome::Error, "/a.B/C");
        sink.observe_latency(CallOutcome::Error, "/a.B/C", 0.1);
    }

    #[test]
    fn outcome_of_result() {
        assert_eq!(CallOutcome::of(&Ok::<(), ()>(())), CallOutcome::Success);
        assert_eq!(CallOutcome::of(&Err::<(), ()>(())), CallOutcome::Error);
        assert_eq!(CallOutcome::Error.to_string(), "error");
    }
}
