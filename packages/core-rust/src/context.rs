//! Per-call context carried through every interceptor.
//!
//! A [`CallContext`] holds the incoming request metadata, the metadata to be
//! attached to any downstream calls the handler makes, the correlation id
//! assigned by the tracing unit, and a shared handle to the response headers.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Metadata key under which the correlation (trace) identifier travels.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Case-insensitive key/value metadata attached to a call.
///
/// Keys are normalised to lowercase on insert and lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previous value for the key if any.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), value.into())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&key.to_ascii_lowercase())
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut md = Self::new();
        for (k, v) in iter {
            md.insert(k, v);
        }
        md
    }
}

/// Response headers shared between the pipeline and whoever issued the call.
///
/// Headers written here are visible to the caller regardless of whether the
/// call eventually succeeds or fails, the way transport-level headers are sent
/// ahead of the response body.
#[derive(Debug, Clone, Default)]
pub struct ResponseHeaders(Arc<Mutex<Metadata>>);

impl ResponseHeaders {
    pub fn insert(&self, key: impl AsRef<str>, value: impl Into<String>) {
        self.0.lock().insert(key, value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.0.lock().get(key).map(str::to_owned)
    }

    /// Returns a copy of the headers written so far.
    #[must_use]
    pub fn snapshot(&self) -> Metadata {
        self.0.lock().clone()
    }
}

/// Context threaded through every unit of the pipeline for a single call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Metadata received with the call.
    pub incoming: Metadata,
    /// Metadata to propagate on downstream calls made by the handler.
    pub outgoing: Metadata,
    /// Correlation identifier, set by the tracing unit.
    pub trace_id: Option<String>,
    response_headers: ResponseHeaders,
}

impl CallContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_incoming(incoming: Metadata) -> Self {
        Self {
            incoming,
            ..Self::default()
        }
    }

    /// Handle to the response headers; clone it before invoking the pipeline
    /// to read the headers after the call finishes.
    #[must_use]
    pub fn response_headers(&self) -> &ResponseHeaders {
        &self.response_headers
    }
}

/// Static description of the call being executed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallInfo {
    full_method: String,
}

impl CallInfo {
    /// Creates call info from a full method name such as `/billing.Ledger/Post`.
    #[must_use]
    pub fn new(full_method: impl Into<String>) -> Self {
        Self {
            full_method: full_method.into(),
        }
    }

    #[must_use]
    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    /// Service part of the full method (`billing.Ledger`), if present.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        let trimmed = self.full_method.trim_start_matches('/');
        trimmed
            .rsplit_once('/')
            .map(|(service, _)| service)
            .filter(|s| !s.is_empty())
    }

    /// Method part of the full method (`Post`).
    #[must_use]
    pub fn method(&self) -> &str {
        let trimmed = self.full_method.trim_start_matches('/');
        trimmed
            .rsplit_once('/')
            .map_or(trimmed, |(_, method)| method)
    }
}
