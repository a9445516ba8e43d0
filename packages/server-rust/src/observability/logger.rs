//! Structured call logger collaborator.

use serde_json::{Map, Value};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Emits one structured record per call.
pub trait CallLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: &Map<String, Value>);
}

/// Default logger forwarding to `tracing` events, fields rendered as JSON.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger;

impl CallLogger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: &Map<String, Value>) {
        let fields = serde_json::to_string(fields).unwrap_or_default();
        match level {
            LogLevel::Debug => tracing::debug!(%fields, "{message}"),
            LogLevel::Info => tracing::info!(%fields, "{message}"),
            LogLevel::Warn => tracing::warn!(%fields, "{message}"),
            LogLevel::Error => tracing::error!(%fields, "{message}"),
        }
    }
}
