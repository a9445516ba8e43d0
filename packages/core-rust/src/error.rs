//! Construction-time and validation error types.

use std::time::Duration;

/// Invalid settings detected while constructing a limiter or breaker.
///
/// Configuration errors are fatal: the affected component is never built, so
/// no call can be admitted under a half-valid configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("token bucket capacity must be positive")]
    ZeroCapacity,
    #[error("token bucket period must be non-zero")]
    ZeroPeriod,
    #[error("refill interval for period {period:?} over capacity {capacity} rounds down to zero")]
    RefillIntervalTooShort { period: Duration, capacity: u32 },
    #[error("failure ratio threshold must be within (0, 1], got {0}")]
    FailureRatio(f64),
    #[error("minimum sample size must be at least 1")]
    ZeroMinSamples,
    #[error("consecutive failure threshold must be at least 1")]
    ZeroConsecutiveFailures,
    #[error("open timeout must be non-zero")]
    ZeroOpenTimeout,
    #[error("half-open probe budget must be at least 1")]
    ZeroHalfOpenRequests,
    #[error("rolling interval must be non-zero when set")]
    ZeroInterval,
}

/// A request rejected by its own `Validate` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", self.render())]
pub struct ValidationError {
    /// Offending field, when the failure is attributable to one.
    pub field: Option<String>,
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    fn render(&self) -> String {
        match &self.field {
            Some(field) => format!("invalid {field}: {}", self.message),
            None => self.message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display_includes_field() {
        let err = ValidationError::for_field("name", "must not be empty");
        assert_eq!(err.to_string(), "invalid name: must not be empty");

        let err = ValidationError::new("payload too large");
        assert_eq!(err.to_string(), "payload too large");
    }

    #[test]
    fn refill_interval_error_mentions_inputs() {
        let err = ConfigError::RefillIntervalTooShort {
            period: Duration::from_nanos(3),
            capacity: 10,
        };
        let text = err.to_string();
        assert!(text.contains("3ns"), "{text}");
        assert!(text.contains("10"), "{text}");
    }
}
