use std::path::Path;

use anyhow::Context as _;
use ringfence_core::{BreakerSettings, ConfigError, RateLimitSettings, TokenBucket};
use serde::Deserialize;

/// Pipeline configuration: the settings of both stateful engines.
///
/// Every value is required; there is deliberately no `Default`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    pub rate_limit: RateLimitSettings,
    pub breaker: BreakerSettings,
}

impl PipelineConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed, a field is missing, or
    /// a value is out of range.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(raw).context("malformed pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its content is invalid.
    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("loading {}", path.display()))
    }

    /// # Errors
    ///
    /// Returns the first invalid setting of either engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        TokenBucket::from_settings(&self.rate_limit)?;
        self.breaker.validate()
    }
}
