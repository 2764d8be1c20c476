//! # Configuration
//!
//! Environment-aware engine configuration. Defaults are embedded, a YAML file
//! can override them, and environment variables win over both — the same
//! precedence order the deployment tooling assumes.

use crate::constants::defaults;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database_url: String,
    pub queue_name: String,
    pub batch: BatchConfig,
    pub poll: PollConfig,
    pub webhook: WebhookConfig,
}

/// Batch scheduler tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items dispatched per chunk run.
    pub chunk_size: usize,
    /// Seconds between chunk runs.
    pub chunk_delay_secs: u64,
}

/// Retry/poll helper tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Attempt ceiling applied when a rescheduling step supplies none.
    pub max_attempts: u32,
    /// Seconds between attempts when the step supplies no delay.
    pub delay_secs: u64,
}

/// Webhook trigger surface tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Fixed-window rate limit: requests per window.
    pub rate_max: u32,
    /// Fixed-window rate limit: window length in seconds.
    pub rate_window_secs: u64,
    /// Per-pipeline bearer tokens, keyed by pipeline (owner_ref).
    pub tokens: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/flowline_development".to_string(),
            queue_name: defaults::QUEUE_NAME.to_string(),
            batch: BatchConfig::default(),
            poll: PollConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: defaults::BATCH_CHUNK_SIZE,
            chunk_delay_secs: defaults::BATCH_CHUNK_DELAY_SECS,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_POLL_ATTEMPTS,
            delay_secs: defaults::POLL_DELAY_SECS,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            rate_max: defaults::WEBHOOK_RATE_MAX,
            rate_window_secs: defaults::WEBHOOK_RATE_WINDOW_SECS,
            tokens: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::ConfigurationError(format!(
                "Failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let mut config: EngineConfig = serde_yaml::from_str(&raw).map_err(|e| {
            EngineError::ConfigurationError(format!("Invalid config YAML: {e}"))
        })?;

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            self.database_url = db_url;
        }

        if let Ok(queue_name) = std::env::var("FLOWLINE_QUEUE_NAME") {
            self.queue_name = queue_name;
        }

        if let Ok(chunk_size) = std::env::var("FLOWLINE_BATCH_CHUNK_SIZE") {
            self.batch.chunk_size = chunk_size.parse().map_err(|e| {
                EngineError::ConfigurationError(format!("Invalid batch chunk_size: {e}"))
            })?;
        }

        if let Ok(max_attempts) = std::env::var("FLOWLINE_MAX_POLL_ATTEMPTS") {
            self.poll.max_attempts = max_attempts.parse().map_err(|e| {
                EngineError::ConfigurationError(format!("Invalid max_attempts: {e}"))
            })?;
        }

        Ok(())
    }

    /// Reject configurations the engine cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.batch.chunk_size == 0 {
            return Err(EngineError::ConfigurationError(
                "batch.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.poll.max_attempts == 0 {
            return Err(EngineError::ConfigurationError(
                "poll.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.webhook.rate_max == 0 || self.webhook.rate_window_secs == 0 {
            return Err(EngineError::ConfigurationError(
                "webhook rate limit requires a non-zero max and window".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.chunk_size, defaults::BATCH_CHUNK_SIZE);
        assert_eq!(config.poll.max_attempts, defaults::MAX_POLL_ATTEMPTS);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config = EngineConfig::default();
        config.batch.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "queue_name: custom_queue\nbatch:\n  chunk_size: 10\n  chunk_delay_secs: 5\nwebhook:\n  rate_max: 5\n  rate_window_secs: 10\n  tokens:\n    news_ingest: secret-token\n"
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.queue_name, "custom_queue");
        assert_eq!(config.batch.chunk_size, 10);
        assert_eq!(config.webhook.rate_max, 5);
        assert_eq!(
            config.webhook.tokens.get("news_ingest").map(String::as_str),
            Some("secret-token")
        );
        // Unspecified sections keep their defaults.
        assert_eq!(config.poll.max_attempts, defaults::MAX_POLL_ATTEMPTS);
    }
}
