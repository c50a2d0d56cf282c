//! Screener configuration.
//!
//! Loaded from YAML or JSON. Every field has a default, so an empty file (or
//! no file at all) yields a runnable configuration that uses the OpenAI
//! provider with `OPENAI_API_KEY` and the built-in marketplace policy.
//!
//! ```yaml
//! provider:
//!   type: anthropic
//!   base_url: https://api.anthropic.com/v1
//! completion:
//!   model: claude-sonnet-4-5
//!   timeout: 90s
//! batching:
//!   initial_batch_size: 25
//!   max_concurrency: 4
//!   max_retries: 2
//! cache:
//!   enabled: true
//!   ttl: 1h
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use screener_core::{BatchSize, Policy, PolicyError};

use crate::providers::CompletionConfig;

/// Serde adapter for `Duration` as a humantime string ("60s", "1h 30m").
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    pub provider: ProviderSection,
    pub completion: CompletionConfig,
    pub batching: BatchingConfig,
    pub cache: CacheConfig,
    pub output: OutputConfig,

    /// Custom policy document; the built-in marketplace policy when absent
    pub policy_path: Option<PathBuf>,
}

/// Which oracle provider to build, plus its provider-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(rename = "type")]
    pub kind: String,

    /// Everything else in the section, handed to the provider factory
    #[serde(flatten)]
    pub settings: Map<String, JsonValue>,
}

impl ProviderSection {
    pub fn settings_json(&self) -> JsonValue {
        JsonValue::Object(self.settings.clone())
    }
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            kind: "openai".to_string(),
            settings: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub initial_batch_size: BatchSize,
    pub reverify_batch_size: BatchSize,

    /// Oracle calls in flight at once; 1 means strictly sequential
    pub max_concurrency: usize,

    /// Extra attempts for a window after a retryable oracle error
    pub max_retries: usize,

    #[serde(with = "humantime_serde")]
    pub retry_min_delay: Duration,

    /// Stop dispatching new windows once this many tokens have been spent
    pub token_budget: Option<u64>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: BatchSize::DEFAULT,
            reverify_batch_size: BatchSize::DEFAULT,
            max_concurrency: 1,
            max_retries: 0,
            retry_min_delay: Duration::from_secs(1),
            token_budget: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: u64,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_entries: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving `<asin>_noncompliant_reviews.json`
    pub directory: PathBuf,

    /// JSON-lines file receiving published SKU results
    pub publish_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("nc_reviews"),
            publish_path: None,
        }
    }
}

impl ScreenerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Reject values that would make a run impossible.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.kind.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.type must not be empty".into()));
        }
        if self.batching.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "batching.max_concurrency must be at least 1".into(),
            ));
        }
        if self.completion.timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "completion.timeout must be greater than zero".into(),
            ));
        }
        if self.completion.model.trim().is_empty() {
            return Err(ConfigError::Invalid("completion.model must not be empty".into()));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_entries must be at least 1 when the cache is enabled".into(),
            ));
        }
        Ok(())
    }

    /// The configured policy, or the built-in marketplace policy.
    pub fn load_policy(&self) -> Result<Policy, ConfigError> {
        match &self.policy_path {
            Some(path) => Ok(Policy::from_file(path)?),
            None => Ok(Policy::marketplace_default()),
        }
    }
}
