//! Configuration loader and validator for the housetraining tracker.
use crate::retry::RetryPolicy;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub backend: Backend,
    #[serde(default)]
    pub retry: Retry,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Seconds a cached stats summary stays valid.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
}

/// Remote relational backend (PostgREST-compatible) settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Backend {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Backoff settings for remote writes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Retry {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub batch_concurrency: usize,
}

fn default_timeout_seconds() -> u64 {
    15
}

fn default_cache_ttl_seconds() -> u64 {
    60
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_jitter_ms: 1_000,
            batch_concurrency: 5,
        }
    }
}

impl Retry {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}

impl App {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// SQLite URL of the local view cache. `CACHE_DATABASE_URL` wins when set.
    pub fn cache_database_url(&self) -> String {
        std::env::var("CACHE_DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}/cache.db",
                self.app.data_dir.trim_end_matches('/')
            )
        })
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.cache_ttl_seconds == 0 {
        return Err(ConfigError::Invalid("app.cache_ttl_seconds must be > 0"));
    }

    if cfg.backend.url.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.url must be non-empty"));
    }
    if Url::parse(cfg.backend.url.trim()).is_err() {
        return Err(ConfigError::Invalid("backend.url must be an absolute URL"));
    }
    if cfg.backend.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("backend.api_key must be non-empty"));
    }
    if cfg.backend.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("backend.timeout_seconds must be > 0"));
    }

    if cfg.retry.initial_delay_ms > cfg.retry.max_delay_ms {
        return Err(ConfigError::Invalid(
            "retry.initial_delay_ms must not exceed retry.max_delay_ms",
        ));
    }
    if cfg.retry.batch_concurrency == 0 {
        return Err(ConfigError::Invalid("retry.batch_concurrency must be > 0"));
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  cache_ttl_seconds: 60

backend:
  url: "https://example.supabase.co"
  api_key: "YOUR_BACKEND_ANON_KEY"
  timeout_seconds: 15

retry:
  max_retries: 3
  initial_delay_ms: 1000
  max_delay_ms: 30000
  max_jitter_ms: 1000
  batch_concurrency: 5
"#
}
