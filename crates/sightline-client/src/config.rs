//! Backend connection configuration.
//!
//! Loaded from `SIGHTLINE_*` environment variables (see [`ClientConfig::from_env`]),
//! with every default taken from `sightline_core::defaults`.

use std::env;
use std::time::Duration;

use sightline_core::defaults;
use thiserror::Error;
use tracing::debug;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl From<ConfigError> for sightline_core::Error {
    fn from(e: ConfigError) -> Self {
        sightline_core::Error::Config(e.to_string())
    }
}

/// Connection settings for the activity backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server root, without trailing slash.
    pub server_url: String,
    /// Bearer token. Empty means unauthenticated, which the backend rejects.
    pub api_key: String,
    pub timeout_secs: u64,
    /// Idle connections kept per host.
    pub pool_capacity: usize,
    /// Total attempts per request.
    pub retry_total: u32,
    /// Base backoff; attempt `n` waits `backoff_ms * 2^(n-1)`.
    pub backoff_ms: u64,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            pool_capacity: defaults::POOL_CAPACITY,
            retry_total: defaults::RETRY_TOTAL,
            backoff_ms: defaults::RETRY_BACKOFF_MS,
        }
    }

    /// Load from the process environment.
    ///
    /// - `SIGHTLINE_SERVER_URL` (required)
    /// - `SIGHTLINE_API_KEY`
    /// - `SIGHTLINE_TIMEOUT_SECS` (30)
    /// - `SIGHTLINE_POOL_CAPACITY` (50)
    /// - `SIGHTLINE_RETRY_TOTAL` (3)
    /// - `SIGHTLINE_BACKOFF_MS` (300)
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("SIGHTLINE_SERVER_URL")
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::Missing("SIGHTLINE_SERVER_URL"))?;
        let api_key = lookup("SIGHTLINE_API_KEY").unwrap_or_default();

        let mut config = Self::new(server_url.trim(), api_key);
        if let Some(v) = parse_var(&lookup, "SIGHTLINE_TIMEOUT_SECS")? {
            config.timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SIGHTLINE_POOL_CAPACITY")? {
            config.pool_capacity = v;
        }
        if let Some(v) = parse_var(&lookup, "SIGHTLINE_RETRY_TOTAL")? {
            config.retry_total = v;
        }
        if let Some(v) = parse_var(&lookup, "SIGHTLINE_BACKOFF_MS")? {
            config.backoff_ms = v;
        }

        debug!(
            server_url = %config.server_url,
            timeout_secs = config.timeout_secs,
            pool_capacity = config.pool_capacity,
            retry_total = config.retry_total,
            "Loaded client config"
        );
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.server_url.is_empty() {
            return Err(ConfigError::Validation(
                "server_url cannot be empty".to_string(),
            ));
        }
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "server_url must start with http:// or https://, got: {}",
                self.server_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.pool_capacity == 0 {
            return Err(ConfigError::Validation(
                "pool_capacity must be greater than 0".to_string(),
            ));
        }
        if self.retry_total == 0 {
            return Err(ConfigError::Validation(
                "retry_total must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_retry(mut self, total: u32, backoff_ms: u64) -> Self {
        self.retry_total = total;
        self.backoff_ms = backoff_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Absolute URL for a path starting with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }
}

fn parse_var<F, T>(lookup: &F, key: &'static str) -> ConfigResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}
