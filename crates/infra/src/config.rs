//! Storage configuration.
//!
//! Configuration is an explicit value owned by the caller and handed to the
//! components that need it. Nothing here is process-global.

use std::time::Duration;

use thiserror::Error;

pub const ENV_DATABASE_URL: &str = "ADDRESS_STORE_DATABASE_URL";
pub const ENV_MAX_CONNECTIONS: &str = "ADDRESS_STORE_MAX_CONNECTIONS";
pub const ENV_ACQUIRE_TIMEOUT_SECS: &str = "ADDRESS_STORE_ACQUIRE_TIMEOUT_SECS";
pub const ENV_FAN_OUT_CONCURRENCY: &str = "ADDRESS_STORE_FAN_OUT_CONCURRENCY";

/// Configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration key {0} is empty")]
    Empty(&'static str),

    #[error("configuration key {0} is zero")]
    Zero(&'static str),

    #[error("configuration key {key} is not a valid number: {value}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Address store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Connection string for the backing store.
    pub database_url: String,
    /// Connection pool size.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// Maximum statements in flight for one fan-out.
    pub fan_out_concurrency: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/address".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            fan_out_concurrency: 32,
        }
    }
}

impl StoreConfig {
    /// Load from the process environment.
    ///
    /// Unset variables keep their defaults; set variables override them.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, tests, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_DATABASE_URL) {
            config.database_url = url;
        }
        if let Some(raw) = lookup(ENV_MAX_CONNECTIONS) {
            config.max_connections = parse_number(ENV_MAX_CONNECTIONS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ACQUIRE_TIMEOUT_SECS) {
            config.acquire_timeout =
                Duration::from_secs(parse_number(ENV_ACQUIRE_TIMEOUT_SECS, &raw)?);
        }
        if let Some(raw) = lookup(ENV_FAN_OUT_CONCURRENCY) {
            config.fan_out_concurrency = parse_number(ENV_FAN_OUT_CONCURRENCY, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_fan_out_concurrency(mut self, concurrency: usize) -> Self {
        self.fan_out_concurrency = concurrency;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Empty(ENV_DATABASE_URL));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Zero(ENV_MAX_CONNECTIONS));
        }
        if self.acquire_timeout.is_zero() {
            return Err(ConfigError::Zero(ENV_ACQUIRE_TIMEOUT_SECS));
        }
        if self.fan_out_concurrency == 0 {
            return Err(ConfigError::Zero(ENV_FAN_OUT_CONCURRENCY));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Empty(key));
    }
    trimmed.parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: raw.to_string(),
    })
}
