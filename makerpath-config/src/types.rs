//! Typed configuration for hosts embedding the Maker Path engine

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Base URL used when nothing else is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MakerPathConfig {
    /// Backing store connection
    pub backend: BackendConfig,
    /// Tracing setup
    pub logging: LoggingConfig,
}

impl MakerPathConfig {
    /// Check values figment cannot check through types alone
    pub fn validate(&self) -> ConfigResult<()> {
        let base_url = self.backend.base_url.trim();
        if base_url.is_empty() {
            return Err(ConfigError::invalid_value(
                "backend.base_url",
                "must not be empty",
            ));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::invalid_value(
                "backend.base_url",
                format!("'{base_url}' is not an http(s) URL"),
            ));
        }
        if self.backend.timeout_secs == Some(0) {
            return Err(ConfigError::invalid_value(
                "backend.timeout_secs",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

/// Where the path, variable and progress endpoints live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Prefix for `/paths`, `/variables` and `/progress`
    pub base_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Request timeout; requests wait indefinitely when unset
    pub timeout_secs: Option<u64>,
}

impl BackendConfig {
    /// Timeout as a [`Duration`]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            timeout_secs: None,
        }
    }
}

/// Tracing subscriber settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: makerpath_common::DEFAULT_LOG_FILTER.to_string(),
        }
    }
}
