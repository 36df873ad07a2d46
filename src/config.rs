//! Configuration management for WebInsight.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{Result, WebInsightError};
use crate::ratelimit::{RateLimitPolicy, MAX_WINDOW_SECONDS};

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "WEBINSIGHT";
/// Connection string variable honored for the counter store.
const REDIS_URL_ENV: &str = "REDIS_URL";

/// Main configuration for the WebInsight service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebInsightConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub redis: RedisConfig,

    /// Rate limiting windows
    #[serde(default)]
    pub rate_limiting: RateLimitPolicy,

    /// Bearer token to user mapping
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 3000))
}

/// Networked counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL. When absent every counter lives in process memory.
    #[serde(default)]
    pub url: Option<String>,

    /// Upper bound for a single store round trip, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long to skip the store after a connection failure, in milliseconds
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    /// Prefix prepended to every counter key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl RedisConfig {
    /// Round trip timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reconnect backoff as a duration.
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_reconnect_backoff_ms() -> u64 {
    1000
}

fn default_key_prefix() -> String {
    "rate_limit".to_string()
}

/// Static bearer tokens recognized as authenticated users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token -> user id
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WebInsightConfig {
    /// Load configuration from an optional file, the environment and `REDIS_URL`.
    ///
    /// Later sources win: defaults, file, `WEBINSIGHT__SECTION__KEY` variables,
    /// then `REDIS_URL`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let redis_url = std::env::var(REDIS_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty());

        let config: WebInsightConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .set_override_option("redis.url", redis_url)?
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WebInsightConfig =
            serde_yaml::from_str(yaml).map_err(|e| WebInsightError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject window policies that are empty or longer than [`MAX_WINDOW_SECONDS`].
    pub fn validate(&self) -> Result<()> {
        for (name, window) in [
            ("hourly", &self.rate_limiting.hourly),
            ("daily", &self.rate_limiting.daily),
        ] {
            if window.window_seconds == 0 {
                return Err(WebInsightError::Config(format!(
                    "{} window must be longer than zero seconds",
                    name
                )));
            }
            if window.window_seconds > MAX_WINDOW_SECONDS {
                return Err(WebInsightError::Config(format!(
                    "{} window of {} seconds exceeds the maximum of {} seconds",
                    name, window.window_seconds, MAX_WINDOW_SECONDS
                )));
            }
        }
        Ok(())
    }
}
