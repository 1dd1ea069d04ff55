//! Configuration management for Bouncer.
//!
//! Configuration is resolved once at startup from three layers, later layers
//! winning: built-in defaults, an optional YAML file, and `BOUNCER__*`
//! environment variables (`BOUNCER__RATE_LIMITING__DEFAULT_LIMIT=20`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use tracing::info;

use crate::error::{BouncerError, Result};
use crate::ratelimit::ApiKeyTable;

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "BOUNCER";

/// Longest accepted blacklist penalty (one year).
pub const MAX_BLOCKED_TIME_SECS: u64 = 365 * 24 * 60 * 60;

/// Main configuration for the Bouncer service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BouncerConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Counting store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// What to do with a request presenting an API key missing from the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownKeyPolicy {
    /// Reject with 401 Invalid API Key.
    #[default]
    Reject,
    /// Ignore the key and limit the caller by client IP.
    FallbackToIp,
}

/// What to do when a violation is detected but the penalty cannot be stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistWriteFailure {
    /// Log the failure and still answer 429.
    #[default]
    KeepVerdict,
    /// Answer 500 for the current request.
    InternalError,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests per second allowed for callers without an API key
    #[serde(default = "default_limit")]
    pub default_limit: i64,

    /// Blacklist penalty in seconds, armed when a caller exceeds its limit
    #[serde(default = "default_blocked_time")]
    pub blocked_time_secs: u64,

    /// Requests per second for each registered API key
    #[serde(default)]
    pub api_keys: ApiKeyTable,

    #[serde(default)]
    pub unknown_key_policy: UnknownKeyPolicy,

    #[serde(default)]
    pub blacklist_write_failure: BlacklistWriteFailure,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            blocked_time_secs: default_blocked_time(),
            api_keys: ApiKeyTable::default(),
            unknown_key_policy: UnknownKeyPolicy::default(),
            blacklist_write_failure: BlacklistWriteFailure::default(),
        }
    }
}

fn default_limit() -> i64 {
    10
}

fn default_blocked_time() -> u64 {
    300
}

/// Counting store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Process-local store; counters are not shared between instances.
    Memory,
}

/// Counting store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis address, either `host:port` or a `redis://` URL
    #[serde(default = "default_redis_addr")]
    pub redis_addr: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_addr: default_redis_addr(),
        }
    }
}

fn default_redis_addr() -> String {
    "localhost:6379".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

impl BouncerConfig {
    /// Load configuration from an optional YAML file layered under
    /// `BOUNCER__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }

        let config: BouncerConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, ignoring the environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BouncerConfig = serde_yaml::from_str(yaml)
            .map_err(|e| BouncerError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the rate limiter cannot honour.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if rl.default_limit < 0 {
            return Err(BouncerError::Config(format!(
                "default_limit must not be negative, got {}",
                rl.default_limit
            )));
        }
        if rl.blocked_time_secs > MAX_BLOCKED_TIME_SECS {
            return Err(BouncerError::Config(format!(
                "blocked_time_secs must be at most {}, got {}",
                MAX_BLOCKED_TIME_SECS, rl.blocked_time_secs
            )));
        }
        for (key, limit) in rl.api_keys.iter() {
            if key.is_empty() {
                return Err(BouncerError::Config("API keys must not be empty".to_string()));
            }
            if limit < 0 {
                return Err(BouncerError::Config(format!(
                    "limit for API key {} must not be negative, got {}",
                    key, limit
                )));
            }
        }
        Ok(())
    }
}
