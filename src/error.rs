//! Error types for the Bouncer service.

use thiserror::Error;

/// Main error type for Bouncer operations.
#[derive(Error, Debug)]
pub enum BouncerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors raised while layering configuration sources
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// Counting store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a counting store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The Redis server was unreachable or answered with an error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A value could not be interpreted as a counter
    #[error("Malformed value at {key}: {value:?}")]
    Malformed { key: String, value: String },

    /// The expiry lies beyond what the store can represent
    #[error("TTL of {ttl_secs}s for {key} is out of range")]
    TtlOutOfRange { key: String, ttl_secs: u64 },

    /// The increment succeeded but the window expiry could not be set.
    ///
    /// `count` is the post-increment value, so callers still know the
    /// request was counted.
    #[error("Counter {key} reached {count} but its expiry was not armed: {source}")]
    ExpiryNotArmed {
        key: String,
        count: i64,
        #[source]
        source: Box<StoreError>,
    },
}

/// Errors raised when resolving a caller's request limit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimitError {
    /// The presented API key is not registered
    #[error("API key is not registered")]
    UnknownApiKey,
}

/// Result type alias for Bouncer operations.
pub type Result<T> = std::result::Result<T, BouncerError>;
