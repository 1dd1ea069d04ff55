//! Counting store trait for abstracting Redis and in-memory implementations.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;

/// Lifetime of a request counter, measured from its first increment.
pub const COUNTER_WINDOW: Duration = Duration::from_secs(1);

/// Value written under a blacklist key.
pub const BLACKLIST_MARKER: &str = "Too many requests";

/// Key-value store with an atomic windowed counter.
///
/// This is the only shared mutable state of the rate limiter, so
/// implementations must make `increment_with_window_expiry` atomic across
/// concurrent callers, processes and hosts that share the store.
#[async_trait]
pub trait CountingStore: Send + Sync {
    /// Read a value. `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally write `value` with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically increment the integer at `key` and return the new value.
    ///
    /// An absent key counts from zero. When the result is 1 the key must also
    /// be given a [`COUNTER_WINDOW`] expiry; if that fails the error is
    /// [`StoreError::ExpiryNotArmed`] carrying `count: 1`. Later increments
    /// in the same window never touch the expiry.
    async fn increment_with_window_expiry(&self, key: &str) -> Result<i64, StoreError>;
}
