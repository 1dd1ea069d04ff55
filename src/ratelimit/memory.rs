//! In-process counting store.
//!
//! Counters live in a sharded map and are only shared by tasks of this
//! process. Useful for single-instance deployments and local development.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::backend::{CountingStore, COUNTER_WINDOW};
use crate::error::StoreError;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn counter() -> Self {
        Self {
            value: "0".to_string(),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

/// A [`CountingStore`] backed by a [`DashMap`].
///
/// Increments run under the shard lock of their key, which makes them atomic
/// per key. Expired entries read as absent and are replaced lazily.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged = purged, "Purged expired entries");
        }
    }

    /// Periodically purge expired entries until the runtime shuts down.
    pub fn spawn_purge_task(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                self.purge_expired();
            }
        })
    }
}

#[async_trait]
impl CountingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone());
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        trace!(key = %key, ttl_secs = ttl.as_secs(), "Setting key");
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| StoreError::TtlOutOfRange {
                key: key.to_string(),
                ttl_secs: ttl.as_secs(),
            })?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn increment_with_window_expiry(&self, key: &str) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(Entry::counter);

        if entry.is_expired(now) {
            *entry = Entry::counter();
        }

        let count = entry
            .value
            .parse::<i64>()
            .ok()
            .and_then(|current| current.checked_add(1))
            .ok_or_else(|| StoreError::Malformed {
                key: key.to_string(),
                value: entry.value.clone(),
            })?;

        entry.value = count.to_string();
        if count == 1 {
            entry.expires_at = Some(now + COUNTER_WINDOW);
        }

        trace!(key = %key, count = count, "Incremented counter");
        Ok(count)
    }
}
