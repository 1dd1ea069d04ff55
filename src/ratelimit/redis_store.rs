//! Redis-backed counting store.
//!
//! Counters live in Redis so every Bouncer instance pointing at the same
//! server shares them. `INCR` provides the atomic increment; the window
//! expiry is armed with a follow-up `EXPIRE` on the request that created the
//! counter.

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::backend::{CountingStore, COUNTER_WINDOW};
use crate::error::StoreError;

/// A [`CountingStore`] speaking to Redis.
///
/// Generic over the connection so tests can script the server's replies.
/// Each operation clones the connection handle, which for
/// [`ConnectionManager`] shares one multiplexed socket.
#[derive(Clone)]
pub struct RedisStore<C = ConnectionManager> {
    connection: C,
}

impl RedisStore<ConnectionManager> {
    /// Connect to Redis at `addr`, either `host:port` or a full URL.
    pub async fn connect(addr: &str) -> crate::error::Result<Self> {
        let url = redis_url(addr);
        let client = redis::Client::open(url.as_str()).map_err(StoreError::from)?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(StoreError::from)?;
        info!(addr = %addr, "Connected to Redis");
        Ok(Self::new(connection))
    }
}

impl<C> RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync,
{
    pub fn new(connection: C) -> Self {
        Self { connection }
    }
}

/// Normalize a configured address into a connection URL.
fn redis_url(addr: &str) -> String {
    if addr.starts_with("redis://") || addr.starts_with("rediss://") || addr.starts_with("redis+unix://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

#[async_trait]
impl<C> CountingStore for RedisStore<C>
where
    C: ConnectionLike + Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        trace!(key = %key, found = value.is_some(), "GET");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        debug!(key = %key, ttl_secs = ttl.as_secs(), "SET with expiry");
        Ok(())
    }

    async fn increment_with_window_expiry(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        trace!(key = %key, count = count, "INCR");

        if count == 1 {
            let armed: Result<i64, redis::RedisError> = redis::cmd("EXPIRE")
                .arg(key)
                .arg(COUNTER_WINDOW.as_secs())
                .query_async(&mut conn)
                .await;
            if let Err(e) = armed {
                warn!(key = %key, error = %e, "Counter created but expiry not armed");
                return Err(StoreError::ExpiryNotArmed {
                    key: key.to_string(),
                    count,
                    source: Box::new(StoreError::Redis(e)),
                });
            }
        }

        Ok(count)
    }
}
