use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, trace};

use super::{CacheError, CacheStore, Result};

/// Per-command deadline; a stalled Redis must not stall the request
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Redis-backed store using `SET key value EX ttl`
#[derive(Clone)]
pub struct RedisStore {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStore {
    pub fn new(conn: redis::aio::MultiplexedConnection) -> Self {
        Self { conn }
    }

    /// Open a multiplexed connection to `redis_url`
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("invalid redis url: {e}")))?;
        let conn = tokio::time::timeout(COMMAND_TIMEOUT, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CacheError::Unavailable(format!("connect to {redis_url} timed out")))?
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        debug!(redis_url, "Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        trace!(key, "GET");
        let mut conn = self.conn.clone();
        tokio::time::timeout(COMMAND_TIMEOUT, conn.get::<_, Option<String>>(key))
            .await
            .map_err(|_| CacheError::Unavailable("GET timed out".into()))?
            .map_err(|e| CacheError::Operation(e.to_string()))
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        trace!(key, ttl_secs = ttl.as_secs(), "SET EX");
        let mut conn = self.conn.clone();
        // EX has one-second granularity
        let seconds = ttl.as_secs().max(1);
        tokio::time::timeout(COMMAND_TIMEOUT, conn.set_ex::<_, _, ()>(key, payload, seconds))
            .await
            .map_err(|_| CacheError::Unavailable("SET timed out".into()))?
            .map_err(|e| CacheError::Operation(e.to_string()))
    }
}
