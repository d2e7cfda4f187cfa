use async_trait::async_trait;
use chrono::Utc;
use moka::Expiry;
use moka::future::Cache;
use std::time::{Duration, Instant};
use tracing::trace;

use super::{CacheEntry, CacheStore, Result};

/// In-process store backed by Moka, honouring each entry's own TTL
#[derive(Debug, Clone)]
pub struct MemoryStore {
    cache: Cache<String, CacheEntry>,
}

struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &CacheEntry, _created_at: Instant) -> Option<Duration> {
        Some(entry.remaining(Utc::now()))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.remaining(Utc::now()))
    }
}

impl MemoryStore {
    /// # Arguments
    ///
    /// * `max_capacity` - Maximum number of entries held before eviction
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        Self { cache }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.cache.get(key).await {
            Some(entry) if !entry.is_expired(Utc::now()) => Ok(Some(entry.payload)),
            Some(_) => {
                trace!(key, "Entry expired before eviction");
                self.cache.invalidate(key).await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(key, payload, ttl);
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }
}
