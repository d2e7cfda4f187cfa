//! Result cache
//!
//! Resolution results and preview metadata are stored as JSON under
//! namespaced, hashed keys. The backing store may fail at any time;
//! [`ResultCache`] turns every such failure into a miss (reads) or a no-op
//! (writes), so the cache can only ever make requests cheaper.

mod inflight;
mod memory;
mod redis_store;

pub use inflight::InFlight;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::normalizer::NormalizedUrl;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache serialization failed: {0}")]
    Serialization(String),
    #[error("cache operation failed: {0}")]
    Operation(String),
}

/// Raw key-value store with per-entry expiry
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Returns `Ok(None)` for absent or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> Result<()>;
}

/// Operation kind a cached payload belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Resolve,
    Og,
}

impl Namespace {
    pub fn tag(self) -> &'static str {
        match self {
            Namespace::Resolve => "resolve",
            Namespace::Og => "og",
        }
    }
}

/// A stored payload and the moment it stops being served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: String,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: String, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(3650));
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            key: key.into(),
            payload,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Derive the storage key for a normalized URL
///
/// Read and write paths must both go through here.
pub fn cache_key(prefix: &str, namespace: Namespace, url: &NormalizedUrl) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    format!("{prefix}{}:{}", namespace.tag(), hex::encode(digest))
}

/// Infallible front for a [`CacheStore`]
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_prefix(store, "")
    }

    pub fn with_prefix(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn key(&self, namespace: Namespace, url: &NormalizedUrl) -> String {
        cache_key(&self.prefix, namespace, url)
    }

    /// Raw lookup; backend errors read as a miss
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(hit) => {
                trace!(key, hit = hit.is_some(), "Cache lookup");
                hit
            }
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Raw store; backend errors are logged and dropped
    pub async fn set(&self, key: &str, payload: String, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        if let Err(e) = self.store.set(key, payload, ttl).await {
            warn!(key, error = %e, "Cache write failed, continuing uncached");
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, namespace: Namespace, url: &NormalizedUrl) -> Option<T> {
        let key = self.key(namespace, url);
        let payload = self.get(&key).await?;
        match serde_json::from_str(&payload) {
            Ok(value) => {
                debug!(%url, namespace = namespace.tag(), "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "Cached payload unreadable, treating as miss");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(
        &self,
        namespace: Namespace,
        url: &NormalizedUrl,
        value: &T,
        ttl: Duration,
    ) {
        let key = self.key(namespace, url);
        match serde_json::to_string(value) {
            Ok(payload) => {
                self.set(&key, payload, ttl).await;
                debug!(%url, namespace = namespace.tag(), ttl_secs = ttl.as_secs(), "Cached result");
            }
            Err(e) => warn!(key, error = %e, "Failed to serialize result for caching"),
        }
    }
}
