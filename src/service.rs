//! Request façade
//!
//! `resolve` and `extract_metadata` both run normalize, policy check, cache
//! lookup, compute, then a gated cache store. Concurrent misses for the same
//! key share a single computation. Only malformed input and policy rejections
//! are errors; everything else degrades to a usable result.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::ChromiumBackend;
use crate::cache::{CacheStore, InFlight, MemoryStore, Namespace, RedisStore, ResultCache};
use crate::extractor::{ExtractMode, ExtractorOptions, MetadataExtractor};
use crate::fetch::{HttpFetcher, ReqwestFetcher};
use crate::normalizer::{self, NormalizeError, NormalizedUrl, is_private_host, is_supported_scheme};
use crate::page_extractor::PreviewMetadata;
use crate::pool::{PoolOptions, RenderPool, Renderer};
use crate::resolver::{ResolutionResult, Resolver, ResolverOptions};
use crate::{CacheBackend, Config};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("malformed URL: {0}")]
    MalformedUrl(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("refusing to fetch private host: {0}")]
    PrivateHostBlocked(String),
}

impl From<NormalizeError> for ServiceError {
    fn from(e: NormalizeError) -> Self {
        match e {
            NormalizeError::Malformed(raw) => ServiceError::MalformedUrl(raw),
        }
    }
}

pub struct LinkService {
    cache: ResultCache,
    resolving: InFlight<ResolutionResult>,
    previewing: InFlight<PreviewMetadata>,
    resolver: Resolver,
    extractor: Arc<MetadataExtractor>,
    renderer: Arc<dyn Renderer>,
    resolve_ttl: Duration,
    og_ttl: Duration,
    allow_private_hosts: bool,
}

impl LinkService {
    /// Assemble the service from explicit collaborators
    pub fn new(
        config: &Config,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn HttpFetcher>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        let extractor = Arc::new(MetadataExtractor::new(
            fetcher.clone(),
            renderer.clone(),
            ExtractorOptions::from(&config.extractor),
        ));
        let resolver = Resolver::new(fetcher, extractor.clone(), ResolverOptions::from(config));
        Self {
            cache: ResultCache::with_prefix(store, config.cache.key_prefix.clone()),
            resolving: InFlight::new(),
            previewing: InFlight::new(),
            resolver,
            extractor,
            renderer,
            resolve_ttl: Duration::from_secs(config.cache.resolve_ttl_secs),
            og_ttl: Duration::from_secs(config.cache.og_ttl_secs),
            allow_private_hosts: config.resolver.allow_private_hosts,
        }
    }

    /// Production wiring: reqwest, the configured cache backend and a Chromium pool
    ///
    /// Must be called inside a Tokio runtime; starts the scheduled-restart task.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn CacheStore> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryStore::new(config.cache.max_entries)),
            CacheBackend::Redis => match RedisStore::connect(&config.cache.redis_url).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    warn!("Redis unavailable ({}), falling back to in-memory cache", e);
                    Arc::new(MemoryStore::new(config.cache.max_entries))
                }
            },
        };

        let fetcher = Arc::new(ReqwestFetcher::with_language(config.browser.accept_language.clone())?);

        let pool = RenderPool::new(
            ChromiumBackend::new(config.browser.clone()),
            PoolOptions::from(&config.pool),
        );
        pool.start_maintenance();

        info!(backend = ?config.cache.backend, "Link service ready");
        Ok(Self::new(config, store, fetcher, pool))
    }

    /// Resolve `raw` to its canonical target
    pub async fn resolve(&self, raw: &str) -> Result<ResolutionResult, ServiceError> {
        let url = self.admit(raw)?;

        if let Some(hit) = self.cache.get_json::<ResolutionResult>(Namespace::Resolve, &url).await {
            return Ok(hit);
        }

        let key = self.cache.key(Namespace::Resolve, &url);
        let result = self
            .resolving
            .run(&key, async {
                let result = self.resolver.resolve(&url).await;
                if result.is_cacheable() {
                    self.cache
                        .set_json(Namespace::Resolve, &url, &result, self.resolve_ttl)
                        .await;
                } else {
                    debug!(url = %url, warning = ?result.warning, "Not caching unchanged resolution");
                }
                result
            })
            .await;
        Ok(result)
    }

    /// Preview metadata for `raw`; an empty preview means "no preview available"
    pub async fn extract_metadata(&self, raw: &str) -> Result<PreviewMetadata, ServiceError> {
        let url = self.admit(raw)?;
        if let Some(hit) = self.cache.get_json::<PreviewMetadata>(Namespace::Og, &url).await {
            return Ok(hit);
        }
        let key = self.cache.key(Namespace::Og, &url);
        Ok(self
            .previewing
            .run(&key, self.compute_metadata(&url, ExtractMode::Auto))
            .await)
    }

    /// Like [`extract_metadata`](Self::extract_metadata) but always renders,
    /// bypassing the cache lookup
    pub async fn extract_rendered_metadata(&self, raw: &str) -> Result<PreviewMetadata, ServiceError> {
        let url = self.admit(raw)?;
        let key = format!("{}:rendered", self.cache.key(Namespace::Og, &url));
        Ok(self
            .previewing
            .run(&key, self.compute_metadata(&url, ExtractMode::Rendered))
            .await)
    }

    /// Stop the scheduled-restart task and close the render backend
    pub async fn shutdown(&self) {
        self.renderer.shutdown().await;
    }

    async fn compute_metadata(&self, url: &NormalizedUrl, mode: ExtractMode) -> PreviewMetadata {
        match self.extractor.extract(url, mode).await {
            Ok(preview) => {
                if preview.has_image() {
                    self.cache.set_json(Namespace::Og, url, &preview, self.og_ttl).await;
                } else {
                    debug!(url = %url, "Preview has no image, not caching");
                }
                preview
            }
            Err(e) => {
                info!(url = %url, "No preview available: {}", e);
                PreviewMetadata::empty(url.to_string())
            }
        }
    }

    /// Normalize and apply the host policy
    fn admit(&self, raw: &str) -> Result<NormalizedUrl, ServiceError> {
        let url = normalizer::normalize(raw)?;
        if !is_supported_scheme(url.as_url()) {
            return Err(ServiceError::UnsupportedScheme(url.as_url().scheme().to_string()));
        }
        if !self.allow_private_hosts && is_private_host(url.as_url()) {
            return Err(ServiceError::PrivateHostBlocked(url.host().unwrap_or_default().to_string()));
        }
        Ok(url)
    }
}
