//! Social link resolution and Open Graph preview extraction
//!
//! Resolves shortened, tracking-wrapped and share-style social media links to
//! their canonical target and extracts preview metadata for it, falling back
//! to a pooled headless Chromium when plain HTTP is not enough.

pub mod browser;
pub mod browser_setup;
pub mod cache;
pub mod extractor;
pub mod fetch;
pub mod normalizer;
pub mod page_extractor;
pub mod pool;
pub mod resolver;
pub mod service;
pub mod utils;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use utils::constants::{
    ACCEPT_LANGUAGE, MAX_REDIRECT_HOPS, MOBILE_USER_AGENT, OG_CACHE_TTL_SECS, RESOLVE_CACHE_TTL_SECS,
};
use utils::{TimeoutError, validate_fetch_timeout, validate_navigation_timeout};

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "OG_PROXY_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub extractor: ExtractorConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub browser: BrowserConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Prepended to every key, for sharing one Redis between deployments
    #[serde(default)]
    pub key_prefix: String,

    /// Capacity of the in-memory store
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    #[serde(default = "default_resolve_ttl_secs")]
    pub resolve_ttl_secs: u64,

    #[serde(default = "default_og_ttl_secs")]
    pub og_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_max_hops")]
    pub max_hops: usize,

    /// Per-request timeout for redirect probing
    #[serde(default = "default_resolve_timeout_ms")]
    pub timeout_ms: u64,

    /// Per-request timeout for canonical scraping
    #[serde(default = "default_html_timeout_ms")]
    pub html_timeout_ms: u64,

    /// Shorteners and wrappers worth a network round trip; subdomains match too
    #[serde(default = "default_redirect_hosts")]
    pub redirect_hosts: Vec<String>,

    /// Lets the resolver reach loopback and private ranges (tests, intranets)
    #[serde(default)]
    pub allow_private_hosts: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Concurrent rendered pages
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Pause after navigation before reading the document
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Consecutive timeouts or protocol errors before a forced relaunch
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Scheduled relaunch period; 0 disables it
    #[serde(default = "default_restart_interval_secs")]
    pub restart_interval_secs: u64,

    #[serde(default = "default_navigation_retries")]
    pub navigation_retries: u32,
}

/// Browser security and launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Disable web security features (Same-Origin Policy, etc.)
    /// WARNING: Only enable for trusted content
    #[serde(default = "default_disable_security")]
    pub disable_security: bool,

    #[serde(default)]
    pub window: WindowConfig,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: u32,

    #[serde(default = "default_window_height")]
    pub height: u32,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_max_entries() -> u64 {
    10_000
}
fn default_resolve_ttl_secs() -> u64 {
    RESOLVE_CACHE_TTL_SECS
}
fn default_og_ttl_secs() -> u64 {
    OG_CACHE_TTL_SECS
}

fn default_max_hops() -> usize {
    MAX_REDIRECT_HOPS
}
fn default_resolve_timeout_ms() -> u64 {
    10_000
}
fn default_html_timeout_ms() -> u64 {
    9_000
}
fn default_redirect_hosts() -> Vec<String> {
    [
        "fb.me",
        "t.co",
        "bit.ly",
        "tinyurl.com",
        "goo.gl",
        "ow.ly",
        "buff.ly",
        "lnkd.in",
        "fb.watch",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_fetch_timeout_ms() -> u64 {
    9_000
}
fn default_render_timeout_ms() -> u64 {
    15_000
}

fn default_max_concurrency() -> usize {
    2
}
fn default_settle_delay_ms() -> u64 {
    400
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_restart_interval_secs() -> u64 {
    3600
}
fn default_navigation_retries() -> u32 {
    1
}

fn default_headless() -> bool {
    true
}

fn default_disable_security() -> bool {
    false // SECURE BY DEFAULT
}

fn default_user_agent() -> String {
    MOBILE_USER_AGENT.to_string()
}

fn default_accept_language() -> String {
    ACCEPT_LANGUAGE.to_string()
}

// iPhone 12-15 CSS viewport
fn default_window_width() -> u32 {
    390
}

fn default_window_height() -> u32 {
    844
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: String::new(),
            max_entries: default_max_entries(),
            resolve_ttl_secs: default_resolve_ttl_secs(),
            og_ttl_secs: default_og_ttl_secs(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_hops: default_max_hops(),
            timeout_ms: default_resolve_timeout_ms(),
            html_timeout_ms: default_html_timeout_ms(),
            redirect_hosts: default_redirect_hosts(),
            allow_private_hosts: false,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            render_timeout_ms: default_render_timeout_ms(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            settle_delay_ms: default_settle_delay_ms(),
            failure_threshold: default_failure_threshold(),
            restart_interval_secs: default_restart_interval_secs(),
            navigation_retries: default_navigation_retries(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            disable_security: default_disable_security(),
            window: WindowConfig::default(),
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Config {
    /// Reject zero or out-of-range timeouts
    pub fn validate(&self) -> Result<(), TimeoutError> {
        validate_fetch_timeout("resolver.timeout_ms", self.resolver.timeout_ms)?;
        validate_fetch_timeout("resolver.html_timeout_ms", self.resolver.html_timeout_ms)?;
        validate_fetch_timeout("extractor.fetch_timeout_ms", self.extractor.fetch_timeout_ms)?;
        validate_navigation_timeout("extractor.render_timeout_ms", self.extractor.render_timeout_ms)?;
        Ok(())
    }
}

/// Load and validate the YAML config
///
/// Lookup order: `path`, then `$OG_PROXY_CONFIG`, then `config.yaml` in the
/// package root. An explicitly named file must exist; a missing default file
/// yields `Config::default()`.
pub fn load_yaml_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let explicit = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

    let config: Config = match explicit {
        Some(config_path) => {
            let contents = fs::read_to_string(&config_path).map_err(|e| {
                anyhow::anyhow!("Failed to read config {}: {e}", config_path.display())
            })?;
            serde_yaml::from_str(&contents)?
        }
        None => {
            let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config.yaml");
            if config_path.exists() {
                let contents = fs::read_to_string(&config_path)?;
                serde_yaml::from_str(&contents)?
            } else {
                Config::default()
            }
        }
    };

    config.validate()?;
    Ok(config)
}

pub use browser::{BrowserError, BrowserResult, BrowserWrapper, ChromiumBackend};
pub use cache::{CacheError, CacheStore, MemoryStore, Namespace, RedisStore, ResultCache};
pub use extractor::{ExtractError, ExtractMode, MetadataExtractor};
pub use fetch::{FetchError, HttpFetcher, ReqwestFetcher};
pub use normalizer::{NormalizeError, NormalizedUrl, normalize};
pub use page_extractor::PreviewMetadata;
pub use pool::{BackendState, RenderError, RenderPool, Renderer};
pub use resolver::{ResolutionMethod, ResolutionResult, ResolutionWarning, Resolver};
pub use service::{LinkService, ServiceError};
