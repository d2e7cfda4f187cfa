//! Two-tier metadata extraction
//!
//! A plain HTTP fetch is tried first. Only when it fails (transport error,
//! non-HTML, or no usable tags) is the page rendered through the pool.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::ExtractorConfig;
use crate::fetch::{FetchError, FetchRequest, HeaderProfile, HttpFetcher};
use crate::normalizer::NormalizedUrl;
use crate::page_extractor::{self, PreviewMetadata, ScannedPage};
use crate::pool::{RenderError, Renderer};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("response is not HTML (content type {0:?})")]
    NotHtml(Option<String>),

    #[error("upstream returned HTTP {0}")]
    HttpStatus(u16),

    #[error("no preview metadata found at {0}")]
    NoMetadata(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractMode {
    /// Plain fetch, rendering only as a fallback
    #[default]
    Auto,
    /// Skip straight to the rendered tier
    Rendered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorOptions {
    pub fetch_timeout: Duration,
    pub render_timeout: Duration,
}

impl From<&ExtractorConfig> for ExtractorOptions {
    fn from(config: &ExtractorConfig) -> Self {
        Self {
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
            render_timeout: Duration::from_millis(config.render_timeout_ms),
        }
    }
}

pub struct MetadataExtractor {
    fetcher: Arc<dyn HttpFetcher>,
    renderer: Arc<dyn Renderer>,
    options: ExtractorOptions,
}

impl MetadataExtractor {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, renderer: Arc<dyn Renderer>, options: ExtractorOptions) -> Self {
        Self {
            fetcher,
            renderer,
            options,
        }
    }

    /// Extract a non-empty preview for `url`
    pub async fn extract(&self, url: &NormalizedUrl, mode: ExtractMode) -> Result<PreviewMetadata, ExtractError> {
        if mode == ExtractMode::Auto {
            match self.extract_plain(url).await {
                Ok(preview) if !preview.is_empty() => return Ok(preview),
                Ok(_) => debug!(url = %url, "Plain tier found only a URL, rendering"),
                Err(e) => debug!(url = %url, "Plain tier failed: {}, rendering", e),
            }
        }
        // a bare `<meta name="description">` is not enough for a preview
        let scanned = self.render_scan(url).await?;
        if !scanned.has_core_fields() {
            return Err(ExtractError::NoMetadata(url.to_string()));
        }
        let preview = scanned.into_preview();
        if preview.is_empty() {
            return Err(ExtractError::NoMetadata(url.to_string()));
        }
        Ok(preview)
    }

    /// Plain tier: mobile UA, redirects followed, short timeout
    ///
    /// Fails unless the page declares a title, an image or an `og:url`.
    pub async fn extract_plain(&self, url: &NormalizedUrl) -> Result<PreviewMetadata, ExtractError> {
        let request = FetchRequest::get(url.as_str(), self.options.fetch_timeout).profile(HeaderProfile::Browser);
        let response = self.fetcher.fetch(request).await?;

        if !response.is_success() {
            return Err(ExtractError::HttpStatus(response.status));
        }
        if !response.is_html() {
            return Err(ExtractError::NotHtml(response.content_type));
        }

        let page_url = Url::parse(&response.final_url).unwrap_or_else(|_| url.as_url().clone());
        let scanned = page_extractor::scan(response.body.as_deref().unwrap_or_default(), &page_url);
        if !scanned.has_core_fields() {
            return Err(ExtractError::NoMetadata(url.to_string()));
        }
        Ok(scanned.into_preview())
    }

    /// Canonical URL reported by a rendered navigation: `og:url`, else the final URL
    pub async fn rendered_canonical(&self, url: &NormalizedUrl) -> Result<String, ExtractError> {
        Ok(self.render_scan(url).await?.into_preview().url)
    }

    async fn render_scan(&self, url: &NormalizedUrl) -> Result<ScannedPage, ExtractError> {
        let rendered = self
            .renderer
            .with_page(url.as_str(), self.options.render_timeout)
            .await?;
        let page_url = Url::parse(&rendered.final_url).unwrap_or_else(|_| url.as_url().clone());
        Ok(page_extractor::scan(&rendered.markup, &page_url))
    }
}
