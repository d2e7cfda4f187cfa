//! Plain HTTP transport
//!
//! The resolver and extractor only ever talk to the network through
//! [`HttpFetcher`], which keeps redirect semantics, header profiles and
//! timeouts in one place and lets tests script upstream behaviour.

mod client;

pub use client::ReqwestFetcher;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Head,
    Get,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirects {
    /// Let the client chase `Location` headers up to its hop limit
    Follow,
    /// Return the first response as-is
    Manual,
}

/// Which identity a request presents upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderProfile {
    /// Self-identifying bot UA with a facebook.com referer on GETs
    Resolver,
    /// Mobile Safari UA, used for Open Graph pages
    Browser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    pub redirects: Redirects,
    pub profile: HeaderProfile,
    pub timeout: Duration,
}

impl FetchRequest {
    /// GET with redirect following and the resolver profile
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            redirects: Redirects::Follow,
            profile: HeaderProfile::Resolver,
            timeout,
        }
    }

    pub fn head(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url, timeout)
        }
    }

    pub fn manual_redirects(mut self) -> Self {
        self.redirects = Redirects::Manual;
        self
    }

    pub fn profile(mut self, profile: HeaderProfile) -> Self {
        self.profile = profile;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    /// URL of the last response after any followed redirects
    pub final_url: String,
    pub status: u16,
    pub location: Option<String>,
    pub content_type: Option<String>,
    /// Only populated for HTML responses to GET requests
    pub body: Option<String>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("too many redirects: {0}")]
    TooManyRedirects(String),

    #[error("failed to read body: {0}")]
    Body(String),

    #[error("invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

#[async_trait]
pub trait HttpFetcher: Send + Sync + 'static {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}
