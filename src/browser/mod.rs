//! Chromium render backend
//!
//! Implements the pool's backend traits on top of chromiumoxide. Every launch
//! gets a fresh profile directory which is removed again when the instance is
//! shut down, so relaunches also wipe on-disk profile growth.

mod stealth;
mod wrapper;

pub use crate::browser_setup::{download_managed_browser, find_browser_executable};
pub use stealth::stealth_script;
pub use wrapper::{BrowserWrapper, ChromiumPage};

use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::BrowserConfig;
use crate::pool::{RenderBackend, RenderError};

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Failed to find browser executable: {0}")]
    NotFound(String),

    #[error("Failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("IO error: {0}")]
    IoError(String),
}

pub type BrowserResult<T> = Result<T, BrowserError>;

impl From<BrowserError> for RenderError {
    fn from(e: BrowserError) -> Self {
        RenderError::Launch(e.to_string())
    }
}

/// Map a CDP failure during page work onto the pool's error classes
pub(crate) fn render_error(e: CdpError, timeout: Duration) -> RenderError {
    match e {
        CdpError::Timeout => RenderError::NavigationTimeout(timeout),
        CdpError::ChromeMessage(message) => RenderError::Navigation(message),
        CdpError::JavascriptException(details) => RenderError::Navigation(details.text.clone()),
        other => RenderError::Protocol(other.to_string()),
    }
}

/// Launches headless Chrome instances for the render pool
#[derive(Debug, Clone)]
pub struct ChromiumBackend {
    config: BrowserConfig,
}

impl ChromiumBackend {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    fn profile_dir() -> PathBuf {
        std::env::temp_dir().join(format!(
            "og_proxy_profile_{}_{}",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ))
    }
}

#[async_trait]
impl RenderBackend for ChromiumBackend {
    type Instance = BrowserWrapper;

    async fn launch(&self) -> Result<BrowserWrapper, RenderError> {
        let user_data_dir = Self::profile_dir();
        info!(profile = %user_data_dir.display(), "Launching browser instance");

        let (browser, handler) = crate::browser_setup::launch_browser(&self.config, user_data_dir.clone())
            .await
            .map_err(|e| BrowserError::LaunchFailed(format!("{e:#}")))?;

        Ok(BrowserWrapper::new(
            browser,
            handler,
            user_data_dir,
            self.config.user_agent.clone(),
            self.config.accept_language.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_dirs_are_unique_per_launch() {
        let a = ChromiumBackend::profile_dir();
        let b = ChromiumBackend::profile_dir();
        assert_ne!(a, b);
        assert!(
            a.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("og_proxy_profile_"))
        );
    }

    #[test]
    fn cdp_errors_map_to_render_classes() {
        let timeout = Duration::from_secs(15);
        assert_eq!(
            render_error(CdpError::Timeout, timeout),
            RenderError::NavigationTimeout(timeout)
        );
        assert_eq!(
            render_error(CdpError::ChromeMessage("net::ERR_ABORTED".into()), timeout),
            RenderError::Navigation("net::ERR_ABORTED".into())
        );
        assert!(render_error(CdpError::NoResponse, timeout).is_backend_fault());
    }

    #[test]
    fn launch_errors_are_not_backend_faults() {
        let err: RenderError = BrowserError::NotFound("chrome".into()).into();
        assert!(matches!(err, RenderError::Launch(_)));
        assert!(!err.is_backend_fault());
    }
}
