//! Browser instance and page handles

use async_trait::async_trait;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::page::Page;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{render_error, stealth_script};
use crate::pool::{BackendInstance, RenderContext, RenderError};

/// Wrapper for Browser and its event handler task
///
/// The handler is aborted on drop so it never outlives the browser.
pub struct BrowserWrapper {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
    user_agent: String,
    /// Also drives `navigator.languages` in the injected evasions
    accept_language: String,
}

impl BrowserWrapper {
    pub(crate) fn new(
        browser: Browser,
        handler: JoinHandle<()>,
        user_data_dir: PathBuf,
        user_agent: String,
        accept_language: String,
    ) -> Self {
        Self {
            browser,
            handler,
            user_data_dir: Some(user_data_dir),
            user_agent,
            accept_language,
        }
    }

    /// Remove the profile directory (blocking)
    ///
    /// Must run after `browser.wait()` so Chrome has released its file handles.
    pub fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            info!("Cleaning up temp directory: {}", path.display());
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    "Failed to clean up temp directory {}: {}. Manual cleanup may be required.",
                    path.display(),
                    e
                );
            }
        }
    }
}

#[async_trait]
impl BackendInstance for BrowserWrapper {
    type Context = ChromiumPage;

    async fn is_alive(&mut self) -> bool {
        if self.handler.is_finished() {
            return false;
        }
        match self.browser.version().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Browser health check failed: {}", e);
                false
            }
        }
    }

    async fn open_context(&mut self) -> Result<ChromiumPage, RenderError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::PageCreation(e.to_string()))?;

        let params = SetUserAgentOverrideParams::builder()
            .user_agent(self.user_agent.clone())
            .accept_language(self.accept_language.clone())
            .build()
            .map_err(RenderError::PageCreation)?;
        let overridden = page
            .set_user_agent(params)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string());
        let applied = match overridden {
            Ok(()) => page
                .execute(AddScriptToEvaluateOnNewDocumentParams::new(stealth_script(
                    &self.accept_language,
                )))
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Err(message) => Err(message),
        };
        if let Err(message) = applied {
            let _ = page.close().await;
            return Err(RenderError::PageCreation(message));
        }

        Ok(ChromiumPage { page: Some(page) })
    }

    async fn shutdown(&mut self) {
        info!("Shutting down browser");

        if let Err(e) = self.browser.close().await {
            warn!("Failed to close browser cleanly: {}", e);
        }
        if let Err(e) = self.browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }
        self.handler.abort();
        self.cleanup_temp_dir();
    }
}

impl Drop for BrowserWrapper {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(path) = self.user_data_dir.as_ref() {
            warn!(
                "BrowserWrapper dropped without shutdown. Temp directory will be orphaned: {}",
                path.display()
            );
        }
    }
}

/// One tab, closed exactly once
pub struct ChromiumPage {
    page: Option<Page>,
}

impl ChromiumPage {
    fn page(&self) -> Result<&Page, RenderError> {
        self.page
            .as_ref()
            .ok_or_else(|| RenderError::Protocol("page already closed".into()))
    }
}

#[async_trait]
impl RenderContext for ChromiumPage {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), RenderError> {
        let page = self.page()?;
        debug!(url, "Navigating");
        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(render_error(e, timeout)),
            Err(_) => Err(RenderError::NavigationTimeout(timeout)),
        }
    }

    async fn final_url(&mut self) -> Result<Option<String>, RenderError> {
        self.page()?
            .url()
            .await
            .map_err(|e| RenderError::Protocol(e.to_string()))
    }

    async fn content(&mut self) -> Result<String, RenderError> {
        self.page()?
            .content()
            .await
            .map_err(|e| RenderError::Content(e.to_string()))
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take()
            && let Err(e) = page.close().await
        {
            debug!("Failed to close page: {}", e);
        }
    }
}
