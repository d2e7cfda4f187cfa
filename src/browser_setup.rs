use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{error, info, trace, warn};

use crate::BrowserConfig;
use crate::browser::{BrowserError, BrowserResult};

/// RAII guard for the per-launch profile directory
///
/// Removes the directory on drop unless consumed by `into_path()`, so a failed
/// launch never leaves a profile behind.
struct TempDirGuard {
    path: PathBuf,
    keep: bool,
}

impl TempDirGuard {
    fn new(path: PathBuf) -> BrowserResult<Self> {
        std::fs::create_dir_all(&path).map_err(|e| {
            BrowserError::IoError(format!(
                "failed to create user data directory {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { path, keep: false })
    }

    /// Hand ownership of the directory to the caller
    fn into_path(mut self) -> PathBuf {
        self.keep = true;
        self.path.clone()
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if !self.keep {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!("Failed to clean up temp dir {}: {}", self.path.display(), e);
            } else {
                info!("Cleaned up temp dir after launch failure: {}", self.path.display());
            }
        }
    }
}

/// Find a Chrome/Chromium executable, honouring `CHROMIUM_PATH` first
pub async fn find_browser_executable() -> BrowserResult<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!(
                "Using browser from CHROMIUM_PATH environment variable: {}",
                path.display()
            );
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH environment variable points to non-existent file: {}",
            path.display()
        );
    }

    let paths: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "~/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "~/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for path_str in paths {
        let path = match path_str.strip_prefix("~/") {
            Some(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => continue,
            },
            None => PathBuf::from(path_str),
        };
        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path_str.is_empty() {
                    let path = PathBuf::from(path_str);
                    info!("Found browser using 'which' command: {}", path.display());
                    return Ok(path);
                }
            }
        }
    }

    warn!("No Chrome/Chromium executable found. Will download and use fetcher.");
    Err(BrowserError::NotFound(
        "no Chrome/Chromium executable on this system".into(),
    ))
}

/// Download a managed Chromium into the user cache directory
pub async fn download_managed_browser() -> Result<PathBuf> {
    info!("Downloading managed Chromium browser...");

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| {
            let fallback = std::env::temp_dir().join(".cache");
            warn!(
                "Could not determine system cache directory, using temp directory fallback: {}",
                fallback.display()
            );
            fallback
        })
        .join("og_proxy/chromium");

    std::fs::create_dir_all(&cache_dir).context("Failed to create cache directory")?;

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .context("Failed to build fetcher options")?,
    );
    let revision_info = fetcher.fetch().await.context("Failed to fetch browser")?;

    info!(
        "Downloaded Chromium to: {}",
        revision_info.folder_path.display()
    );
    Ok(revision_info.executable_path)
}

/// Launch Chrome with a mobile window, the configured user agent and the
/// container-safe flag set, using `user_data_dir` as an isolated profile.
///
/// The returned handler task drives the CDP connection and must be aborted
/// once the browser is closed.
pub async fn launch_browser(
    config: &BrowserConfig,
    user_data_dir: PathBuf,
) -> Result<(Browser, JoinHandle<()>)> {
    let chrome_path = match find_browser_executable().await {
        Ok(path) => path,
        Err(_) => download_managed_browser().await?,
    };

    let temp_guard = TempDirGuard::new(user_data_dir)?;

    let mut config_builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(config.window.width, config.window.height)
        .user_data_dir(temp_guard.path.clone())
        .chrome_executable(chrome_path);

    if config.headless {
        config_builder = config_builder.headless_mode(HeadlessMode::default());
    } else {
        config_builder = config_builder.with_head();
    }

    config_builder = config_builder
        .arg(format!("--user-agent={}", config.user_agent))
        .arg(format!("--lang={}", primary_language(&config.accept_language)))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-gpu")
        .arg("--disable-software-rasterizer")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--disable-breakpad")
        .arg("--disable-features=TranslateUI")
        .arg("--disable-hang-monitor")
        .arg("--metrics-recording-only")
        .arg("--password-store=basic")
        .arg("--use-mock-keychain")
        .arg("--hide-scrollbars")
        .arg("--mute-audio");

    if config.disable_security {
        info!("WARNING: Disabling browser security features (disable_security=true)");
        config_builder = config_builder
            .arg("--disable-web-security")
            .arg("--disable-features=IsolateOrigins,site-per-process")
            .arg("--ignore-certificate-errors");
    }

    if should_disable_sandbox() {
        info!("Detected containerized environment, disabling sandbox");
        config_builder = config_builder
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");
    } else if config.disable_security {
        config_builder = config_builder
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox");
    }

    let browser_config = config_builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

    info!("Launching browser with config: {:?}", browser_config);
    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .context("Failed to launch browser")?;

    let handler_task = task::spawn(async move {
        while let Some(h) = handler.next().await {
            if let Err(e) = h {
                let error_msg = e.to_string();

                // chromiumoxide does not know every CDP event Chrome emits
                let is_benign_serialization_error = error_msg
                    .contains("data did not match any variant of untagged enum Message")
                    || error_msg.contains("Failed to deserialize WS response");

                if is_benign_serialization_error {
                    trace!("Suppressed benign CDP serialization error: {}", error_msg);
                } else {
                    error!("Browser handler error: {:?}", e);
                }
            }
        }
        info!("Browser handler task completed");
    });

    temp_guard.into_path();
    Ok((browser, handler_task))
}

/// `en-US,en;q=0.9` -> `en-US`
fn primary_language(accept_language: &str) -> &str {
    accept_language
        .split([',', ';'])
        .next()
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .unwrap_or("en-US")
}

/// In containers setuid sandboxing is unavailable
fn should_disable_sandbox() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || std::env::var("container").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}
