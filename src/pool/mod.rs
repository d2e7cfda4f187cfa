//! Render worker pool
//!
//! Owns a single shared rendering backend instance and hands out exclusively
//! owned page contexts under a FIFO concurrency ceiling.
//!
//! # Lifecycle
//!
//! The instance is launched lazily on first acquisition and health-checked on
//! every later one. It is replaced when:
//! - the health check fails (process died out of band)
//! - consecutive navigation timeouts or protocol faults reach the threshold
//! - the scheduled restart interval elapses
//!
//! All launch, relaunch and close transitions are serialized through the
//! instance mutex. Threshold relaunches and scheduled restarts first drain
//! every permit so no in-flight render observes its browser disappearing.

mod state;

pub use state::BackendState;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::PoolConfig;
use state::Health;

/// Final URL and full document markup of one rendered navigation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub final_url: String,
    pub markup: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("failed to launch render backend: {0}")]
    Launch(String),

    #[error("failed to create page: {0}")]
    PageCreation(String),

    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("failed to read page content: {0}")]
    Content(String),

    #[error("render pool is shut down")]
    Closed,
}

impl RenderError {
    /// Errors that point at an unhealthy backend rather than an unreachable page
    pub fn is_backend_fault(&self) -> bool {
        matches!(
            self,
            RenderError::NavigationTimeout(_) | RenderError::Protocol(_) | RenderError::PageCreation(_)
        )
    }
}

/// "Render a URL and return final URL plus markup"
#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    async fn with_page(&self, url: &str, timeout: Duration) -> Result<RenderedPage, RenderError>;

    /// Release backend resources; later calls fail with [`RenderError::Closed`]
    async fn shutdown(&self) {}
}

/// One page-like execution slot
#[async_trait]
pub trait RenderContext: Send + 'static {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), RenderError>;
    async fn final_url(&mut self) -> Result<Option<String>, RenderError>;
    async fn content(&mut self) -> Result<String, RenderError>;
    /// Must be safe to call after any failure
    async fn close(&mut self);
}

/// A running backend process, only ever touched under the pool's instance lock
#[async_trait]
pub trait BackendInstance: Send + 'static {
    type Context: RenderContext;

    async fn is_alive(&mut self) -> bool;
    async fn open_context(&mut self) -> Result<Self::Context, RenderError>;
    async fn shutdown(&mut self);
}

#[async_trait]
pub trait RenderBackend: Send + Sync + 'static {
    type Instance: BackendInstance;

    async fn launch(&self) -> Result<Self::Instance, RenderError>;
}

/// Runtime pool settings derived from [`PoolConfig`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_concurrency: usize,
    pub settle_delay: Duration,
    pub failure_threshold: u32,
    /// `None` disables scheduled restarts
    pub restart_interval: Option<Duration>,
    pub navigation_retries: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolOptions {
    fn from(config: &PoolConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            failure_threshold: config.failure_threshold.max(1),
            restart_interval: (config.restart_interval_secs > 0)
                .then(|| Duration::from_secs(config.restart_interval_secs)),
            navigation_retries: config.navigation_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Restart {
    Scheduled,
    Degraded,
}

pub struct RenderPool<B: RenderBackend> {
    backend: B,
    options: PoolOptions,
    instance: Mutex<Option<B::Instance>>,
    permits: Arc<Semaphore>,
    health: SyncMutex<Health>,
    cancel: CancellationToken,
    maintenance: SyncMutex<Option<JoinHandle<()>>>,
}

impl<B: RenderBackend> RenderPool<B> {
    pub fn new(backend: B, options: PoolOptions) -> Arc<Self> {
        let permits = options.max_concurrency.max(1);
        Arc::new(Self {
            backend,
            options,
            instance: Mutex::new(None),
            permits: Arc::new(Semaphore::new(permits)),
            health: SyncMutex::new(Health::new()),
            cancel: CancellationToken::new(),
            maintenance: SyncMutex::new(None),
        })
    }

    pub fn state(&self) -> BackendState {
        self.health.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.health.lock().consecutive_failures
    }

    /// Number of successful launches so far, relaunches included
    pub fn launches(&self) -> u64 {
        self.health.lock().launches
    }

    /// Start the scheduled-restart task
    ///
    /// Must be called from within a Tokio runtime. Calling it again is a no-op.
    pub fn start_maintenance(self: &Arc<Self>) {
        let Some(period) = self.options.restart_interval else {
            return;
        };
        let mut slot = self.maintenance.lock();
        if slot.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = self.cancel.clone();
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(pool) = weak.upgrade() else { break };
                // failures are logged; the next acquisition launches lazily
                let _ = pool.restart(Restart::Scheduled).await;
            }
            debug!("Render pool maintenance task stopped");
        }));
    }

    /// Stop maintenance, refuse new work and close the instance
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.maintenance.lock().take() {
            handle.abort();
        }
        self.permits.close();

        let mut guard = self.instance.lock().await;
        if let Some(mut instance) = guard.take() {
            info!("Shutting down render backend");
            instance.shutdown().await;
        }
        self.health.lock().state = BackendState::ShutDown;
    }

    /// Replace the instance once every permit is held
    ///
    /// Waits for in-flight renders to close their contexts first. A degraded
    /// restart is skipped when another caller already replaced the instance.
    async fn restart(&self, reason: Restart) -> Result<(), RenderError> {
        let total = u32::try_from(self.options.max_concurrency.max(1)).unwrap_or(u32::MAX);
        let _drained = self
            .permits
            .acquire_many(total)
            .await
            .map_err(|_| RenderError::Closed)?;

        let mut guard = self.instance.lock().await;
        if reason == Restart::Degraded && self.state() != BackendState::Degraded {
            return Ok(());
        }
        let Some(mut old) = guard.take() else {
            return Ok(());
        };
        match reason {
            Restart::Scheduled => info!("Scheduled render backend restart"),
            Restart::Degraded => warn!(
                failures = self.consecutive_failures(),
                "Render backend degraded, forcing relaunch"
            ),
        }
        self.health.lock().state = BackendState::Relaunching;
        old.shutdown().await;
        drop(old);

        match self.backend.launch().await {
            Ok(instance) => {
                *guard = Some(instance);
                self.health.lock().launched();
                info!("Render backend restarted");
                Ok(())
            }
            Err(e) => {
                warn!("Render backend relaunch failed: {}. Will retry on next acquisition", e);
                self.health.lock().state = BackendState::Disconnected;
                Err(e)
            }
        }
    }

    /// Health-check the shared instance, relaunching when needed, and open a context on it
    async fn acquire_context(&self) -> Result<<B::Instance as BackendInstance>::Context, RenderError> {
        let mut guard = self.instance.lock().await;
        if self.cancel.is_cancelled() {
            return Err(RenderError::Closed);
        }

        // a dead process has no live contexts left to protect, so no drain here
        if let Some(instance) = guard.as_mut()
            && !instance.is_alive().await
        {
            warn!("Render backend health check failed, triggering recovery");
            self.health.lock().state = BackendState::Disconnected;
            if let Some(mut old) = guard.take() {
                old.shutdown().await;
            }
        }

        if guard.is_none() {
            {
                let mut health = self.health.lock();
                health.state = health.state.launching_from();
                info!(state = %health.state, "Launching render backend");
            }
            match self.backend.launch().await {
                Ok(instance) => {
                    *guard = Some(instance);
                    self.health.lock().launched();
                }
                Err(e) => {
                    warn!("Render backend launch failed: {}", e);
                    self.health.lock().state = BackendState::Disconnected;
                    return Err(e);
                }
            }
        }

        let instance = guard.as_mut().ok_or(RenderError::Closed)?;
        instance.open_context().await
    }

    async fn render_once(&self, url: &str, timeout: Duration) -> Result<RenderedPage, RenderError> {
        let mut context = self.acquire_context().await?;
        let result = self.drive(&mut context, url, timeout).await;
        context.close().await;
        result
    }

    async fn drive(
        &self,
        context: &mut <B::Instance as BackendInstance>::Context,
        url: &str,
        timeout: Duration,
    ) -> Result<RenderedPage, RenderError> {
        context.navigate(url, timeout).await?;
        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }
        let final_url = context
            .final_url()
            .await?
            .filter(|u| !u.is_empty() && u != "about:blank")
            .unwrap_or_else(|| url.to_string());
        let markup = context.content().await?;
        Ok(RenderedPage { final_url, markup })
    }

    fn record_outcome(&self, result: &Result<RenderedPage, RenderError>) {
        let mut health = self.health.lock();
        match result {
            Ok(_) => health.record_success(),
            Err(e) if e.is_backend_fault() => {
                if health.record_fault(self.options.failure_threshold) {
                    warn!(
                        failures = health.consecutive_failures,
                        "Render backend marked degraded"
                    );
                }
            }
            Err(_) => {}
        }
    }
}

#[async_trait]
impl<B: RenderBackend> Renderer for RenderPool<B> {
    async fn with_page(&self, url: &str, timeout: Duration) -> Result<RenderedPage, RenderError> {
        let attempts = self.options.navigation_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.state() == BackendState::Degraded {
                self.restart(Restart::Degraded).await?;
            }

            let result = {
                let _permit = self.permits.acquire().await.map_err(|_| RenderError::Closed)?;
                self.render_once(url, timeout).await
            };
            self.record_outcome(&result);
            match result {
                Ok(page) => {
                    debug!(url, final_url = %page.final_url, attempt, "Page rendered");
                    return Ok(page);
                }
                Err(e) if e.is_backend_fault() && attempt < attempts => {
                    warn!(url, attempt, "Render attempt failed: {}. Retrying with a fresh page", e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn shutdown(&self) {
        RenderPool::shutdown(self).await;
    }
}

impl<B: RenderBackend> Drop for RenderPool<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
