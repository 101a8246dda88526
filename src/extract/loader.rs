//! Page loaders: fetch the rendered HTML of an article page.
//!
//! - [`ChromeLoader`] drives one shared headless Chromium, opening a fresh tab
//!   per load. The browser is launched lazily and relaunched after it dies,
//!   or after [`MAX_STALLED_LOADS`] loads in a row were abandoned mid-flight
//!   (a wedged browser never answers, so its loads only end by timeout).
//! - [`HttpLoader`] is a plain GET for sites that render server-side.

use crate::error::LoadError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Produces the HTML of a page after it has loaded.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<String, LoadError>;
}

/// Consecutive abandoned loads after which the browser is relaunched.
pub const MAX_STALLED_LOADS: usize = 3;

/// Counts a load as stalled unless it reaches [`StallWatch::finish`].
///
/// A caller's timeout drops the load future, so the drop is the only place
/// the loader learns the attempt never completed.
struct StallWatch<'a> {
    stalled: &'a AtomicUsize,
    done: bool,
}

impl<'a> StallWatch<'a> {
    fn new(stalled: &'a AtomicUsize) -> Self {
        Self {
            stalled,
            done: false,
        }
    }

    /// The browser answered, successfully or not.
    fn finish(mut self) {
        self.done = true;
        self.stalled.store(0, Ordering::Relaxed);
    }
}

impl Drop for StallWatch<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.stalled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Closes its tab when dropped, including when a timeout drops the load future.
struct PageGuard {
    page: Option<Page>,
}

impl PageGuard {
    fn new(page: Page) -> Self {
        Self { page: Some(page) }
    }

    fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    async fn close(mut self) {
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!(error = %e, "Failed to close tab");
            }
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = page.close().await;
                });
            }
        }
    }
}

/// Headless Chromium page loader.
pub struct ChromeLoader {
    browser: Mutex<Option<Arc<Browser>>>,
    settle: Duration,
    stalled: AtomicUsize,
}

impl std::fmt::Debug for ChromeLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromeLoader")
            .field("settle", &self.settle)
            .field("stalled", &self.stalled.load(Ordering::Relaxed))
            .finish()
    }
}

impl ChromeLoader {
    /// `settle` is how long to let scripts run after navigation completes.
    pub fn new(settle: Duration) -> Self {
        Self {
            browser: Mutex::new(None),
            settle,
            stalled: AtomicUsize::new(0),
        }
    }

    /// Loads abandoned in a row since the last one that completed.
    pub fn stalled_loads(&self) -> usize {
        self.stalled.load(Ordering::Relaxed)
    }

    /// Reset the stall count, reporting whether it had reached the limit.
    fn take_stall_limit(&self) -> bool {
        self.stalled
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n >= MAX_STALLED_LOADS).then_some(0)
            })
            .is_ok()
    }

    async fn browser(&self) -> Result<Arc<Browser>, LoadError> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            return Ok(Arc::clone(browser));
        }

        let config = BrowserConfig::builder().build().map_err(LoadError::Browser)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| LoadError::Browser(e.to_string()))?;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler event error");
                }
            }
            info!("Browser handler finished");
        });
        info!("Launched headless browser");

        let browser = Arc::new(browser);
        *slot = Some(Arc::clone(&browser));
        Ok(browser)
    }

    /// Forget the current browser so the next load launches a new one.
    async fn discard_browser(&self) {
        if self.browser.lock().await.take().is_some() {
            warn!("Discarding unresponsive browser");
        }
    }
}

#[async_trait]
impl PageLoader for ChromeLoader {
    #[instrument(level = "debug", skip(self))]
    async fn load(&self, url: &str) -> Result<String, LoadError> {
        if self.take_stall_limit() {
            warn!(limit = MAX_STALLED_LOADS, "Loads keep timing out; relaunching browser");
            self.discard_browser().await;
        }
        let watch = StallWatch::new(&self.stalled);
        let result = self.render(url).await;
        watch.finish();
        result
    }
}

impl ChromeLoader {
    async fn render(&self, url: &str) -> Result<String, LoadError> {
        let browser = self.browser().await?;
        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                self.discard_browser().await;
                return Err(LoadError::Browser(e.to_string()));
            }
        };
        let guard = PageGuard::new(page);
        let nav = |e: chromiumoxide::error::CdpError| LoadError::Navigation(e.to_string());

        let html = match guard.page() {
            Some(page) => {
                page.goto(url).await.map_err(nav)?;
                page.wait_for_navigation().await.map_err(nav)?;
                if !self.settle.is_zero() {
                    tokio::time::sleep(self.settle).await;
                }
                page.content().await.map_err(nav)?
            }
            None => return Err(LoadError::Browser("tab already closed".into())),
        };
        guard.close().await;
        Ok(html)
    }
}

/// Plain HTTP page loader; no script execution.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: reqwest::Client,
}

impl HttpLoader {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| LoadError::Browser(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageLoader for HttpLoader {
    #[instrument(level = "debug", skip(self))]
    async fn load(&self, url: &str) -> Result<String, LoadError> {
        let nav = |e: reqwest::Error| LoadError::Navigation(e.to_string());
        let resp = self.client.get(url).send().await.map_err(nav)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LoadError::Navigation(format!("HTTP {status}")));
        }
        resp.text().await.map_err(nav)
    }
}
