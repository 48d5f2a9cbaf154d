//! Document fetching for flight board pages
//!
//! The boards are rendered client-side, so the production fetcher drives a
//! headless Chromium via chromiumoxide, waits for the first flight row to
//! appear and then lets the page settle before taking the HTML. A plain HTTP
//! fetcher is provided for mirrors or fixtures that need no rendering.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Browser user agent sent by both fetchers
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Errors that can occur while fetching a page
#[derive(Debug, Error)]
pub enum FetchError {
    /// The page, or the element we wait for, did not show up in time
    #[error("Timed out after {}s waiting for {what}", .waited.as_secs())]
    Timeout { what: String, waited: Duration },

    /// The browser could not load the page
    #[error("Navigation failed: {0}")]
    Navigation(String),

    /// The browser could not be started or talked to
    #[error("Browser error: {0}")]
    Browser(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Fetches the fully rendered markup of a page
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Timing and browser settings for fetching
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Upper bound on waiting for the page and its first flight row
    pub wait_timeout: Duration,
    /// Extra time for client-side rendering once the first row is present
    pub settle_delay: Duration,
    /// Selector whose presence means the board has started rendering
    pub ready_selector: String,
    /// How often to probe for `ready_selector`
    pub poll_interval: Duration,
    /// Browser binary; searched for on the PATH when unset
    pub chrome_path: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(45),
            settle_delay: Duration::from_secs(8),
            ready_selector: "tbody tr, .flight-row".to_string(),
            poll_interval: Duration::from_millis(500),
            chrome_path: None,
        }
    }
}

/// Find a Chromium or Chrome binary
pub fn find_chromium() -> Option<PathBuf> {
    let stable = PathBuf::from("/usr/bin/google-chrome-stable");
    if stable.exists() {
        return Some(stable);
    }

    ["google-chrome-stable", "google-chrome", "chromium", "chromium-browser"]
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Headless Chromium fetcher
///
/// A fresh browser is launched for every fetch and torn down afterwards, so a
/// wedged renderer never outlives one acquisition.
#[derive(Debug, Clone)]
pub struct ChromiumFetcher {
    config: FetchConfig,
}

impl ChromiumFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }

    fn browser_config(&self) -> Result<BrowserConfig, FetchError> {
        let chrome_path = self
            .config
            .chrome_path
            .clone()
            .or_else(find_chromium)
            .ok_or_else(|| {
                FetchError::Browser("Chromium not found. Pass --chrome-path.".to_string())
            })?;

        BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--headless=new")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", USER_AGENT))
            .window_size(1920, 1080)
            .build()
            .map_err(FetchError::Browser)
    }

    async fn render(&self, browser: &Browser, url: &str) -> Result<String, FetchError> {
        let page = tokio::time::timeout(self.config.wait_timeout, browser.new_page(url))
            .await
            .map_err(|_| FetchError::Timeout {
                what: format!("navigation to {}", url),
                waited: self.config.wait_timeout,
            })?
            .map_err(|e| FetchError::Navigation(e.to_string()))?;

        self.wait_until_ready(&page).await?;
        tokio::time::sleep(self.config.settle_delay).await;

        let html = page
            .content()
            .await
            .map_err(|e| FetchError::Browser(format!("failed to read page HTML: {}", e)))?;
        let _ = page.close().await;
        Ok(html)
    }

    /// Polls until `ready_selector` matches or the wait timeout runs out
    async fn wait_until_ready(&self, page: &Page) -> Result<(), FetchError> {
        let deadline = Instant::now() + self.config.wait_timeout;
        loop {
            if page.find_element(self.config.ready_selector.as_str()).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FetchError::Timeout {
                    what: format!("'{}'", self.config.ready_selector),
                    waited: self.config.wait_timeout,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl DocumentFetcher for ChromiumFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let config = self.browser_config()?;
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(format!("failed to launch Chromium: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let started = Instant::now();
        let result = self.render(&browser, url).await;
        debug!(
            url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "render finished"
        );

        let _ = browser.close().await;
        let _ = browser.wait().await;
        handler_task.abort();

        result
    }
}

/// Plain HTTP fetcher for pages that need no client-side rendering
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests are bounded by `config.wait_timeout`
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.wait_timeout)
            .build()?;
        Ok(Self {
            client,
            timeout: config.wait_timeout,
        })
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    what: url.to_string(),
                    waited: self.timeout,
                }
            } else {
                FetchError::Http(e)
            }
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify)?
            .error_for_status()?;
        response.text().await.map_err(classify)
    }
}
