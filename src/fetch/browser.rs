//! The dynamic fetch path: a seam for an external headless-browser driver.
//!
//! The engine never executes JavaScript itself. It drives whatever
//! [`BrowserDriver`] the caller wires in, hands it the request-interception
//! rules derived from configuration, and collects page errors alongside the
//! rendered content. Sessions are created lazily on first escalation and
//! closed when the orchestrator drains.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::config::BrowserConfig;
use crate::error::{CrawlError, Result};
use crate::fetch::{FetchBackend, FetchResult};

/// Resource classes a driver may be told to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Image,
    Font,
    Media,
    Stylesheet,
}

/// Request-interception rules handed to the driver at session start.
#[derive(Debug, Clone, Default)]
pub struct InterceptionRules {
    pub blocked_resource_types: Vec<ResourceType>,
    /// Substrings matched against request URLs.
    pub blocked_domains: Vec<String>,
}

impl InterceptionRules {
    pub fn from_config(config: &BrowserConfig) -> Self {
        let mut blocked_resource_types = Vec::new();
        if config.block_images {
            blocked_resource_types.push(ResourceType::Image);
        }
        if config.block_fonts {
            blocked_resource_types.push(ResourceType::Font);
        }
        if config.block_media {
            blocked_resource_types.push(ResourceType::Media);
        }
        if config.block_stylesheets {
            blocked_resource_types.push(ResourceType::Stylesheet);
        }
        let blocked_domains = if config.block_analytics {
            config.blocked_domains.clone()
        } else {
            Vec::new()
        };
        Self {
            blocked_resource_types,
            blocked_domains,
        }
    }

    /// Should a request for `url` of type `resource_type` be dropped?
    pub fn should_block(&self, resource_type: Option<ResourceType>, url: &str) -> bool {
        if let Some(kind) = resource_type {
            if self.blocked_resource_types.contains(&kind) {
                return true;
            }
        }
        let lowered = url.to_lowercase();
        self.blocked_domains
            .iter()
            .any(|blocked| lowered.contains(blocked.as_str()))
    }
}

/// Outcome of a navigation.
#[derive(Debug, Clone)]
pub struct Navigation {
    pub status: u16,
    pub final_url: String,
}

/// The contract an external headless-browser integration must satisfy.
///
/// `goto` is expected to wait until the network is idle before resolving.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&mut self, url: &str, timeout: Duration) -> Result<Navigation>;

    /// Wait for a CSS selector to appear. Implementations should resolve
    /// with an error on timeout; callers treat that as non-fatal.
    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    /// The rendered document.
    async fn content(&mut self) -> Result<String>;

    async fn close(&mut self) -> Result<()>;

    /// Page errors collected since the last navigation.
    fn page_errors(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Builds a fresh driver session with the given interception rules.
pub type DriverFactory = Box<
    dyn Fn(InterceptionRules) -> BoxFuture<'static, Result<Box<dyn BrowserDriver>>>
        + Send
        + Sync,
>;

/// Drives the configured [`BrowserDriver`] for escalated fetches.
pub struct BrowserFetcher {
    config: BrowserConfig,
    factory: Option<DriverFactory>,
    driver: Mutex<Option<Box<dyn BrowserDriver>>>,
}

impl BrowserFetcher {
    pub fn new(config: BrowserConfig, factory: Option<DriverFactory>) -> Self {
        Self {
            config,
            factory,
            driver: Mutex::new(None),
        }
    }

    /// Fetch a URL through the driver, creating the session on first use.
    ///
    /// Driver-level navigation failures come back as a failed
    /// [`FetchResult`]; only a missing driver is an `Err`.
    pub async fn fetch(&self, url: &str, wait_for: Option<&str>) -> Result<FetchResult> {
        let mut guard = self.driver.lock().await;
        if guard.is_none() {
            let factory = self.factory.as_ref().ok_or(CrawlError::DriverUnavailable)?;
            let rules = InterceptionRules::from_config(&self.config);
            tracing::debug!("Starting browser session {{ url: {url} }}");
            *guard = Some(factory(rules).await?);
        }
        let driver = guard.as_mut().expect("driver was just created");

        let start = Instant::now();
        let navigation = match driver.goto(url, self.config.timeout()).await {
            Ok(navigation) => navigation,
            Err(error) => {
                let mut result = FetchResult::failure(
                    url,
                    error.to_string(),
                    start.elapsed(),
                    FetchBackend::Dynamic,
                );
                result.js_errors = driver.page_errors();
                return Ok(result);
            }
        };

        if let Some(selector) = wait_for {
            // Missing selectors are tolerated; the page may just not have one.
            if let Err(error) = driver
                .wait_for_selector(selector, Duration::from_secs(10))
                .await
            {
                tracing::debug!(
                    "Selector wait failed {{ url: {url}, selector: {selector}, error: {error} }}"
                );
            }
        }

        let body = match driver.content().await {
            Ok(body) => body,
            Err(error) => {
                let mut result = FetchResult::failure(
                    url,
                    error.to_string(),
                    start.elapsed(),
                    FetchBackend::Dynamic,
                );
                result.js_errors = driver.page_errors();
                return Ok(result);
            }
        };

        Ok(FetchResult {
            url: url.to_string(),
            status: navigation.status,
            body,
            headers: Default::default(),
            elapsed: start.elapsed(),
            proxy_used: None,
            error: None,
            final_url: Some(navigation.final_url),
            js_errors: driver.page_errors(),
            backend: FetchBackend::Dynamic,
        })
    }

    /// Close the driver session if one exists.
    pub async fn shutdown(&self) {
        if let Some(mut driver) = self.driver.lock().await.take() {
            if let Err(error) = driver.close().await {
                tracing::debug!("Browser close failed {{ error: {error} }}");
            }
        }
    }

    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interception_rules_follow_config_flags() {
        let mut config = BrowserConfig::default();
        config.block_stylesheets = true;
        let rules = InterceptionRules::from_config(&config);

        assert!(rules.should_block(Some(ResourceType::Image), "https://cdn.example/pic.png"));
        assert!(rules.should_block(Some(ResourceType::Stylesheet), "https://cdn.example/a.css"));
        assert!(rules.should_block(None, "https://www.google-analytics.com/collect"));
        assert!(rules.should_block(None, "https://ads.example.com/banner"));
        assert!(!rules.should_block(None, "https://example.com/page"));
    }

    #[test]
    fn analytics_blocking_can_be_disabled() {
        let mut config = BrowserConfig::default();
        config.block_analytics = false;
        let rules = InterceptionRules::from_config(&config);
        assert!(!rules.should_block(None, "https://www.google-analytics.com/collect"));
    }

    #[tokio::test]
    async fn fetch_without_a_factory_is_driver_unavailable() {
        let fetcher = BrowserFetcher::new(BrowserConfig::default(), None);
        let outcome = fetcher.fetch("https://spa.example/app", None).await;
        assert!(matches!(outcome, Err(CrawlError::DriverUnavailable)));
    }
}
