//! The unified fetch surface: static HTTP first, browser escalation under
//! policy.

mod browser;
mod http;

pub use browser::{
    BrowserDriver, BrowserFetcher, DriverFactory, InterceptionRules, Navigation, ResourceType,
};
pub use http::HttpFetcher;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::classify::SiteClassifier;
use crate::error::CrawlError;
use crate::limiter::{BlockKind, TokenBucketLimiter};
use crate::store::ContentKind;

/// Which backend produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchBackend {
    Static,
    Dynamic,
}

/// Outcome of a fetch through either backend.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub url: String,
    /// 0 when the request never produced a response.
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub elapsed: Duration,
    pub proxy_used: Option<String>,
    pub error: Option<String>,
    /// Where the browser ended up after redirects, dynamic fetches only.
    pub final_url: Option<String>,
    pub js_errors: Vec<String>,
    pub backend: FetchBackend,
}

impl FetchResult {
    pub(crate) fn failure(url: &str, error: String, elapsed: Duration, backend: FetchBackend) -> Self {
        Self {
            url: url.to_string(),
            status: 0,
            body: String::new(),
            headers: HashMap::new(),
            elapsed,
            proxy_used: None,
            error: Some(error),
            final_url: None,
            js_errors: Vec::new(),
            backend,
        }
    }

    pub fn success(&self) -> bool {
        (200..300).contains(&self.status) && self.error.is_none()
    }

    /// 403/429: the politeness machinery must react.
    pub fn is_blocked(&self) -> bool {
        matches!(self.status, 403 | 429)
    }

    /// Stored payload kind, judged from the response `Content-Type`.
    pub fn content_kind(&self) -> ContentKind {
        self.headers
            .get("content-type")
            .map(|value| ContentKind::from_content_type(value))
            .unwrap_or(ContentKind::Html)
    }
}

/// Tries the static backend and escalates to the dynamic one under policy.
///
/// Exactly one of the two backend counters is incremented per dispatched URL.
pub struct FetchDispatcher {
    http: HttpFetcher,
    browser: BrowserFetcher,
    classifier: SiteClassifier,
    limiter: Arc<TokenBucketLimiter>,
    http_fetches: AtomicU64,
    browser_fetches: AtomicU64,
}

impl FetchDispatcher {
    pub fn new(
        http: HttpFetcher,
        browser: BrowserFetcher,
        classifier: SiteClassifier,
        limiter: Arc<TokenBucketLimiter>,
    ) -> Self {
        Self {
            http,
            browser,
            classifier,
            limiter,
            http_fetches: AtomicU64::new(0),
            browser_fetches: AtomicU64::new(0),
        }
    }

    pub fn http_fetches(&self) -> u64 {
        self.http_fetches.load(Ordering::Relaxed)
    }

    pub fn browser_fetches(&self) -> u64 {
        self.browser_fetches.load(Ordering::Relaxed)
    }

    /// Zero both backend counters; a new run starts its accounting fresh.
    pub(crate) fn reset_counters(&self) {
        self.http_fetches.store(0, Ordering::Relaxed);
        self.browser_fetches.store(0, Ordering::Relaxed);
    }

    /// Fetch one URL through the escalation ladder:
    ///
    /// 1. static fetch;
    /// 2. success that still looks unrendered ⇒ dynamic re-fetch;
    /// 3. 403/429 ⇒ halt the domain, then dynamic re-fetch;
    /// 4. otherwise the static result stands.
    #[tracing::instrument(skip(self))]
    pub async fn dispatch(&self, url: &str) -> FetchResult {
        let static_result = self.http.fetch(url, None).await;

        if static_result.success() {
            if self.classifier.quick_check(&static_result.body) {
                tracing::info!("Escalating to browser {{ url: {url} }}");
                return self.escalate(url, static_result).await;
            }
            self.http_fetches.fetch_add(1, Ordering::Relaxed);
            return static_result;
        }

        if static_result.is_blocked() {
            if let Some(kind) = BlockKind::from_status(static_result.status) {
                self.limiter.report_block(url, kind, None).await;
            }
            tracing::warn!(
                "Blocked, escalating to browser {{ url: {url}, status: {} }}",
                static_result.status
            );
            return self.escalate(url, static_result).await;
        }

        self.http_fetches.fetch_add(1, Ordering::Relaxed);
        static_result
    }

    /// Dynamic re-fetch; falls back to the static result when no driver is
    /// configured.
    async fn escalate(&self, url: &str, static_result: FetchResult) -> FetchResult {
        match self.browser.fetch(url, None).await {
            Ok(dynamic) => {
                self.browser_fetches.fetch_add(1, Ordering::Relaxed);
                dynamic
            }
            Err(CrawlError::DriverUnavailable) => {
                tracing::warn!(
                    "No browser driver configured, keeping static result {{ url: {url} }}"
                );
                self.http_fetches.fetch_add(1, Ordering::Relaxed);
                static_result
            }
            Err(error) => {
                self.browser_fetches.fetch_add(1, Ordering::Relaxed);
                FetchResult::failure(url, error.to_string(), Duration::ZERO, FetchBackend::Dynamic)
            }
        }
    }

    /// Close the dynamic session if one was spun up.
    pub async fn shutdown_browser(&self) {
        self.browser.shutdown().await;
    }
}
