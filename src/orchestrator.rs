//! The coordinator that stitches every component together.
//!
//! A fixed pool of workers dequeues URLs and threads each one through the
//! limiter, the cache short-circuit, the escalating dispatcher, the raw store
//! and the caller-supplied extractor. The orchestrator uniquely owns every
//! subcomponent; workers hold shared references and nothing points back.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::agents::{RotationMode, UserAgentPool};
use crate::classify::SiteClassifier;
use crate::config::CrawlerConfig;
use crate::error::Result;
use crate::fetch::{BrowserFetcher, DriverFactory, FetchBackend, FetchDispatcher, HttpFetcher};
use crate::limiter::{HaltDurations, TokenBucketLimiter};
use crate::proxy::ProxyPool;
use crate::queue::{Priority, QueueStats, UrlQueue};
use crate::robots::RobotsCache;
use crate::store::RawStore;

/// Caller-supplied extraction function: `(url, body) -> data map`. Failures
/// are swallowed and logged; they never fail the URL.
pub type Extractor = dyn Fn(&str, &str) -> anyhow::Result<Map<String, Value>> + Send + Sync;

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    Idle,
    Running,
    Stopped,
}

/// Outcome of scraping one URL.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub url: String,
    pub success: bool,
    pub status_code: u16,
    #[serde(skip_serializing)]
    pub content: String,
    pub data: Map<String, Value>,
    pub error: Option<String>,
    pub response_time: f64,
    pub used_browser: bool,
    pub from_cache: bool,
}

impl ScrapeResult {
    fn failure(url: &str, status_code: u16, error: String) -> Self {
        Self {
            url: url.to_string(),
            success: false,
            status_code,
            content: String::new(),
            data: Map::new(),
            error: Some(error),
            response_time: 0.0,
            used_browser: false,
            from_cache: false,
        }
    }
}

#[derive(Debug)]
struct RunState {
    status: EngineStatus,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    urls_processed: u64,
    urls_successful: u64,
    urls_failed: u64,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            status: EngineStatus::Idle,
            started_at: None,
            finished_at: None,
            urls_processed: 0,
            urls_successful: 0,
            urls_failed: 0,
        }
    }
}

/// Aggregate statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub status: EngineStatus,
    pub urls_processed: u64,
    pub urls_successful: u64,
    pub urls_failed: u64,
    pub bytes_downloaded: u64,
    pub http_fetches: u64,
    pub browser_fetches: u64,
    pub duration_seconds: f64,
    pub success_rate: f64,
    pub queue: QueueStats,
}

struct Inner {
    config: CrawlerConfig,
    robots: Arc<RobotsCache>,
    limiter: Arc<TokenBucketLimiter>,
    proxies: Arc<ProxyPool>,
    queue: Arc<UrlQueue>,
    store: Arc<RawStore>,
    dispatcher: FetchDispatcher,
    extractor: Option<Box<Extractor>>,
    stop: AtomicBool,
    bytes_downloaded: AtomicU64,
    state: StdMutex<RunState>,
}

/// The crawling engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// Builder configuring an [`Orchestrator`].
pub struct CrawlerBuilder {
    config: CrawlerConfig,
    extractor: Option<Box<Extractor>>,
    driver_factory: Option<DriverFactory>,
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlerBuilder {
    pub fn new() -> Self {
        Self {
            config: CrawlerConfig::default(),
            extractor: None,
            driver_factory: None,
        }
    }

    /// Start from defaults overlaid with `SCRAPER_*` environment overrides.
    pub fn from_env() -> Self {
        Self {
            config: CrawlerConfig::from_env(),
            extractor: None,
            driver_factory: None,
        }
    }

    pub fn with_config(mut self, config: CrawlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Supply the extraction function run over each fetched body.
    pub fn with_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&str, &str) -> anyhow::Result<Map<String, Value>> + Send + Sync + 'static,
    {
        self.extractor = Some(Box::new(extractor));
        self
    }

    /// Wire in a headless-browser driver for the dynamic fetch path.
    pub fn with_browser_driver(mut self, factory: DriverFactory) -> Self {
        self.driver_factory = Some(factory);
        self
    }

    /// Consume the builder and assemble the engine.
    pub fn build(self) -> Result<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let robots = Arc::new(RobotsCache::new(
            config.respect_robots_txt,
            Duration::from_secs(config.robots_cache_ttl),
            &config.robots_user_agent,
            config.robots_cache_dir.clone(),
        )?);

        let halts = HaltDurations {
            forbidden: Duration::from_secs(config.halt_on_403),
            rate_limited: Duration::from_secs(config.halt_on_429),
            captcha: Duration::from_secs(config.halt_on_captcha),
        };
        let limiter = Arc::new(TokenBucketLimiter::new(config.rate_limit.clone(), halts));

        let agents = Arc::new(UserAgentPool::default());
        let proxies = Arc::new(ProxyPool::new(config.proxy.clone()));
        let queue = Arc::new(UrlQueue::new(config.max_queue_size, Some(robots.clone())));
        let store = Arc::new(RawStore::new(config.storage.raw_path()));

        let rotation = if config.user_agent_rotation {
            RotationMode::Random
        } else {
            RotationMode::RoundRobin
        };
        let http = HttpFetcher::new(
            agents,
            proxies.clone(),
            rotation,
            config.request_timeout_duration(),
            config.max_retries,
            config.retry_backoff,
        )?;
        let browser = BrowserFetcher::new(config.browser.clone(), self.driver_factory);
        let dispatcher = FetchDispatcher::new(
            http,
            browser,
            SiteClassifier::default(),
            limiter.clone(),
        );

        Ok(Orchestrator {
            inner: Arc::new(Inner {
                config,
                robots,
                limiter,
                proxies,
                queue,
                store,
                dispatcher,
                extractor: self.extractor,
                stop: AtomicBool::new(false),
                bytes_downloaded: AtomicU64::new(0),
                state: StdMutex::new(RunState::default()),
            }),
        })
    }
}

impl Orchestrator {
    /// Crawl a set of seed URLs with `workers` concurrent workers.
    pub async fn run(
        &self,
        urls: &[String],
        workers: usize,
        priority: Priority,
    ) -> Result<Vec<ScrapeResult>> {
        let inner = &self.inner;
        inner.config.ensure_directories()?;
        inner.stop.store(false, Ordering::SeqCst);
        inner.dispatcher.reset_counters();
        inner.bytes_downloaded.store(0, Ordering::Relaxed);
        {
            let mut state = inner.state.lock().expect("state lock");
            *state = RunState {
                status: EngineStatus::Running,
                started_at: Some(Instant::now()),
                ..RunState::default()
            };
        }

        let added = inner
            .queue
            .add_many(urls.iter().cloned(), priority)
            .await;
        tracing::info!("Seeded queue {{ added: {added}, submitted: {} }}", urls.len());

        if added == 0 {
            tracing::warn!("Nothing to crawl, every URL was filtered or duplicate");
            let mut state = inner.state.lock().expect("state lock");
            state.status = EngineStatus::Idle;
            state.finished_at = Some(Instant::now());
            return Ok(Vec::new());
        }

        let results = Arc::new(Mutex::new(Vec::with_capacity(added)));
        let workers = workers.max(1);
        tracing::info!("Starting workers {{ count: {workers} }}");

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let engine = self.clone();
                let results = results.clone();
                tokio::spawn(async move { engine.worker(id, results).await })
            })
            .collect();
        join_all(handles).await;

        self.inner.dispatcher.shutdown_browser().await;

        {
            let mut state = inner.state.lock().expect("state lock");
            state.finished_at = Some(Instant::now());
            if state.status == EngineStatus::Running {
                state.status = EngineStatus::Idle;
            }
        }

        let results = Arc::try_unwrap(results)
            .map(Mutex::into_inner)
            .unwrap_or_default();
        tracing::info!("Crawl finished {{ results: {} }}", results.len());
        Ok(results)
    }

    /// Crawl a single URL, bypassing the queue.
    pub async fn run_single(&self, url: &str) -> Result<ScrapeResult> {
        self.inner.config.ensure_directories()?;

        if !self.inner.robots.allowed(url).await {
            return Ok(ScrapeResult::failure(
                url,
                0,
                "blocked by robots.txt".to_string(),
            ));
        }

        let result = self.process_url(url).await;
        self.inner.dispatcher.shutdown_browser().await;
        Ok(result)
    }

    /// Ask workers to finish the URL in hand and exit.
    pub fn stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        let mut state = self.inner.state.lock().expect("state lock");
        state.status = EngineStatus::Stopped;
        tracing::info!("Stop requested, workers will drain");
    }

    pub async fn stats(&self) -> StatsSnapshot {
        let queue = self.inner.queue.stats().await;
        let state = self.inner.state.lock().expect("state lock");
        let duration = match (state.started_at, state.finished_at) {
            (Some(start), Some(end)) => end.duration_since(start),
            (Some(start), None) => start.elapsed(),
            _ => Duration::ZERO,
        };
        let success_rate = if state.urls_processed == 0 {
            0.0
        } else {
            state.urls_successful as f64 / state.urls_processed as f64 * 100.0
        };
        StatsSnapshot {
            status: state.status,
            urls_processed: state.urls_processed,
            urls_successful: state.urls_successful,
            urls_failed: state.urls_failed,
            bytes_downloaded: self.inner.bytes_downloaded.load(Ordering::Relaxed),
            http_fetches: self.inner.dispatcher.http_fetches(),
            browser_fetches: self.inner.dispatcher.browser_fetches(),
            duration_seconds: duration.as_secs_f64(),
            success_rate,
            queue,
        }
    }

    /// The configuration this engine was assembled with.
    pub fn config(&self) -> &CrawlerConfig {
        &self.inner.config
    }

    /// The proxy pool, for loading lists and starting health checks.
    pub fn proxy_pool(&self) -> Arc<ProxyPool> {
        self.inner.proxies.clone()
    }

    pub fn queue(&self) -> Arc<UrlQueue> {
        self.inner.queue.clone()
    }

    pub fn store(&self) -> Arc<RawStore> {
        self.inner.store.clone()
    }

    pub fn limiter(&self) -> Arc<TokenBucketLimiter> {
        self.inner.limiter.clone()
    }

    pub fn robots(&self) -> Arc<RobotsCache> {
        self.inner.robots.clone()
    }

    async fn worker(&self, id: usize, results: Arc<Mutex<Vec<ScrapeResult>>>) {
        let inner = &self.inner;
        loop {
            if inner.stop.load(Ordering::SeqCst) {
                tracing::debug!("Worker stopping {{ worker: {id} }}");
                break;
            }

            let Some(item) = inner.queue.get(Duration::from_secs(1)).await else {
                if inner.queue.is_empty().await {
                    break;
                }
                continue;
            };

            tracing::debug!("Worker processing {{ worker: {id}, url: {} }}", item.url);
            let result = self.process_url(&item.url).await;

            {
                let mut state = inner.state.lock().expect("state lock");
                state.urls_processed += 1;
                if result.success {
                    state.urls_successful += 1;
                } else {
                    state.urls_failed += 1;
                }
            }
            results.lock().await.push(result);
        }
    }

    /// The per-URL pipeline: limiter gate, cache short-circuit, escalating
    /// dispatch, store, extract, report.
    async fn process_url(&self, url: &str) -> ScrapeResult {
        let inner = &self.inner;

        inner.limiter.acquire(url).await;

        match inner.store.exists(url).await {
            Ok(true) => {
                tracing::info!("Loading from cache {{ url: {url} }}");
                let content = inner
                    .store
                    .load(url)
                    .await
                    .ok()
                    .flatten()
                    .unwrap_or_default();
                let status_code = inner
                    .store
                    .get_metadata(url)
                    .await
                    .ok()
                    .flatten()
                    .map(|record| record.status_code)
                    .unwrap_or(200);
                let data = self.run_extractor(url, &content);
                return ScrapeResult {
                    url: url.to_string(),
                    success: true,
                    status_code,
                    content,
                    data,
                    error: None,
                    response_time: 0.0,
                    used_browser: false,
                    from_cache: true,
                };
            }
            Ok(false) => {}
            Err(error) => {
                return ScrapeResult::failure(url, 0, format!("storage error: {error}"));
            }
        }

        let fetched = inner.dispatcher.dispatch(url).await;
        let used_browser = fetched.backend == FetchBackend::Dynamic;

        if !fetched.success() {
            let error = fetched
                .error
                .clone()
                .unwrap_or_else(|| format!("HTTP status {}", fetched.status));
            let mut result = ScrapeResult::failure(url, fetched.status, error);
            result.response_time = fetched.elapsed.as_secs_f64();
            result.used_browser = used_browser;
            return result;
        }

        // Store failures degrade softly: the page was fetched, so the result
        // still counts as a success.
        if let Err(error) = inner
            .store
            .save(url, &fetched.body, fetched.content_kind(), fetched.status)
            .await
        {
            tracing::error!("Store write failed {{ url: {url}, error: {error} }}");
        }
        inner
            .bytes_downloaded
            .fetch_add(fetched.body.len() as u64, Ordering::Relaxed);

        let data = self.run_extractor(url, &fetched.body);
        inner.limiter.report_success(url).await;

        ScrapeResult {
            url: url.to_string(),
            success: true,
            status_code: fetched.status,
            content: fetched.body,
            data,
            error: None,
            response_time: fetched.elapsed.as_secs_f64(),
            used_browser,
            from_cache: false,
        }
    }

    /// Run the extractor under a catch-all; its failure yields empty data,
    /// never a URL failure.
    fn run_extractor(&self, url: &str, content: &str) -> Map<String, Value> {
        let Some(extractor) = self.inner.extractor.as_ref() else {
            return Map::new();
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| extractor(url, content))) {
            Ok(Ok(data)) => data,
            Ok(Err(error)) => {
                tracing::error!("Extractor failed {{ url: {url}, error: {error} }}");
                Map::new()
            }
            Err(_) => {
                tracing::error!("Extractor panicked {{ url: {url} }}");
                Map::new()
            }
        }
    }
}
