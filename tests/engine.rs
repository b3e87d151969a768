//! End-to-end tests driving the orchestrator against mock servers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crawlkit::{
    BrowserDriver, CrawlError, CrawlerBuilder, CrawlerConfig, DriverFactory, Navigation, Priority,
    QueueItem, Result,
};

/// A driver that always "renders" the same content.
struct ScriptedDriver {
    body: String,
    visits: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    last_url: String,
}

#[async_trait]
impl BrowserDriver for ScriptedDriver {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<Navigation> {
        self.visits.fetch_add(1, Ordering::SeqCst);
        self.last_url = url.to_string();
        Ok(Navigation {
            status: 200,
            final_url: url.to_string(),
        })
    }

    async fn wait_for_selector(&mut self, _selector: &str, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn content(&mut self) -> Result<String> {
        Ok(self.body.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn scripted_factory(
    body: &str,
    visits: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
) -> DriverFactory {
    let body = body.to_string();
    Box::new(move |_rules| {
        let body = body.clone();
        let visits = visits.clone();
        let closed = closed.clone();
        Box::pin(async move {
            Ok(Box::new(ScriptedDriver {
                body,
                visits,
                closed,
                last_url: String::new(),
            }) as Box<dyn BrowserDriver>)
        })
    })
}

/// Fast test configuration rooted in a temp directory.
fn test_config(dir: &tempfile::TempDir, respect_robots: bool) -> CrawlerConfig {
    let mut config = CrawlerConfig::default();
    config.storage.base_path = dir.path().join("storage");
    config.robots_cache_dir = dir.path().join("robots-cache");
    config.respect_robots_txt = respect_robots;
    config.rate_limit.max_tokens = 50;
    config.rate_limit.refill_rate = 100.0;
    config.rate_limit.min_delay = 0.001;
    config.rate_limit.max_delay = 0.002;
    config.max_retries = 0;
    config.request_timeout = 5.0;
    config
}

fn long_static_page(marker: &str) -> String {
    format!(
        "<html><body><article>{} {}</article></body></html>",
        marker,
        "solid readable prose ".repeat(120)
    )
}

async fn mount_allow_all_robots(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow:"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn end_to_end_crawl_stores_extracts_and_reruns_from_cache() {
    let server = MockServer::start().await;
    mount_allow_all_robots(&server).await;
    for page in ["p1", "p2", "p3"] {
        Mock::given(method("GET"))
            .and(path(format!("/{page}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(long_static_page(page))
                    .insert_header("content-type", "text/html"),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let urls: Vec<String> = ["p1", "p2", "p3"]
        .iter()
        .map(|p| format!("{}/{p}", server.uri()))
        .collect();

    let crawler = CrawlerBuilder::new()
        .with_config(test_config(&dir, true))
        .with_extractor(|_url, body| {
            let mut data = Map::new();
            data.insert(
                "has_article".to_string(),
                Value::Bool(body.contains("<article>")),
            );
            Ok(data)
        })
        .build()
        .unwrap();

    let results = crawler.run(&urls, 2, Priority::Normal).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.success));
    assert!(results.iter().all(|r| r.data["has_article"] == Value::Bool(true)));

    let stats = crawler.stats().await;
    assert_eq!(stats.urls_processed, 3);
    assert_eq!(stats.urls_successful, 3);
    assert_eq!(stats.http_fetches, 3);
    assert_eq!(stats.browser_fetches, 0);
    assert!(stats.bytes_downloaded > 0);
    assert!((stats.success_rate - 100.0).abs() < f64::EPSILON);

    // Every page is in the store.
    let store = crawler.store();
    for url in &urls {
        assert!(store.exists(url).await.unwrap());
    }

    // A fresh engine over the same storage performs zero network fetches.
    let warm = CrawlerBuilder::new()
        .with_config(test_config(&dir, true))
        .build()
        .unwrap();
    let rerun = warm.run(&urls, 2, Priority::Normal).await.unwrap();
    assert_eq!(rerun.len(), 3);
    assert!(rerun.iter().all(|r| r.success && r.from_cache));

    let warm_stats = warm.stats().await;
    assert_eq!(warm_stats.http_fetches, 0);
    assert_eq!(warm_stats.browser_fetches, 0);
}

#[tokio::test]
async fn spa_shells_escalate_to_the_browser_driver() {
    let server = MockServer::start().await;
    mount_allow_all_robots(&server).await;
    // Short body with an SPA sentinel: quick check must fire.
    Mock::given(method("GET"))
        .and(path("/app"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"<html><body><div id="root"></div></body></html>"#),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let visits = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let rendered = long_static_page("rendered by browser");

    let crawler = CrawlerBuilder::new()
        .with_config(test_config(&dir, true))
        .with_browser_driver(scripted_factory(&rendered, visits.clone(), closed.clone()))
        .build()
        .unwrap();

    let url = format!("{}/app", server.uri());
    let results = crawler
        .run(&[url.clone()], 1, Priority::Normal)
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success);
    assert!(result.used_browser);
    assert!(result.content.contains("rendered by browser"));
    assert_eq!(visits.load(Ordering::SeqCst), 1);
    // The orchestrator closes the driver on drain.
    assert!(closed.load(Ordering::SeqCst));

    let stats = crawler.stats().await;
    assert_eq!(stats.browser_fetches, 1);
    assert_eq!(stats.http_fetches, 0);
}

#[tokio::test]
async fn blocked_status_halts_the_domain_and_reports_the_proxy() {
    let target = MockServer::start().await;
    mount_allow_all_robots(&target).await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&target)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir, false);
    config.halt_on_429 = 30;
    config.proxy.enabled = true;

    let crawler = CrawlerBuilder::new().with_config(config).build().unwrap();
    // The target doubles as the proxy endpoint.
    crawler
        .proxy_pool()
        .add_proxy(&target.uri(), crawlkit::ProxyType::Datacenter)
        .await;

    let url = format!("{}/page", target.uri());
    let result = crawler.run_single(&url).await.unwrap();

    // No driver is wired, so the blocked static result stands as the failure.
    assert!(!result.success);
    assert_eq!(result.status_code, 429);

    // The domain is halted for the configured window.
    let domain_stats = crawler.limiter().stats(&url).await;
    assert!(domain_stats.is_halted);
    assert!(domain_stats.halt_remaining > Duration::from_secs(25));

    // The proxy took the blame.
    let proxy = crawler.proxy_pool().entry(0).await.unwrap();
    assert_eq!(proxy.failure_count, 1);
}

#[tokio::test]
async fn blocked_status_escalates_to_the_browser_when_wired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/guarded"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let visits = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let rendered = long_static_page("past the wall");

    let mut config = test_config(&dir, false);
    config.halt_on_403 = 1;
    let crawler = CrawlerBuilder::new()
        .with_config(config)
        .with_browser_driver(scripted_factory(&rendered, visits.clone(), closed))
        .build()
        .unwrap();

    let url = format!("{}/guarded", server.uri());
    let result = crawler.run_single(&url).await.unwrap();

    assert!(result.success);
    assert!(result.used_browser);
    assert_eq!(visits.load(Ordering::SeqCst), 1);
    let stats = crawler.stats().await;
    assert_eq!(stats.browser_fetches, 1);
}

#[tokio::test]
async fn robots_rules_gate_enqueueing_and_run_single() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(200).set_body_string(long_static_page("public")))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let crawler = CrawlerBuilder::new()
        .with_config(test_config(&dir, true))
        .build()
        .unwrap();

    let private = format!("{}/private", server.uri());
    let public = format!("{}/public", server.uri());

    // Denied at enqueue time.
    let queue = crawler.queue();
    assert!(queue.add(QueueItem::new(private.clone(), Priority::Normal)).await.is_err());
    assert!(queue.add(QueueItem::new(public.clone(), Priority::Normal)).await.is_ok());
    assert_eq!(queue.stats().await.filtered_robots, 1);

    // Denied on run_single as a failure result.
    let result = crawler.run_single(&private).await.unwrap();
    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("robots"));

    // With respect disabled, the same URL is accepted.
    let dir2 = tempfile::tempdir().unwrap();
    let permissive = CrawlerBuilder::new()
        .with_config(test_config(&dir2, false))
        .build()
        .unwrap();
    assert!(permissive
        .queue()
        .add(QueueItem::new(private, Priority::Normal))
        .await
        .is_ok());
}

#[tokio::test]
async fn transport_failures_produce_failure_results_not_hangs() {
    let dir = tempfile::tempdir().unwrap();
    let crawler = CrawlerBuilder::new()
        .with_config(test_config(&dir, false))
        .build()
        .unwrap();

    // Nothing listens here.
    let results = crawler
        .run(&["http://127.0.0.1:9/offline".to_string()], 1, Priority::Normal)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(results[0].error.is_some());

    let stats = crawler.stats().await;
    assert_eq!(stats.urls_failed, 1);
    assert_eq!(stats.http_fetches, 1);
}

#[tokio::test]
async fn extractor_failures_degrade_to_empty_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(long_static_page("fine")))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let crawler = CrawlerBuilder::new()
        .with_config(test_config(&dir, false))
        .with_extractor(|_url, _body| anyhow::bail!("selector soup"))
        .build()
        .unwrap();

    let result = crawler
        .run_single(&format!("{}/page", server.uri()))
        .await
        .unwrap();
    assert!(result.success);
    assert!(result.data.is_empty());
}

#[tokio::test]
async fn counter_identity_holds_across_cached_and_fetched_urls() {
    let server = MockServer::start().await;
    for page in ["a", "b"] {
        Mock::given(method("GET"))
            .and(path(format!("/{page}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(long_static_page(page)))
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let urls: Vec<String> = ["a", "b"]
        .iter()
        .map(|p| format!("{}/{p}", server.uri()))
        .collect();

    let crawler = CrawlerBuilder::new()
        .with_config(test_config(&dir, false))
        .build()
        .unwrap();
    crawler.run(&urls, 2, Priority::Normal).await.unwrap();

    // Second engine: one warm URL, one cold.
    let cold = format!("{}/c", server.uri());
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(ResponseTemplate::new(200).set_body_string(long_static_page("c")))
        .mount(&server)
        .await;

    let second = CrawlerBuilder::new()
        .with_config(test_config(&dir, false))
        .build()
        .unwrap();
    let results = second
        .run(&[urls[0].clone(), cold], 2, Priority::Normal)
        .await
        .unwrap();

    let cached_hits = results.iter().filter(|r| r.from_cache).count() as u64;
    let stats = second.stats().await;
    assert_eq!(cached_hits, 1);
    assert_eq!(
        stats.http_fetches + stats.browser_fetches,
        stats.urls_processed - cached_hits
    );
}

#[tokio::test]
async fn missing_driver_surfaces_as_driver_unavailable_error_kind() {
    // Direct check of the error type at the fetcher seam.
    let fetcher = crawlkit::BrowserFetcher::new(crawlkit::BrowserConfig::default(), None);
    match fetcher.fetch("https://spa.example", None).await {
        Err(CrawlError::DriverUnavailable) => {}
        other => panic!("expected DriverUnavailable, got {other:?}"),
    }
}
