//! Fetching, caching and evaluating `robots.txt` rules.
//!
//! Verdicts are cached per origin (`scheme://host[:port]`) both in memory and
//! on disk, bounded by a TTL. Missing files (404) and forbidden files (403)
//! mean the site has no rules, so everything is allowed; any other status or a
//! transport error is treated conservatively as deny-all for the TTL.
//! Concurrent misses for one origin coalesce into a single fetch.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use robotstxt::DefaultMatcher;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::urlkey;

/// Ruleset used when an origin cannot be checked.
const DENY_ALL: &str = "User-agent: *\nDisallow: /";

/// Cached rules for one origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RobotsEntry {
    body: String,
    crawl_delay: Option<f64>,
    /// Unix seconds at fetch time.
    fetched_at: f64,
}

impl RobotsEntry {
    fn new(body: String) -> Self {
        let crawl_delay = parse_crawl_delay(&body);
        Self {
            body,
            crawl_delay,
            fetched_at: unix_now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        unix_now() - self.fetched_at < ttl.as_secs_f64()
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Scan the body for a `Crawl-delay` directive.
fn parse_crawl_delay(body: &str) -> Option<f64> {
    body.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .find(|line| line.to_ascii_lowercase().contains("crawl-delay"))
        .and_then(|line| line.split(':').last())
        .and_then(|value| value.trim().parse().ok())
}

/// TTL-bounded `robots.txt` cache answering `allowed` and `crawl_delay`.
pub struct RobotsCache {
    client: reqwest::Client,
    respect: bool,
    ttl: Duration,
    user_agent: String,
    cache_dir: PathBuf,
    entries: Mutex<HashMap<String, Arc<Mutex<Option<RobotsEntry>>>>>,
}

impl RobotsCache {
    /// `user_agent` is the token evaluated against the rules, `*` by default.
    pub fn new(respect: bool, ttl: Duration, user_agent: &str, cache_dir: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            respect,
            ttl,
            user_agent: user_agent.to_string(),
            cache_dir,
            entries: Mutex::new(HashMap::new()),
        })
    }

    /// May this URL be fetched? Unconditionally true when robots-respecting is
    /// disabled.
    pub async fn allowed(&self, url: &str) -> bool {
        if !self.respect {
            return true;
        }
        let Some(origin) = urlkey::origin(url) else {
            // Unparseable URLs fail later at fetch time, not here.
            return true;
        };
        let entry = self.entry_for(&origin).await;
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&entry.body, &self.user_agent, url)
    }

    /// The `Crawl-delay` the origin requests, if any.
    pub async fn crawl_delay(&self, url: &str) -> Option<f64> {
        if !self.respect {
            return None;
        }
        let origin = urlkey::origin(url)?;
        self.entry_for(&origin).await.crawl_delay
    }

    /// Drop every cached verdict, in memory and on disk.
    pub async fn clear_cache(&self) {
        self.entries.lock().await.clear();
        if self.cache_dir.is_dir() {
            let _ = std::fs::remove_dir_all(&self.cache_dir);
        }
    }

    /// Fresh entry for an origin, loading or fetching as needed. The
    /// per-origin lock is held across the fetch so concurrent callers
    /// coalesce into one request.
    async fn entry_for(&self, origin: &str) -> RobotsEntry {
        let slot = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(origin.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None)))
                .clone()
        };

        let mut guard = slot.lock().await;
        if let Some(entry) = guard.as_ref() {
            if entry.is_fresh(self.ttl) {
                return entry.clone();
            }
        }

        if let Some(entry) = self.load_from_disk(origin).await {
            if entry.is_fresh(self.ttl) {
                *guard = Some(entry.clone());
                return entry;
            }
        }

        let entry = RobotsEntry::new(self.fetch_ruleset(origin).await);
        self.persist_to_disk(origin, &entry).await;
        *guard = Some(entry.clone());
        entry
    }

    /// Fetch `<origin>/robots.txt` and map the outcome to a ruleset.
    #[tracing::instrument(skip(self))]
    async fn fetch_ruleset(&self, origin: &str) -> String {
        let robots_url = format!("{origin}/robots.txt");
        match self.client.get(&robots_url).send().await {
            Ok(response) => match response.status().as_u16() {
                200 => response.text().await.unwrap_or_else(|_| DENY_ALL.to_string()),
                403 | 404 => {
                    tracing::debug!(
                        "No robots.txt, everything allowed {{ origin: {origin} }}"
                    );
                    String::new()
                }
                status => {
                    tracing::debug!(
                        "Unexpected robots.txt status, denying all {{ origin: {origin}, status: {status} }}"
                    );
                    DENY_ALL.to_string()
                }
            },
            Err(error) => {
                tracing::debug!(
                    "robots.txt fetch failed, denying all {{ origin: {origin}, error: {error} }}"
                );
                DENY_ALL.to_string()
            }
        }
    }

    fn disk_path(&self, origin: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.json", urlkey::storage_key(origin)))
    }

    async fn load_from_disk(&self, origin: &str) -> Option<RobotsEntry> {
        let raw = tokio::fs::read_to_string(self.disk_path(origin)).await.ok()?;
        serde_json::from_str(&raw).ok()
    }

    async fn persist_to_disk(&self, origin: &str, entry: &RobotsEntry) {
        if let Err(error) = tokio::fs::create_dir_all(&self.cache_dir).await {
            tracing::debug!("robots cache dir unavailable {{ error: {error} }}");
            return;
        }
        match serde_json::to_vec(entry) {
            Ok(bytes) => {
                if let Err(error) = tokio::fs::write(self.disk_path(origin), bytes).await {
                    tracing::debug!("robots cache write failed {{ origin: {origin}, error: {error} }}");
                }
            }
            Err(error) => {
                tracing::debug!("robots entry serialization failed {{ error: {error} }}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cache(respect: bool, dir: &std::path::Path) -> RobotsCache {
        RobotsCache::new(respect, Duration::from_secs(3600), "*", dir.to_path_buf()).unwrap()
    }

    #[test]
    fn crawl_delay_is_line_scanned() {
        assert_eq!(
            parse_crawl_delay("User-agent: *\nCrawl-delay: 7\nDisallow: /private"),
            Some(7.0)
        );
        assert_eq!(parse_crawl_delay("User-agent: *\nDisallow:"), None);
        assert_eq!(
            parse_crawl_delay("# Crawl-delay: 9\nUser-agent: *"),
            None
        );
    }

    #[tokio::test]
    async fn disallowed_paths_are_denied_and_others_allowed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(true, dir.path());

        assert!(!cache.allowed(&format!("{}/private/page", server.uri())).await);
        assert!(cache.allowed(&format!("{}/public", server.uri())).await);
    }

    #[tokio::test]
    async fn missing_robots_means_allow_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(true, dir.path());
        assert!(cache.allowed(&format!("{}/x", server.uri())).await);
    }

    #[tokio::test]
    async fn server_errors_mean_deny_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(true, dir.path());
        assert!(!cache.allowed(&format!("{}/x", server.uri())).await);
    }

    #[tokio::test]
    async fn disabled_respect_allows_everything_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(false, dir.path());
        // No server exists at this address; no fetch may happen.
        assert!(cache.allowed("https://nonexistent.invalid/private").await);
    }

    #[tokio::test]
    async fn verdicts_are_cached_for_the_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow:"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(true, dir.path());
        for _ in 0..5 {
            assert!(cache.allowed(&format!("{}/page", server.uri())).await);
        }
    }

    #[tokio::test]
    async fn crawl_delay_is_exposed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nCrawl-delay: 3\nDisallow:"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = cache(true, dir.path());
        assert_eq!(
            cache.crawl_delay(&format!("{}/page", server.uri())).await,
            Some(3.0)
        );
    }

    #[tokio::test]
    async fn concurrent_lookups_coalesce_into_one_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow:"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(cache(true, dir.path()));
        let url = format!("{}/page", server.uri());

        let lookups = (0..8).map(|_| {
            let cache = cache.clone();
            let url = url.clone();
            async move { cache.allowed(&url).await }
        });
        let verdicts = futures::future::join_all(lookups).await;
        assert!(verdicts.into_iter().all(|allowed| allowed));
    }
}
