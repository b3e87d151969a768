//! Static HTTP fetching with user-agent rotation, proxy routing and
//! transport-failure retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::redirect::Policy;
use tokio::sync::Mutex;

use crate::agents::{RotationMode, UserAgentPool};
use crate::error::Result;
use crate::fetch::{FetchBackend, FetchResult};
use crate::proxy::{ProxyLease, ProxyPool};

/// First retry delay; subsequent delays multiply by the configured backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// Retry delays never exceed this.
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry policy for transport failures. HTTP statuses are never retried
/// here; block statuses take the halt + escalation path instead.
#[derive(Debug, Clone)]
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: f64,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), down-jittered up to 25%
    /// so synchronized workers spread out.
    fn delay(&self, attempt: u32) -> Duration {
        let base = RETRY_BASE_DELAY.as_secs_f64() * self.backoff.powi(attempt as i32);
        let capped = base.min(RETRY_MAX_DELAY.as_secs_f64());
        let jitter = 1.0 - rand::thread_rng().gen::<f64>() * 0.25;
        Duration::from_secs_f64(capped * jitter)
    }
}

fn is_retryable(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

/// Async HTTP fetcher for static content.
pub struct HttpFetcher {
    agents: Arc<UserAgentPool>,
    proxies: Arc<ProxyPool>,
    rotation: RotationMode,
    timeout: Duration,
    retry: RetryPolicy,
    direct_client: reqwest::Client,
    /// One client per proxy URL; reqwest clients pool connections, so
    /// rebuilding per request would defeat keep-alive.
    proxy_clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpFetcher {
    pub fn new(
        agents: Arc<UserAgentPool>,
        proxies: Arc<ProxyPool>,
        rotation: RotationMode,
        timeout: Duration,
        max_retries: u32,
        retry_backoff: f64,
    ) -> Result<Self> {
        let direct_client = Self::client_builder(timeout).build()?;
        Ok(Self {
            agents,
            proxies,
            rotation,
            timeout,
            retry: RetryPolicy {
                max_retries,
                backoff: retry_backoff,
            },
            direct_client,
            proxy_clients: Mutex::new(HashMap::new()),
        })
    }

    fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(timeout)
            .redirect(Policy::default())
    }

    async fn client_for(&self, lease: Option<&ProxyLease>) -> Result<reqwest::Client> {
        let Some(lease) = lease else {
            return Ok(self.direct_client.clone());
        };
        let mut clients = self.proxy_clients.lock().await;
        if let Some(client) = clients.get(&lease.url) {
            return Ok(client.clone());
        }
        let client = Self::client_builder(self.timeout)
            .proxy(reqwest::Proxy::all(&lease.url)?)
            .build()?;
        clients.insert(lease.url.clone(), client.clone());
        Ok(client)
    }

    /// Fetch a URL, retrying transport failures with exponential backoff.
    /// Proxy outcomes are reported per attempt.
    #[tracing::instrument(skip(self, extra_headers))]
    pub async fn fetch(&self, url: &str, extra_headers: Option<HeaderMap>) -> FetchResult {
        let mut headers = self.agents.headers(self.rotation);
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let lease = self.proxies.get().await;
        let client = match self.client_for(lease.as_ref()).await {
            Ok(client) => client,
            Err(error) => {
                return FetchResult::failure(
                    url,
                    error.to_string(),
                    Duration::ZERO,
                    FetchBackend::Static,
                );
            }
        };

        let start = Instant::now();
        let mut attempt = 0;
        loop {
            match client.get(url).headers(headers.clone()).send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let response_headers: HashMap<String, String> = response
                        .headers()
                        .iter()
                        .filter_map(|(name, value)| {
                            value
                                .to_str()
                                .ok()
                                .map(|v| (name.as_str().to_string(), v.to_string()))
                        })
                        .collect();
                    let body = response.text().await.unwrap_or_default();
                    let elapsed = start.elapsed();

                    let result = FetchResult {
                        url: url.to_string(),
                        status,
                        body,
                        headers: response_headers,
                        elapsed,
                        proxy_used: lease.as_ref().map(|l| l.url.clone()),
                        error: None,
                        final_url: None,
                        js_errors: Vec::new(),
                        backend: FetchBackend::Static,
                    };

                    if let Some(lease) = lease.as_ref() {
                        if result.success() {
                            self.proxies.report_success(lease, elapsed).await;
                        } else if result.is_blocked() {
                            self.proxies.report_failure(lease).await;
                        }
                    }
                    return result;
                }
                Err(error) => {
                    if attempt < self.retry.max_retries && is_retryable(&error) {
                        let delay = self.retry.delay(attempt);
                        tracing::debug!(
                            "Retrying after transport error {{ url: {url}, attempt: {attempt}, delay: {delay:?}, error: {error} }}"
                        );
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if let Some(lease) = lease.as_ref() {
                        self.proxies.report_failure(lease).await;
                    }
                    let message = if error.is_timeout() {
                        "request timed out".to_string()
                    } else {
                        error.to_string()
                    };
                    let mut result = FetchResult::failure(
                        url,
                        message,
                        start.elapsed(),
                        FetchBackend::Static,
                    );
                    result.proxy_used = lease.as_ref().map(|l| l.url.clone());
                    return result;
                }
            }
        }
    }
}
