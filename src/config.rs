//! Engine configuration.
//!
//! Every knob has a documented default and can be overridden through
//! `SCRAPER_*` environment variables. The configuration is constructed once at
//! startup and threaded to components as an immutable snapshot; nothing in the
//! engine reads the environment after that.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CrawlError, Result};

/// Parse an environment variable, ignoring unset or malformed values.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env::var(key).ok().map(|raw| {
        matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

/// Token-bucket rate limiting knobs. Env prefix: `SCRAPER_RATE_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum tokens held per domain bucket.
    pub max_tokens: u32,
    /// Tokens added per second.
    pub refill_rate: f64,
    /// Minimum jittered spacing between requests to one domain, seconds.
    pub min_delay: f64,
    /// Maximum jittered spacing, seconds.
    pub max_delay: f64,
    /// Spacing bounds used while a domain is in strict mode.
    pub strict_min_delay: f64,
    pub strict_max_delay: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_tokens: 5,
            refill_rate: 0.5,
            min_delay: 2.0,
            max_delay: 5.0,
            strict_min_delay: 10.0,
            strict_max_delay: 30.0,
        }
    }
}

impl RateLimitConfig {
    fn apply_env(&mut self) {
        if let Some(v) = env_parse("SCRAPER_RATE_MAX_TOKENS") {
            self.max_tokens = v;
        }
        if let Some(v) = env_parse("SCRAPER_RATE_REFILL_RATE") {
            self.refill_rate = v;
        }
        if let Some(v) = env_parse("SCRAPER_RATE_MIN_DELAY") {
            self.min_delay = v;
        }
        if let Some(v) = env_parse("SCRAPER_RATE_MAX_DELAY") {
            self.max_delay = v;
        }
        if let Some(v) = env_parse("SCRAPER_RATE_STRICT_MIN_DELAY") {
            self.strict_min_delay = v;
        }
        if let Some(v) = env_parse("SCRAPER_RATE_STRICT_MAX_DELAY") {
            self.strict_max_delay = v;
        }
    }
}

/// Proxy selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    Random,
    RoundRobin,
}

impl FromStr for RotationStrategy {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "round_robin" => Ok(Self::RoundRobin),
            other => Err(format!("unknown rotation strategy: {other}")),
        }
    }
}

/// Proxy pool knobs. Env prefix: `SCRAPER_PROXY_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Route requests through the pool when true.
    pub enabled: bool,
    /// Optional proxy list file, one URL per line.
    pub proxy_file: Option<PathBuf>,
    pub rotation_strategy: RotationStrategy,
    /// Seconds between background health checks.
    pub health_check_interval: u64,
    /// Consecutive failures before a proxy is excluded from selection.
    pub max_failures: u32,
    /// Echo endpoint used for health checks.
    pub health_check_url: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            proxy_file: None,
            rotation_strategy: RotationStrategy::Random,
            health_check_interval: 300,
            max_failures: 3,
            health_check_url: "https://httpbin.org/ip".to_string(),
        }
    }
}

impl ProxyConfig {
    fn apply_env(&mut self) {
        if let Some(v) = env_bool("SCRAPER_PROXY_ENABLED") {
            self.enabled = v;
        }
        if let Some(v) = env_parse::<RotationStrategy>("SCRAPER_PROXY_ROTATION_STRATEGY") {
            self.rotation_strategy = v;
        }
        if let Some(v) = env_parse("SCRAPER_PROXY_HEALTH_CHECK_INTERVAL") {
            self.health_check_interval = v;
        }
        if let Some(v) = env_parse("SCRAPER_PROXY_MAX_FAILURES") {
            self.max_failures = v;
        }
        if let Ok(v) = env::var("SCRAPER_PROXY_FILE") {
            self.proxy_file = Some(PathBuf::from(v));
        }
    }
}

/// Headless browser knobs for the dynamic fetch path. Env prefix:
/// `SCRAPER_BROWSER_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub headless: bool,
    /// Page load timeout in milliseconds.
    pub timeout_ms: u64,
    pub block_images: bool,
    pub block_fonts: bool,
    pub block_media: bool,
    pub block_stylesheets: bool,
    pub block_analytics: bool,
    /// Substrings matched against request URLs to drop trackers and ads.
    pub blocked_domains: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            timeout_ms: 30_000,
            block_images: true,
            block_fonts: true,
            block_media: true,
            block_stylesheets: false,
            block_analytics: true,
            blocked_domains: vec![
                "google-analytics.com".to_string(),
                "googletagmanager.com".to_string(),
                "facebook.com".to_string(),
                "doubleclick.net".to_string(),
                "analytics.".to_string(),
                "tracker.".to_string(),
                "ads.".to_string(),
            ],
        }
    }
}

impl BrowserConfig {
    fn apply_env(&mut self) {
        if let Some(v) = env_bool("SCRAPER_BROWSER_HEADLESS") {
            self.headless = v;
        }
        if let Some(v) = env_parse("SCRAPER_BROWSER_TIMEOUT") {
            self.timeout_ms = v;
        }
        if let Some(v) = env_bool("SCRAPER_BROWSER_BLOCK_IMAGES") {
            self.block_images = v;
        }
        if let Some(v) = env_bool("SCRAPER_BROWSER_BLOCK_FONTS") {
            self.block_fonts = v;
        }
        if let Some(v) = env_bool("SCRAPER_BROWSER_BLOCK_MEDIA") {
            self.block_media = v;
        }
        if let Some(v) = env_bool("SCRAPER_BROWSER_BLOCK_STYLESHEETS") {
            self.block_stylesheets = v;
        }
        if let Some(v) = env_bool("SCRAPER_BROWSER_BLOCK_ANALYTICS") {
            self.block_analytics = v;
        }
        if let Ok(raw) = env::var("SCRAPER_BROWSER_BLOCKED_DOMAINS") {
            self.blocked_domains = raw
                .split(',')
                .map(|part| part.trim().to_string())
                .filter(|part| !part.is_empty())
                .collect();
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Storage layout knobs. Env prefix: `SCRAPER_STORAGE_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_path: PathBuf,
    pub raw_subdir: String,
    pub export_subdir: String,
    pub sqlite_db_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("storage"),
            raw_subdir: "raw".to_string(),
            export_subdir: "exports".to_string(),
            sqlite_db_name: "scraped_data.db".to_string(),
        }
    }
}

impl StorageConfig {
    fn apply_env(&mut self) {
        if let Ok(v) = env::var("SCRAPER_STORAGE_BASE_PATH") {
            self.base_path = PathBuf::from(v);
        }
        if let Ok(v) = env::var("SCRAPER_STORAGE_RAW_SUBDIR") {
            self.raw_subdir = v;
        }
        if let Ok(v) = env::var("SCRAPER_STORAGE_EXPORT_SUBDIR") {
            self.export_subdir = v;
        }
    }

    /// Directory holding raw fetched pages and the metadata index.
    pub fn raw_path(&self) -> PathBuf {
        self.base_path.join(&self.raw_subdir)
    }

    /// Directory exporters write into.
    pub fn export_path(&self) -> PathBuf {
        self.base_path.join(&self.export_subdir)
    }
}

/// Aggregated engine configuration. Env prefix: `SCRAPER_`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    pub rate_limit: RateLimitConfig,
    pub proxy: ProxyConfig,
    pub browser: BrowserConfig,
    pub storage: StorageConfig,

    /// Rotate the full browser-fingerprint header set per request.
    pub user_agent_rotation: bool,
    pub respect_robots_txt: bool,
    /// Seconds a cached robots.txt verdict stays authoritative.
    pub robots_cache_ttl: u64,
    /// Disk cache directory for robots.txt bodies.
    pub robots_cache_dir: PathBuf,
    /// User-agent token evaluated against robots rules.
    pub robots_user_agent: String,

    /// Static fetch timeout, seconds.
    pub request_timeout: f64,
    /// Transport-failure retries per static fetch.
    pub max_retries: u32,
    /// Exponential backoff multiplier between retries.
    pub retry_backoff: f64,

    /// Halt durations, seconds, keyed by block kind.
    pub halt_on_403: u64,
    pub halt_on_429: u64,
    pub halt_on_captcha: u64,

    /// Upper bound on queued URLs.
    pub max_queue_size: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            proxy: ProxyConfig::default(),
            browser: BrowserConfig::default(),
            storage: StorageConfig::default(),
            user_agent_rotation: true,
            respect_robots_txt: true,
            robots_cache_ttl: 3600,
            robots_cache_dir: PathBuf::from(".cache/robots"),
            robots_user_agent: "*".to_string(),
            request_timeout: 30.0,
            max_retries: 3,
            retry_backoff: 2.0,
            halt_on_403: 60,
            halt_on_429: 60,
            halt_on_captcha: 120,
            max_queue_size: 10_000,
        }
    }
}

impl CrawlerConfig {
    /// Defaults overlaid with any `SCRAPER_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.rate_limit.apply_env();
        config.proxy.apply_env();
        config.browser.apply_env();
        config.storage.apply_env();

        if let Some(v) = env_bool("SCRAPER_USER_AGENT_ROTATION") {
            config.user_agent_rotation = v;
        }
        if let Some(v) = env_bool("SCRAPER_RESPECT_ROBOTS_TXT") {
            config.respect_robots_txt = v;
        }
        if let Some(v) = env_parse("SCRAPER_ROBOTS_CACHE_TTL") {
            config.robots_cache_ttl = v;
        }
        if let Some(v) = env_parse("SCRAPER_MAX_RETRIES") {
            config.max_retries = v;
        }
        if let Some(v) = env_parse("SCRAPER_RETRY_BACKOFF") {
            config.retry_backoff = v;
        }
        if let Some(v) = env_parse("SCRAPER_HALT_ON_403") {
            config.halt_on_403 = v;
        }
        if let Some(v) = env_parse("SCRAPER_HALT_ON_429") {
            config.halt_on_429 = v;
        }
        if let Some(v) = env_parse("SCRAPER_HALT_ON_CAPTCHA") {
            config.halt_on_captcha = v;
        }
        if let Some(v) = env_parse("SCRAPER_MAX_QUEUE_SIZE") {
            config.max_queue_size = v;
        }

        config
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.max_tokens == 0 {
            return Err(CrawlError::InvalidConfig(
                "rate_limit.max_tokens must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.refill_rate <= 0.0 {
            return Err(CrawlError::InvalidConfig(
                "rate_limit.refill_rate must be positive".to_string(),
            ));
        }
        if self.rate_limit.min_delay > self.rate_limit.max_delay {
            return Err(CrawlError::InvalidConfig(
                "rate_limit.min_delay exceeds max_delay".to_string(),
            ));
        }
        if self.retry_backoff < 1.0 {
            return Err(CrawlError::InvalidConfig(
                "retry_backoff must be >= 1.0".to_string(),
            ));
        }
        Ok(())
    }

    /// Create the storage directories if they don't exist.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.storage.raw_path())?;
        std::fs::create_dir_all(self.storage.export_path())?;
        Ok(())
    }

    pub fn request_timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.request_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CrawlerConfig::default();
        assert_eq!(config.rate_limit.max_tokens, 5);
        assert!((config.rate_limit.refill_rate - 0.5).abs() < f64::EPSILON);
        assert!(config.respect_robots_txt);
        assert_eq!(config.robots_cache_ttl, 3600);
        assert_eq!(config.halt_on_captcha, 120);
        assert_eq!(config.storage.raw_path(), PathBuf::from("storage/raw"));
        assert_eq!(
            config.storage.export_path(),
            PathBuf::from("storage/exports")
        );
    }

    #[test]
    fn rotation_strategy_parses_both_variants() {
        assert_eq!(
            "round_robin".parse::<RotationStrategy>().unwrap(),
            RotationStrategy::RoundRobin
        );
        assert_eq!(
            "RANDOM".parse::<RotationStrategy>().unwrap(),
            RotationStrategy::Random
        );
        assert!("sticky".parse::<RotationStrategy>().is_err());
    }

    #[test]
    fn validation_rejects_zero_refill() {
        let mut config = CrawlerConfig::default();
        config.rate_limit.refill_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_inverted_delay_bounds() {
        let mut config = CrawlerConfig::default();
        config.rate_limit.min_delay = 10.0;
        config.rate_limit.max_delay = 1.0;
        assert!(config.validate().is_err());
    }
}
