//! `crawlkit` is a polite, concurrent web crawling engine. It turns a queue of
//! URLs into persisted, de-duplicated, rate-limited fetch outcomes while
//! respecting `robots.txt` guidelines and rotating client identities.
//!
//! The engine is assembled through [`CrawlerBuilder`] and driven through
//! [`Orchestrator`]: a worker pool pulls URLs from a priority queue, gates
//! each one through a per-domain token-bucket limiter, fetches statically
//! (escalating to a caller-wired headless-browser driver when the body looks
//! unrendered or the server blocks), stores the raw payload idempotently and
//! runs the caller's extraction function over it.
//!
//! ```no_run
//! use crawlkit::{CrawlerBuilder, Priority};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let crawler = CrawlerBuilder::from_env().build()?;
//! let results = crawler
//!     .run(&["https://example.com".to_string()], 3, Priority::Normal)
//!     .await?;
//! for result in &results {
//!     println!("{} -> {}", result.url, result.status_code);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agents;
pub mod classify;
pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod fetch;
pub mod limiter;
pub mod orchestrator;
pub mod proxy;
pub mod queue;
pub mod robots;
pub mod store;
pub mod urlkey;

pub use agents::{BrowserProfile, RotationMode, UserAgentPool};
pub use classify::{SiteAnalysis, SiteClassifier, SiteKind};
pub use config::{
    BrowserConfig, CrawlerConfig, ProxyConfig, RateLimitConfig, RotationStrategy, StorageConfig,
};
pub use error::{CrawlError, Result};
pub use export::{ExportFormat, Exporter};
pub use fetch::{
    BrowserDriver, BrowserFetcher, DriverFactory, FetchBackend, FetchDispatcher, FetchResult,
    HttpFetcher, InterceptionRules, Navigation, ResourceType,
};
pub use limiter::{BlockKind, TokenBucket, TokenBucketLimiter};
pub use orchestrator::{CrawlerBuilder, EngineStatus, Orchestrator, ScrapeResult, StatsSnapshot};
pub use proxy::{ProxyEntry, ProxyLease, ProxyPool, ProxyType};
pub use queue::{Priority, QueueItem, QueueStats, UrlQueue};
pub use robots::RobotsCache;
pub use store::{ContentKind, RawStore, StoredRecord};
