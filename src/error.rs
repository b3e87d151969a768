//! Error types shared across the crawling engine.

use thiserror::Error;

/// Errors produced while coordinating fetches.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The URL is disallowed by the target's `robots.txt`.
    #[error("blocked by robots.txt: {url}")]
    PolicyDenied { url: String },

    /// The server answered with a block status (403/429).
    #[error("blocked with status {status}")]
    Blocked { status: u16 },

    /// A transport-level failure: timeout, DNS, connection refused.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Dynamic rendering was required but no browser driver is configured.
    #[error("dynamic fetch required but no browser driver is configured")]
    DriverUnavailable,

    /// A failure inside a configured browser driver.
    #[error("browser driver error: {0}")]
    Driver(String),

    /// Filesystem failure in the raw store or robots cache.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The URL could not be parsed at all.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Configuration that cannot be acted on (bad paths, zero rates, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization of an index or export record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite export failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Crate-wide result alias.
pub type Result<T, E = CrawlError> = std::result::Result<T, E>;
