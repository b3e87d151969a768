//! Per-domain politeness: token buckets, jittered spacing and halt windows.
//!
//! Each domain (`host[:port]`) gets its own bucket, spacing clock and halt
//! deadline. `acquire` blocks until all three allow a request; the grant
//! itself is decided atomically under the domain lock so two workers can
//! never both pass the same spacing window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::config::RateLimitConfig;
use crate::urlkey;

/// Why a domain is being halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// 403 response.
    Forbidden,
    /// 429 response.
    RateLimited,
    /// A challenge page was recognized.
    Captcha,
}

impl BlockKind {
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            403 => Some(Self::Forbidden),
            429 => Some(Self::RateLimited),
            _ => None,
        }
    }
}

/// A single token bucket: capacity `C`, refill `R` tokens per second.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u32,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: f64::from(capacity),
            last_refill: Instant::now(),
        }
    }

    /// Refill is a pure function of elapsed time; tokens never exceed `C`.
    pub fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(f64::from(self.capacity));
        self.last_refill = now;
    }

    /// Consume `n` tokens if available.
    pub fn consume(&mut self, n: u32) -> bool {
        self.refill();
        if self.tokens >= f64::from(n) {
            self.tokens -= f64::from(n);
            true
        } else {
            false
        }
    }

    /// Seconds until `n` tokens are available; 0 if they already are.
    pub fn time_until_available(&mut self, n: u32) -> f64 {
        self.refill();
        if self.tokens >= f64::from(n) {
            0.0
        } else {
            (f64::from(n) - self.tokens) / self.refill_rate
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

/// State tracked per domain.
#[derive(Debug)]
struct DomainState {
    bucket: TokenBucket,
    last_request: Option<Instant>,
    halted_until: Option<Instant>,
    consecutive_errors: u32,
    strict_mode: bool,
}

impl DomainState {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config.max_tokens, config.refill_rate),
            last_request: None,
            halted_until: None,
            consecutive_errors: 0,
            strict_mode: false,
        }
    }
}

/// Snapshot of a domain's limiter state.
#[derive(Debug, Clone)]
pub struct DomainStats {
    pub domain: String,
    pub tokens: f64,
    pub max_tokens: u32,
    pub consecutive_errors: u32,
    pub strict_mode: bool,
    pub is_halted: bool,
    /// Remaining halt time, zero when open.
    pub halt_remaining: Duration,
}

/// Per-domain token-bucket rate limiter with halt windows.
pub struct TokenBucketLimiter {
    config: RateLimitConfig,
    halt_defaults: HaltDurations,
    domains: Mutex<HashMap<String, Arc<Mutex<DomainState>>>>,
}

/// Default halt windows per block kind.
#[derive(Debug, Clone, Copy)]
pub struct HaltDurations {
    pub forbidden: Duration,
    pub rate_limited: Duration,
    pub captcha: Duration,
}

impl Default for HaltDurations {
    fn default() -> Self {
        Self {
            forbidden: Duration::from_secs(60),
            rate_limited: Duration::from_secs(60),
            captcha: Duration::from_secs(120),
        }
    }
}

impl HaltDurations {
    fn for_kind(&self, kind: BlockKind) -> Duration {
        match kind {
            BlockKind::Forbidden => self.forbidden,
            BlockKind::RateLimited => self.rate_limited,
            BlockKind::Captcha => self.captcha,
        }
    }
}

impl TokenBucketLimiter {
    pub fn new(config: RateLimitConfig, halt_defaults: HaltDurations) -> Self {
        Self {
            config,
            halt_defaults,
            domains: Mutex::new(HashMap::new()),
        }
    }

    async fn domain_state(&self, domain: &str) -> Arc<Mutex<DomainState>> {
        let mut domains = self.domains.lock().await;
        domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainState::new(&self.config))))
            .clone()
    }

    fn jittered_delay(&self, strict: bool) -> f64 {
        let (low, high) = if strict {
            (self.config.strict_min_delay, self.config.strict_max_delay)
        } else {
            (self.config.min_delay, self.config.max_delay)
        };
        if high <= low {
            low
        } else {
            rand::thread_rng().gen_range(low..high)
        }
    }

    /// Block until a request to `url`'s domain may be sent.
    ///
    /// Order of gates: halt window, bucket token, jittered spacing. The wait
    /// for each gate happens with the domain lock released so that
    /// `report_block` from another worker can extend a halt mid-sleep.
    pub async fn acquire(&self, url: &str) {
        let domain = urlkey::domain(url);
        let state = self.domain_state(&domain).await;

        loop {
            let wait = {
                let mut st = state.lock().await;
                let now = Instant::now();

                let token_wait = st.bucket.time_until_available(1);
                if let Some(deadline) = st.halted_until {
                    if deadline > now {
                        Some(deadline - now)
                    } else {
                        st.halted_until = None;
                        continue;
                    }
                } else if token_wait > 0.0 {
                    Some(Duration::from_secs_f64(token_wait))
                } else {
                    let delay = Duration::from_secs_f64(self.jittered_delay(st.strict_mode));
                    let since_last = st.last_request.map(|t| now.duration_since(t));
                    match since_last {
                        Some(elapsed) if elapsed < delay => Some(delay - elapsed),
                        _ => {
                            st.bucket.consume(1);
                            st.last_request = Some(Instant::now());
                            return;
                        }
                    }
                }
            };

            if let Some(wait) = wait {
                tracing::trace!("Rate limiter sleeping {{ domain: {domain}, wait: {wait:?} }}");
                sleep(wait).await;
            }
        }
    }

    /// Halt the domain after a block response. `duration` overrides the
    /// kind-specific default.
    pub async fn report_block(&self, url: &str, kind: BlockKind, duration: Option<Duration>) {
        let domain = urlkey::domain(url);
        let state = self.domain_state(&domain).await;
        let duration = duration.unwrap_or_else(|| self.halt_defaults.for_kind(kind));

        let mut st = state.lock().await;
        st.halted_until = Some(Instant::now() + duration);
        st.consecutive_errors += 1;
        tracing::warn!(
            "Domain halted {{ domain: {domain}, kind: {kind:?}, duration: {duration:?} }}"
        );
    }

    /// A request to the domain completed successfully.
    pub async fn report_success(&self, url: &str) {
        let domain = urlkey::domain(url);
        let state = self.domain_state(&domain).await;
        state.lock().await.consecutive_errors = 0;
    }

    /// Toggle the wider strict-mode jitter interval for a domain.
    pub async fn set_strict(&self, url: &str, strict: bool) {
        let domain = urlkey::domain(url);
        let state = self.domain_state(&domain).await;
        state.lock().await.strict_mode = strict;
    }

    pub async fn stats(&self, url: &str) -> DomainStats {
        let domain = urlkey::domain(url);
        let state = self.domain_state(&domain).await;
        let mut st = state.lock().await;
        st.bucket.refill();
        let now = Instant::now();
        let halt_remaining = st
            .halted_until
            .filter(|deadline| *deadline > now)
            .map(|deadline| deadline - now)
            .unwrap_or_default();
        DomainStats {
            domain,
            tokens: st.bucket.tokens(),
            max_tokens: st.bucket.capacity(),
            consecutive_errors: st.consecutive_errors,
            strict_mode: st.strict_mode,
            is_halted: !halt_remaining.is_zero(),
            halt_remaining,
        }
    }
}
