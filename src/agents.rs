//! User-agent rotation with coherent browser fingerprints.
//!
//! Every profile carries the Client Hints that the real browser would send, so
//! a rotated `User-Agent` is never paired with headers it would not emit. In
//! particular only Chromium-family profiles carry `Sec-Ch-Ua*` and
//! `Sec-Fetch-*`; Firefox and Safari send neither. `Accept-Encoding` is left
//! unset so the transport negotiates and decompresses on its own.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// A complete browser fingerprint.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    pub user_agent: &'static str,
    /// Empty for browsers that do not send Client Hints.
    pub sec_ch_ua: &'static str,
    pub sec_ch_ua_mobile: &'static str,
    pub sec_ch_ua_platform: &'static str,
    pub accept_language: &'static str,
}

impl BrowserProfile {
    fn is_mobile(&self) -> bool {
        self.sec_ch_ua_mobile == "?1" || self.user_agent.contains("Mobile")
    }

    fn has_client_hints(&self) -> bool {
        !self.sec_ch_ua.is_empty()
    }
}

const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Curated modern fingerprints: Chrome/Edge with Client Hints, Firefox and
/// Safari without, plus one mobile profile of each family.
const BROWSER_PROFILES: &[BrowserProfile] = &[
    // Chrome on Windows
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
        sec_ch_ua_mobile: "?0",
        sec_ch_ua_platform: "\"Windows\"",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"119\", \"Google Chrome\";v=\"119\"",
        sec_ch_ua_mobile: "?0",
        sec_ch_ua_platform: "\"Windows\"",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
    // Chrome on macOS
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
        sec_ch_ua: "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
        sec_ch_ua_mobile: "?0",
        sec_ch_ua_platform: "\"macOS\"",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
    // Firefox on Windows
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
        sec_ch_ua: "",
        sec_ch_ua_mobile: "",
        sec_ch_ua_platform: "",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:120.0) Gecko/20100101 Firefox/120.0",
        sec_ch_ua: "",
        sec_ch_ua_mobile: "",
        sec_ch_ua_platform: "",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
    // Firefox on macOS
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
        sec_ch_ua: "",
        sec_ch_ua_mobile: "",
        sec_ch_ua_platform: "",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
    // Edge on Windows
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
        sec_ch_ua: "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Microsoft Edge\";v=\"120\"",
        sec_ch_ua_mobile: "?0",
        sec_ch_ua_platform: "\"Windows\"",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
    // Safari on macOS
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
        sec_ch_ua: "",
        sec_ch_ua_mobile: "",
        sec_ch_ua_platform: "",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
    // Chrome on Android (mobile)
    BrowserProfile {
        user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36",
        sec_ch_ua: "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
        sec_ch_ua_mobile: "?1",
        sec_ch_ua_platform: "\"Android\"",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
    // Safari on iPhone (mobile)
    BrowserProfile {
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1_1 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1",
        sec_ch_ua: "",
        sec_ch_ua_mobile: "",
        sec_ch_ua_platform: "",
        accept_language: DEFAULT_ACCEPT_LANGUAGE,
    },
];

/// Profile selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationMode {
    #[default]
    Random,
    RoundRobin,
}

/// Rotates browser fingerprints and builds the header set for a request.
pub struct UserAgentPool {
    profiles: Vec<BrowserProfile>,
    cursor: AtomicUsize,
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new(true)
    }
}

impl UserAgentPool {
    /// Build the pool from the curated profile list.
    pub fn new(include_mobile: bool) -> Self {
        let profiles = BROWSER_PROFILES
            .iter()
            .filter(|profile| include_mobile || !profile.is_mobile())
            .cloned()
            .collect();
        Self {
            profiles,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Build the pool from caller-supplied profiles.
    pub fn with_profiles(profiles: Vec<BrowserProfile>) -> Self {
        Self {
            profiles,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.len()
    }

    fn pick(&self, mode: RotationMode) -> &BrowserProfile {
        match mode {
            RotationMode::Random => self
                .profiles
                .choose(&mut rand::thread_rng())
                .expect("profile list is never empty"),
            RotationMode::RoundRobin => {
                let index = self.cursor.fetch_add(1, Ordering::Relaxed);
                &self.profiles[index % self.profiles.len()]
            }
        }
    }

    /// The `User-Agent` string alone, for callers that manage other headers.
    pub fn user_agent(&self, mode: RotationMode) -> &'static str {
        self.pick(mode).user_agent
    }

    /// A coherent header set for one request.
    pub fn headers(&self, mode: RotationMode) -> HeaderMap {
        let profile = self.pick(mode);
        let mut headers = HeaderMap::new();

        let mut put = |name: &'static str, value: &str| {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.insert(HeaderName::from_static(name), value);
            }
        };

        put("user-agent", profile.user_agent);
        put(
            "accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        );
        put("accept-language", profile.accept_language);
        put("dnt", "1");
        put("connection", "keep-alive");
        put("upgrade-insecure-requests", "1");

        if profile.has_client_hints() {
            put("sec-ch-ua", profile.sec_ch_ua);
            put("sec-ch-ua-mobile", profile.sec_ch_ua_mobile);
            put("sec-ch-ua-platform", profile.sec_ch_ua_platform);
            put("sec-fetch-dest", "document");
            put("sec-fetch-mode", "navigate");
            put("sec-fetch-site", "none");
            put("sec-fetch-user", "?1");
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mobile_profiles_can_be_filtered_out() {
        let all = UserAgentPool::new(true);
        let desktop = UserAgentPool::new(false);
        assert!(desktop.profile_count() < all.profile_count());
    }

    #[test]
    fn round_robin_cycles_through_every_profile() {
        let pool = UserAgentPool::new(true);
        let first: Vec<&str> = (0..pool.profile_count())
            .map(|_| pool.user_agent(RotationMode::RoundRobin))
            .collect();
        let second = pool.user_agent(RotationMode::RoundRobin);
        assert_eq!(first[0], second);
    }

    #[test]
    fn client_hints_only_accompany_chromium_agents() {
        let pool = UserAgentPool::new(true);
        for _ in 0..50 {
            let headers = pool.headers(RotationMode::Random);
            let ua = headers.get("user-agent").unwrap().to_str().unwrap();
            let chromium = ua.contains("Chrome/") || ua.contains("Edg/");
            assert_eq!(headers.contains_key("sec-ch-ua"), chromium);
            assert_eq!(headers.contains_key("sec-fetch-mode"), chromium);
        }
    }

    #[test]
    fn accept_encoding_is_left_to_the_transport() {
        let pool = UserAgentPool::new(true);
        let headers = pool.headers(RotationMode::RoundRobin);
        assert!(!headers.contains_key("accept-encoding"));
        assert!(headers.contains_key("accept"));
        assert!(headers.contains_key("upgrade-insecure-requests"));
    }
}
