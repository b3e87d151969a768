//! URL identity helpers: normalization, dedup fingerprints and storage keys.
//!
//! The dedup fingerprint and the storage key are deliberately distinct. The
//! fingerprint is a cheap 64-bit digest of the *normalized* URL so that
//! `https://E.com/a` and `https://e.com/a/` collapse to one queue entry. The
//! storage key is a 16-hex-char digest of the *raw* URL, long enough to be
//! collision-safe as a filename.

use sha2::{Digest, Sha256};
use url::Url;

/// Normalize a URL for deduplication: strip the trailing slash and lowercase.
pub fn normalize(url: &str) -> String {
    url.trim_end_matches('/').to_lowercase()
}

/// 64-bit dedup fingerprint of the normalized URL.
pub fn fingerprint(url: &str) -> u64 {
    let digest = Sha256::digest(normalize(url).as_bytes());
    u64::from_be_bytes(digest[..8].try_into().expect("digest is 32 bytes"))
}

/// Filesystem-safe storage key: first 16 hex chars of SHA-256 over the raw URL.
pub fn storage_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// The rate-limiting key: `host[:port]`.
pub fn domain(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default();
            match parsed.port() {
                Some(port) => format!("{host}:{port}"),
                None => host.to_string(),
            }
        }
        Err(_) => url.to_string(),
    }
}

/// The robots key: `scheme://host[:port]`.
pub fn origin(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    })
}

/// Location of `robots.txt` for the URL's origin.
pub fn robots_url(url: &str) -> Option<String> {
    origin(url).map(|o| format!("{o}/robots.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_case_and_trailing_slash() {
        assert_eq!(normalize("https://E.com/a/"), "https://e.com/a");
        assert_eq!(normalize("https://e.com/a"), "https://e.com/a");
    }

    #[test]
    fn fingerprint_is_stable_across_equivalent_urls() {
        let a = fingerprint("https://e.com/a");
        assert_eq!(a, fingerprint("https://e.com/a/"));
        assert_eq!(a, fingerprint("https://E.com/a"));
        assert_ne!(a, fingerprint("https://e.com/b"));
    }

    #[test]
    fn storage_key_is_sixteen_hex_chars_of_the_raw_url() {
        let key = storage_key("https://example.com/page");
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
        // Raw URL, not normalized: a trailing slash changes the key.
        assert_ne!(key, storage_key("https://example.com/page/"));
    }

    #[test]
    fn domain_keeps_explicit_ports() {
        assert_eq!(domain("https://example.com/page"), "example.com");
        assert_eq!(domain("http://localhost:8000/test"), "localhost:8000");
        assert_eq!(domain("https://api.example.com/v1"), "api.example.com");
    }

    #[test]
    fn origin_and_robots_url() {
        assert_eq!(
            origin("https://example.com/a/b").as_deref(),
            Some("https://example.com")
        );
        assert_eq!(
            robots_url("http://localhost:8000/test").as_deref(),
            Some("http://localhost:8000/robots.txt")
        );
    }
}
