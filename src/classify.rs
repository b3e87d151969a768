//! Heuristics deciding whether a page needs browser rendering.
//!
//! The full analysis scores an HTTP body against framework signatures, dynamic
//! markers and visible-text volume; the quick check is the cheap variant used
//! on the hot path after every successful static fetch.

use lazy_static::lazy_static;
use regex::{Regex, RegexBuilder};

fn pattern(raw: &str) -> Regex {
    RegexBuilder::new(raw)
        .case_insensitive(true)
        .build()
        .expect("classifier pattern is valid")
}

lazy_static! {
    static ref FRAMEWORK_PATTERNS: Vec<(&'static str, Vec<Regex>)> = vec![
        (
            "react",
            vec![
                pattern(r"react\.production\.min\.js"),
                pattern(r"react-dom"),
                pattern(r"__REACT_DEVTOOLS_GLOBAL_HOOK__"),
                pattern(r"data-reactroot"),
                pattern(r"_reactRootContainer"),
            ],
        ),
        (
            "vue",
            vec![
                pattern(r"vue\.js"),
                pattern(r"vue\.min\.js"),
                pattern(r"data-v-[a-f0-9]+"),
                pattern(r"__VUE__"),
            ],
        ),
        (
            "angular",
            vec![
                pattern(r"angular\.js"),
                pattern(r"angular\.min\.js"),
                pattern(r"ng-app"),
                pattern(r"ng-controller"),
                pattern(r"angular\.module"),
            ],
        ),
        (
            "next.js",
            vec![
                pattern(r"_next/static"),
                pattern(r"__NEXT_DATA__"),
                pattern(r"next\.js"),
            ],
        ),
        (
            "nuxt",
            vec![
                pattern(r"_nuxt"),
                pattern(r"__NUXT__"),
                pattern(r"nuxt\.js"),
            ],
        ),
        (
            "svelte",
            vec![pattern(r"svelte-[a-z0-9]+"), pattern(r"__svelte__")],
        ),
    ];

    static ref DYNAMIC_PATTERNS: Vec<Regex> = vec![
        pattern(r#"<div\s+id=["']app["']>\s*</div>"#),
        pattern(r#"<div\s+id=["']root["']>\s*</div>"#),
        pattern(r"window\.__INITIAL_STATE__"),
        pattern(r"window\.__PRELOADED_STATE__"),
        pattern(r"hydrate\s*\("),
        pattern(r"renderToString"),
    ];

    static ref STATIC_PATTERNS: Vec<Regex> = vec![
        pattern(r"<article[^>]*>[\s\S]{500,}</article>"),
        pattern(r"<main[^>]*>[\s\S]{500,}</main>"),
    ];

    static ref SCRIPT_RE: Regex = pattern(r"<script[^>]*>[\s\S]*?</script>");
    static ref STYLE_RE: Regex = pattern(r"<style[^>]*>[\s\S]*?</style>");
    static ref TAG_RE: Regex = pattern(r"<[^>]+>");
    static ref WHITESPACE_RE: Regex = pattern(r"\s+");
}

/// Substrings that mark a single-page-app shell on the quick path.
const SPA_SENTINELS: &[&str] = &[
    r#"<div id="root"></div>"#,
    r#"<div id="app"></div>"#,
    "__NEXT_DATA__",
    "_nuxt",
];

/// Rendering class of a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteKind {
    Static,
    Dynamic,
    Unknown,
}

/// Outcome of a full analysis.
#[derive(Debug, Clone)]
pub struct SiteAnalysis {
    pub url: String,
    pub kind: SiteKind,
    /// 0.0 (certainly static) to 1.0 (certainly dynamic).
    pub confidence: f64,
    pub detected_frameworks: Vec<&'static str>,
    pub requires_browser: bool,
    pub reasons: Vec<String>,
}

/// Scores HTTP bodies for JavaScript-rendering indicators.
#[derive(Debug, Clone)]
pub struct SiteClassifier {
    min_content_length: usize,
}

impl Default for SiteClassifier {
    fn default() -> Self {
        Self {
            min_content_length: 500,
        }
    }
}

impl SiteClassifier {
    pub fn new(min_content_length: usize) -> Self {
        Self { min_content_length }
    }

    fn detect_frameworks(content: &str) -> Vec<&'static str> {
        FRAMEWORK_PATTERNS
            .iter()
            .filter(|(_, patterns)| patterns.iter().any(|p| p.is_match(content)))
            .map(|(name, _)| *name)
            .collect()
    }

    /// Visible text with scripts, styles and tags stripped, whitespace
    /// collapsed.
    pub fn visible_text(html: &str) -> String {
        let no_scripts = SCRIPT_RE.replace_all(html, "");
        let no_styles = STYLE_RE.replace_all(&no_scripts, "");
        let no_tags = TAG_RE.replace_all(&no_styles, " ");
        WHITESPACE_RE.replace_all(&no_tags, " ").trim().to_string()
    }

    /// Full analysis of a fetched body.
    pub fn analyze(&self, url: &str, content: &str) -> SiteAnalysis {
        let mut confidence: f64 = 0.5;
        let mut reasons = Vec::new();

        let frameworks = Self::detect_frameworks(content);
        if !frameworks.is_empty() {
            reasons.push(format!("detected frameworks: {}", frameworks.join(", ")));
            confidence += 0.2;
        }

        let dynamic_hits = DYNAMIC_PATTERNS
            .iter()
            .filter(|p| p.is_match(content))
            .count();
        if dynamic_hits > 0 {
            reasons.push(format!("found {dynamic_hits} dynamic marker(s)"));
            confidence += 0.15;
        }

        let text = Self::visible_text(content);
        if text.len() < self.min_content_length {
            reasons.push(format!("low text content ({} chars)", text.len()));
            confidence += 0.15;
        } else {
            reasons.push(format!("sufficient text content ({} chars)", text.len()));
            confidence -= 0.2;
        }

        if STATIC_PATTERNS.iter().any(|p| p.is_match(content)) {
            reasons.push("content appears fully rendered".to_string());
            confidence -= 0.3;
        }

        let confidence = confidence.clamp(0.0, 1.0);
        let (kind, requires_browser) = if confidence > 0.6 {
            (SiteKind::Dynamic, true)
        } else if confidence < 0.4 {
            (SiteKind::Static, false)
        } else {
            (SiteKind::Unknown, !frameworks.is_empty())
        };

        SiteAnalysis {
            url: url.to_string(),
            kind,
            confidence,
            detected_frameworks: frameworks,
            requires_browser,
            reasons,
        }
    }

    /// Cheap hot-path check: does this body look like an unrendered shell?
    pub fn quick_check(&self, content: &str) -> bool {
        if content.len() < 1000 {
            return true;
        }
        if SPA_SENTINELS.iter().any(|s| content.contains(s)) {
            return true;
        }
        Self::visible_text(content).len() < 200
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(words: usize) -> String {
        std::iter::repeat("content").take(words).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn quick_check_flags_short_bodies() {
        let classifier = SiteClassifier::default();
        assert!(classifier.quick_check("<html><body><div id=\"root\"></div></body></html>"));
    }

    #[test]
    fn quick_check_flags_spa_sentinels_in_long_bodies() {
        let classifier = SiteClassifier::default();
        let body = format!(
            "<html><body><div id=\"root\"></div><p>{}</p></body></html>",
            filler(400)
        );
        assert!(body.len() >= 1000);
        assert!(classifier.quick_check(&body));
    }

    #[test]
    fn quick_check_passes_substantial_pages() {
        let classifier = SiteClassifier::default();
        let body = format!("<html><body><p>{}</p></body></html>", filler(400));
        assert!(!classifier.quick_check(&body));
    }

    #[test]
    fn analyze_marks_empty_spa_shell_dynamic() {
        let classifier = SiteClassifier::default();
        let body = r#"<html><head><script src="/_next/static/chunks/main.js"></script></head>
            <body><div id="root"></div><script>window.__NEXT_DATA__ = {}</script></body></html>"#;
        let analysis = classifier.analyze("https://spa.example", body);
        assert_eq!(analysis.kind, SiteKind::Dynamic);
        assert!(analysis.requires_browser);
        assert!(analysis.detected_frameworks.contains(&"next.js"));
    }

    #[test]
    fn analyze_marks_article_pages_static() {
        let classifier = SiteClassifier::default();
        let body = format!(
            "<html><body><article>{}</article></body></html>",
            filler(300)
        );
        let analysis = classifier.analyze("https://blog.example", &body);
        assert_eq!(analysis.kind, SiteKind::Static);
        assert!(!analysis.requires_browser);
        assert!(analysis.confidence < 0.4);
    }

    #[test]
    fn visible_text_strips_markup_and_collapses_whitespace() {
        let text = SiteClassifier::visible_text(
            "<html><script>var x = 1;</script><style>p {}</style><p>Hello   <b>world</b></p></html>",
        );
        assert_eq!(text, "Hello world");
    }
}
