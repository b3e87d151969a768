//! The default extraction function used by the CLI.
//!
//! The engine itself is extractor-agnostic; anything matching
//! [`crate::orchestrator::Extractor`] can be wired in. This one pulls the
//! basic page descriptors most crawls want: title, meta description, first
//! heading, link count and a text preview.

use anyhow::Result;
use scraper::{Html, Selector};
use serde_json::{Map, Value};

use crate::classify::SiteClassifier;

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|error| anyhow::anyhow!("{error:?}"))
}

/// Extract basic page descriptors from an HTML body.
pub fn default_extractor(_url: &str, html: &str) -> Result<Map<String, Value>> {
    let document = Html::parse_document(html);

    let title = document
        .select(&selector("title")?)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let description = document
        .select(&selector(r#"meta[name="description"]"#)?)
        .next()
        .and_then(|el| el.value().attr("content"))
        .unwrap_or_default()
        .to_string();

    let h1 = document
        .select(&selector("h1")?)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default();

    let links_count = document
        .select(&selector("a[href]")?)
        .filter(|el| {
            el.value()
                .attr("href")
                .map(|href| href.starts_with("http"))
                .unwrap_or(false)
        })
        .count();

    let text = SiteClassifier::visible_text(html);
    let preview: String = text.chars().take(500).collect();

    let mut data = Map::new();
    data.insert("title".to_string(), Value::String(title));
    data.insert("description".to_string(), Value::String(description));
    data.insert("h1".to_string(), Value::String(h1));
    data.insert("links_count".to_string(), Value::from(links_count));
    data.insert("text_length".to_string(), Value::from(text.len()));
    data.insert("text_preview".to_string(), Value::String(preview));
    Ok(data)
}
