// src/ingest/types.rs
use chrono::{DateTime, Utc};

/// One candidate article extracted from a source, prior to persistence.
/// Produced by the feed parser or the site scraper; the enricher may fill
/// `full_content` and overwrite `published_at`/`description`/`author`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct RawItem {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub source: String, // source name, e.g. "Federal Register"
    pub full_content: Option<String>,
}

impl RawItem {
    pub fn new(source: &str, title: String, link: String) -> Self {
        Self {
            title,
            link,
            description: String::new(),
            published_at: None,
            author: None,
            source: source.to_string(),
            full_content: None,
        }
    }
}
