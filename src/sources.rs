// src/sources.rs
//! Source configuration: compiled-in defaults, an optional TOML/JSON file
//! override, and dynamic sources merged in from the source store. A source
//! set is immutable for the duration of one scan.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ingest::normalize_url;

pub const ENV_SOURCES_PATH: &str = "SCANNER_SOURCES_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Scrape,
}

/// CSS-ish selector overrides for scrape sources. Every field is optional;
/// the scraper falls back to generic probes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeSelectors {
    /// Selector list for candidate article anchors/cards.
    pub item: Option<String>,
    /// Title sub-selector within a matched element.
    pub title: Option<String>,
    /// Publish-date sub-selector within a matched element.
    pub date: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    /// Base for resolving relative links; defaults to the page origin.
    pub base_url: Option<String>,
    /// Regex with (link, title) captures for script-rendered pages.
    pub title_regex: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Name for static sources, store-assigned id for dynamic ones.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub script_rendered: bool,
    #[serde(default)]
    pub selectors: Option<ScrapeSelectors>,
}

fn default_true() -> bool {
    true
}

impl Source {
    pub fn rss(name: &str, url: &str, region: &str) -> Self {
        Self {
            id: name.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            kind: SourceKind::Rss,
            region: region.to_string(),
            enabled: true,
            script_rendered: false,
            selectors: None,
        }
    }

    pub fn scrape(name: &str, url: &str, region: &str) -> Self {
        Self {
            kind: SourceKind::Scrape,
            ..Self::rss(name, url, region)
        }
    }
}

/// Compiled-in defaults. The file override and the source store can extend
/// or replace these per deployment.
pub fn static_sources() -> Vec<Source> {
    vec![
        Source::rss(
            "Federal Register",
            "https://www.federalregister.gov/documents/current.rss",
            "US",
        ),
        Source::rss(
            "SEC Press Releases",
            "https://www.sec.gov/news/pressreleases.rss",
            "US",
        ),
        Source::rss(
            "FTC Press Releases",
            "https://www.ftc.gov/feeds/press-release.xml",
            "US",
        ),
        Source::rss(
            "CFPB Newsroom",
            "https://www.consumerfinance.gov/about-us/newsroom/feed/",
            "US",
        ),
        Source::scrape(
            "DOJ Antitrust Press",
            "https://www.justice.gov/atr/press-releases",
            "US",
        ),
        Source::scrape("EDPB News", "https://www.edpb.europa.eu/news/news_en", "EU"),
        Source::scrape("FCA News", "https://www.fca.org.uk/news", "UK"),
    ]
}

/// Load sources from an explicit path. Supports TOML or JSON formats.
pub fn load_sources_from(path: &Path) -> Result<Vec<Source>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load the source file using env var + fallbacks:
/// 1) $SCANNER_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
/// No file means no override (empty list), not an error.
pub fn load_sources_default() -> Result<Vec<Source>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        }
        return Err(anyhow!("SCANNER_SOURCES_PATH points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<Source>> {
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported sources format"))
}

fn parse_toml(s: &str) -> Result<Vec<Source>> {
    #[derive(Deserialize)]
    struct TomlSources {
        sources: Vec<Source>,
    }
    let v: TomlSources = toml::from_str(s)?;
    Ok(clean_list(v.sources))
}

fn parse_json(s: &str) -> Result<Vec<Source>> {
    let v: Vec<Source> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

fn clean_list(items: Vec<Source>) -> Vec<Source> {
    items
        .into_iter()
        .filter(|s| !s.name.trim().is_empty() && !s.url.trim().is_empty())
        .map(|mut s| {
            if s.id.trim().is_empty() {
                s.id = s.name.clone();
            }
            s
        })
        .collect()
}

/// Merge layers in precedence order: static < file < dynamic. Later layers
/// win on a normalized-URL collision.
pub fn merge_sources(layers: Vec<Vec<Source>>) -> Vec<Source> {
    let mut merged: Vec<Source> = Vec::new();
    for layer in layers {
        for src in layer {
            let key = normalize_url(&src.url);
            if let Some(existing) = merged
                .iter_mut()
                .find(|s| normalize_url(&s.url) == key && !key.is_empty())
            {
                *existing = src;
            } else {
                merged.push(src);
            }
        }
    }
    merged
}

/// Restrict to enabled sources, optionally narrowed by id or name
/// (case-insensitive).
pub fn select_sources(sources: Vec<Source>, selected_ids: Option<&[String]>) -> Vec<Source> {
    sources
        .into_iter()
        .filter(|s| s.enabled)
        .filter(|s| match selected_ids {
            None => true,
            Some(ids) => ids
                .iter()
                .any(|id| id.eq_ignore_ascii_case(&s.id) || id.eq_ignore_ascii_case(&s.name)),
        })
        .collect()
}
