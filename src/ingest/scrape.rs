// src/ingest/scrape.rs
//! HTML site scraper for sources without a feed.
//!
//! Two extraction strategies: DOM queries over a parsed document (default),
//! and a regex-only pass for script-rendered pages or invalid selector
//! config. The scraper never raises past its boundary; a total failure is an
//! empty item list with an error string, and "fetched fine but found nothing"
//! is an empty list with no error (the orchestrator reports that source as
//! degraded rather than failing).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use crate::ingest::feed::parse_feed_date;
use crate::ingest::fetch::{fetch_with_retry, BROWSER_USER_AGENT, DEFAULT_MAX_RETRIES};
use crate::ingest::normalize_text;
use crate::ingest::types::RawItem;
use crate::sources::{ScrapeSelectors, Source};

pub const MAX_DOM_ITEMS: usize = 20;
pub const MAX_REGEX_ITEMS: usize = 20;
pub const MAX_FALLBACK_ITEMS: usize = 15;

const MIN_TITLE_LEN: usize = 15;
const MAX_TITLE_LEN: usize = 300;
const STOPLIST: &[&str] = &["view all", "read more", "subscribe"];

/// Anchor patterns tried in order when a source configures no item selector.
const DEFAULT_ITEM_SELECTORS: &[&str] = &[
    "article h2 a[href], article h3 a[href]",
    ".card a[href], .news-item a[href], .views-row a[href]",
    "h2 a[href], h3 a[href]",
    ".post a[href], li a[href]",
];

static ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static DATE_PROBE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"time, .date, [class*="date"]"#).unwrap());
static BYLINE_PROBE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#".byline, .author, [rel="author"], [class*="byline"]"#).unwrap());

static RE_ANCHOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<a[^>]+href=["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap());

#[derive(Debug)]
pub struct ScrapeOutcome {
    pub items: Vec<RawItem>,
    pub error: Option<String>,
    pub retries_used: u32,
}

/// Fetch a scrape source and extract candidate items.
pub async fn scrape_site(client: &reqwest::Client, source: &Source) -> ScrapeOutcome {
    let fetched = fetch_with_retry(
        client,
        &source.url,
        &[("User-Agent", BROWSER_USER_AGENT)],
        DEFAULT_MAX_RETRIES,
    )
    .await;
    let retries_used = fetched.attempts.saturating_sub(1);

    let Some(html) = fetched.body else {
        return ScrapeOutcome {
            items: Vec::new(),
            error: fetched
                .error
                .or_else(|| Some(format!("fetch failed for {}", source.url))),
            retries_used,
        };
    };

    let cfg = source.selectors.clone().unwrap_or_default();

    if source.script_rendered {
        let items = regex_extract(&html, source, &cfg, MAX_REGEX_ITEMS);
        return ScrapeOutcome {
            items,
            error: None,
            retries_used,
        };
    }

    match dom_extract(&html, source, &cfg) {
        Ok(items) => ScrapeOutcome {
            items,
            error: None,
            retries_used,
        },
        Err(err) => {
            warn!(source = %source.name, error = %err, "DOM extraction failed, using regex fallback");
            let items = regex_extract(&html, source, &cfg, MAX_FALLBACK_ITEMS);
            ScrapeOutcome {
                items,
                error: None,
                retries_used,
            }
        }
    }
}

// ------------------------------------------------------------
// DOM-query mode
// ------------------------------------------------------------

fn dom_extract(html: &str, source: &Source, cfg: &ScrapeSelectors) -> Result<Vec<RawItem>, String> {
    let doc = Html::parse_document(html);

    let title_sel = parse_configured(&cfg.title)?;
    let date_sel = parse_configured(&cfg.date)?;
    let desc_sel = parse_configured(&cfg.description)?;
    let author_sel = parse_configured(&cfg.author)?;

    let base = resolve_base(cfg, &source.url);

    // Configured item selector wins; otherwise probe the default chain until
    // one yields matches.
    let mut matched: Vec<ElementRef> = Vec::new();
    if let Some(item_sel) = &cfg.item {
        let sel = Selector::parse(item_sel)
            .map_err(|e| format!("invalid item selector {item_sel:?}: {e}"))?;
        matched = doc.select(&sel).collect();
    } else {
        for candidate in DEFAULT_ITEM_SELECTORS {
            let sel = Selector::parse(candidate)
                .map_err(|e| format!("invalid default selector {candidate:?}: {e}"))?;
            matched = doc.select(&sel).collect();
            if !matched.is_empty() {
                break;
            }
        }
    }

    let mut out = Vec::new();
    let mut seen_titles: HashSet<String> = HashSet::new();

    for el in matched.into_iter().take(MAX_DOM_ITEMS) {
        let title = match &title_sel {
            Some(sel) => el
                .select(sel)
                .next()
                .map(|t| element_text(&t))
                .unwrap_or_else(|| element_text(&el)),
            None => element_text(&el),
        };
        if !acceptable_title(&title) {
            continue;
        }
        if !seen_titles.insert(title.to_lowercase()) {
            continue;
        }

        let Some(href) = element_href(&el) else {
            continue;
        };
        let link = resolve_link(base.as_ref(), &href);

        let published_at = probe_date(&el, &date_sel).unwrap_or_else(Utc::now);

        let description = desc_sel
            .as_ref()
            .and_then(|s| el.select(s).next())
            .map(|d| element_text(&d))
            .unwrap_or_default();

        let author = author_sel
            .as_ref()
            .and_then(|s| el.select(s).next())
            .or_else(|| el.select(&BYLINE_PROBE).next())
            .map(|a| element_text(&a))
            .filter(|a| !a.is_empty());

        out.push(RawItem {
            title,
            link,
            description,
            published_at: Some(published_at),
            author,
            source: source.name.clone(),
            full_content: None,
        });
    }

    Ok(out)
}

fn parse_configured(sel: &Option<String>) -> Result<Option<Selector>, String> {
    match sel {
        None => Ok(None),
        Some(s) => Selector::parse(s)
            .map(Some)
            .map_err(|e| format!("invalid selector {s:?}: {e}")),
    }
}

fn element_text(el: &ElementRef) -> String {
    normalize_text(&el.text().collect::<Vec<_>>().join(" "))
}

/// The matched element's own href, else its first anchor descendant's.
fn element_href(el: &ElementRef) -> Option<String> {
    el.value()
        .attr("href")
        .map(str::to_string)
        .or_else(|| {
            el.select(&ANCHOR)
                .next()
                .and_then(|a| a.value().attr("href").map(str::to_string))
        })
        .filter(|h| !h.trim().is_empty())
}

fn probe_date(el: &ElementRef, configured: &Option<Selector>) -> Option<DateTime<Utc>> {
    let candidate = match configured {
        Some(sel) => el.select(sel).next(),
        None => el.select(&DATE_PROBE).next(),
    }?;
    candidate
        .value()
        .attr("datetime")
        .and_then(parse_feed_date)
        .or_else(|| parse_feed_date(&element_text(&candidate)))
}

fn resolve_base(cfg: &ScrapeSelectors, page_url: &str) -> Option<Url> {
    cfg.base_url
        .as_deref()
        .and_then(|b| Url::parse(b).ok())
        .or_else(|| Url::parse(page_url).ok())
}

/// Absolute hrefs pass through; relative ones resolve against the base.
fn resolve_link(base: Option<&Url>, href: &str) -> String {
    let href = href.trim();
    if Url::parse(href).is_ok() {
        return href.to_string();
    }
    match base.and_then(|b| b.join(href).ok()) {
        Some(u) => u.to_string(),
        None => href.to_string(),
    }
}

pub(crate) fn acceptable_title(title: &str) -> bool {
    let len = title.chars().count();
    if len < MIN_TITLE_LEN || len > MAX_TITLE_LEN {
        return false;
    }
    let lower = title.to_lowercase();
    !STOPLIST
        .iter()
        .any(|stop| lower == *stop || lower.starts_with(stop))
}

// ------------------------------------------------------------
// Regex-only mode
// ------------------------------------------------------------

/// Title/link extraction straight off the raw HTML. Used for script-rendered
/// sources and as the fallback when selector config is unusable. A configured
/// `title_regex` must expose (link, title) capture groups.
fn regex_extract(html: &str, source: &Source, cfg: &ScrapeSelectors, cap: usize) -> Vec<RawItem> {
    let configured = cfg.title_regex.as_deref().and_then(|p| match Regex::new(p) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(source = %source.name, error = %e, "invalid title_regex, using default");
            None
        }
    });
    let re: &Regex = configured.as_ref().unwrap_or(&RE_ANCHOR);

    let base = resolve_base(cfg, &source.url);
    let mut out = Vec::new();
    let mut seen_titles: HashSet<String> = HashSet::new();

    for caps in re.captures_iter(html).take(cap) {
        let (Some(link_m), Some(title_m)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let title = normalize_text(title_m.as_str());
        if !acceptable_title(&title) {
            continue;
        }
        if !seen_titles.insert(title.to_lowercase()) {
            continue;
        }
        out.push(RawItem {
            title,
            link: resolve_link(base.as_ref(), link_m.as_str()),
            description: String::new(),
            published_at: None,
            author: None,
            source: source.name.clone(),
            full_content: None,
        });
    }
    out
}
