// src/ingest/enrich.rs
//! Article-page enricher: a second fetch per surviving candidate that
//! upgrades the publish date, fills in the author, and captures main-body
//! text. Every failure here is swallowed; the pre-enrichment item is always
//! a valid fallback.

use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use url::Url;

use crate::ingest::feed::parse_feed_date;
use crate::ingest::fetch::{fetch_with_retry, BROWSER_USER_AGENT};
use crate::ingest::normalize_text;
use crate::ingest::types::RawItem;

/// Enrichment uses a single-attempt fetch chain; candidates are plentiful
/// and a slow article page must not stall the scan.
pub const ENRICH_MAX_RETRIES: u32 = 1;

const MAX_CONTENT_CHARS: usize = 8000;
const MIN_CONTAINER_CHARS: usize = 300;
const MIN_PARAGRAPH_CHARS: usize = 60;
const MIN_PARAGRAPHS: usize = 3;
const WEAK_DESCRIPTION_CHARS: usize = 150;
const SUMMARY_CHARS: usize = 300;

/// Meta probes in priority order; first match wins and overwrites the
/// feed-provided date.
const META_DATE_SELECTORS: &[&str] = &[
    r#"meta[property="article:published_time"]"#,
    r#"meta[name="date"]"#,
    r#"meta[name="pubdate"]"#,
    r#"meta[name="publish_date"]"#,
];

const META_AUTHOR_SELECTORS: &[&str] = &[
    r#"meta[name="author"]"#,
    r#"meta[property="article:author"]"#,
];

const BYLINE_SELECTORS: &[&str] = &[
    ".byline",
    ".author",
    r#"[rel="author"]"#,
    r#"[itemprop="author"]"#,
    r#"[class*="byline"]"#,
];

const CONTAINER_SELECTORS: &[&str] = &[
    "article",
    r#"[role="main"]"#,
    "main",
    ".post-content",
    ".article-content",
    ".entry-content",
    ".article-body",
    ".story-body",
    "#content",
];

/// Fetch the article page behind `item.link` and fold what it yields back
/// into the item. Pass-through on any failure, and for relative links.
pub async fn enrich_item(client: &reqwest::Client, mut item: RawItem) -> RawItem {
    if !is_absolute_http(&item.link) {
        return item;
    }
    let fetched = fetch_with_retry(
        client,
        &item.link,
        &[("User-Agent", BROWSER_USER_AGENT)],
        ENRICH_MAX_RETRIES,
    )
    .await;
    let Some(html) = fetched.body else {
        return item;
    };
    apply_article_page(&mut item, &html);
    item
}

pub(crate) fn is_absolute_http(link: &str) -> bool {
    matches!(Url::parse(link), Ok(u) if u.scheme() == "http" || u.scheme() == "https")
}

/// Pure extraction half, separated so tests can feed fixture HTML directly.
pub(crate) fn apply_article_page(item: &mut RawItem, html: &str) {
    let doc = Html::parse_document(html);

    if let Some(date) = probe_meta_date(&doc) {
        item.published_at = Some(date);
    }
    if item.author.is_none() {
        item.author = probe_author(&doc);
    }
    if let Some(content) = extract_body(&doc) {
        if item.description.chars().count() < WEAK_DESCRIPTION_CHARS {
            item.description = summary_of(&content);
        }
        item.full_content = Some(content);
    }
}

fn meta_content(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn probe_meta_date(doc: &Html) -> Option<DateTime<Utc>> {
    for selector in META_DATE_SELECTORS {
        if let Some(date) = meta_content(doc, selector).and_then(|v| parse_loose_date(&v)) {
            return Some(date);
        }
    }
    // <time datetime="..."> as the last structured probe.
    let sel = Selector::parse("time[datetime]").ok()?;
    doc.select(&sel)
        .next()
        .and_then(|el| el.value().attr("datetime"))
        .and_then(parse_loose_date)
}

/// RFC 2822 / RFC 3339 first; bare `YYYY-MM-DD` meta dates get midnight UTC.
fn parse_loose_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    parse_feed_date(s).or_else(|| {
        if s.len() == 10 && s.as_bytes()[4] == b'-' && s.as_bytes()[7] == b'-' {
            parse_feed_date(&format!("{s}T00:00:00Z"))
        } else {
            None
        }
    })
}

fn probe_author(doc: &Html) -> Option<String> {
    for selector in META_AUTHOR_SELECTORS {
        if let Some(author) = meta_content(doc, selector) {
            return Some(normalize_text(&author));
        }
    }
    for selector in BYLINE_SELECTORS {
        let Ok(sel) = Selector::parse(selector) else {
            continue;
        };
        if let Some(el) = doc.select(&sel).next() {
            let text = normalize_text(&el.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// Main-body text: first container selector whose text clears the size bar,
/// else at least three substantial paragraphs concatenated.
fn extract_body(doc: &Html) -> Option<String> {
    for selector in CONTAINER_SELECTORS {
        let Ok(sel) = Selector::parse(selector) else {
            continue;
        };
        for el in doc.select(&sel) {
            let text = normalize_text(&el.text().collect::<Vec<_>>().join(" "));
            if text.chars().count() > MIN_CONTAINER_CHARS {
                return Some(truncate_chars(&text, MAX_CONTENT_CHARS));
            }
        }
    }

    let sel = Selector::parse("p").ok()?;
    let paragraphs: Vec<String> = doc
        .select(&sel)
        .map(|p| normalize_text(&p.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| t.chars().count() > MIN_PARAGRAPH_CHARS)
        .collect();
    if paragraphs.len() < MIN_PARAGRAPHS {
        return None;
    }
    Some(truncate_chars(&paragraphs.join(" "), MAX_CONTENT_CHARS))
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn summary_of(content: &str) -> String {
    let mut out = truncate_chars(content, SUMMARY_CHARS);
    out.push('…');
    out
}
