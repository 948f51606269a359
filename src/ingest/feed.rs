// src/ingest/feed.rs
//! Feed parser for the three syndication dialects seen across regulatory
//! sources: RSS 2.0 (`rss > channel > item`), Atom (`feed > entry`) and
//! RDF/RSS 1.0 (`rdf:RDF > item`).
//!
//! All matching structured branches are harvested (the shapes are not
//! mutually exclusive); a regex block-scanner takes over only when every
//! structured parse fails, which keeps technically-invalid feeds with
//! recognizable tag structure productive.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::normalize_text;
use crate::ingest::types::RawItem;

// ------------------------------------------------------------
// Text-bearing nodes
// ------------------------------------------------------------

/// One shape for every text-bearing feed node: plain text, CDATA, and
/// attribute-carrying variants (`<title type="html">…`) all land in `$text`.
#[derive(Debug, Default, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

impl TextNode {
    fn text(&self) -> String {
        normalize_text(self.value.as_deref().unwrap_or_default())
    }
}

fn text_of(node: &Option<TextNode>) -> String {
    node.as_ref().map(TextNode::text).unwrap_or_default()
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

// ------------------------------------------------------------
// Dialect shapes (quick-xml serde)
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    // A single <item> coerces to a one-element vec; an itemless channel is a
    // valid (empty) feed.
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<TextNode>,
    link: Option<TextNode>,
    description: Option<TextNode>,
    #[serde(rename = "pubDate")]
    pub_date: Option<TextNode>,
    author: Option<TextNode>,
    // quick-xml's serde matches on the local element name, so the `dc:`
    // prefix is stripped before binding.
    #[serde(rename = "creator")]
    creator: Option<TextNode>,
}

// `entries` is required on purpose: a channel-bearing document must not
// satisfy the Atom branch with an empty vec.
#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry")]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
    published: Option<TextNode>,
    updated: Option<TextNode>,
    author: Option<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct RdfFeed {
    // RSS 1.0 puts <item> elements as siblings of <channel> under rdf:RDF.
    #[serde(rename = "item")]
    items: Vec<RdfItem>,
}

#[derive(Debug, Deserialize)]
struct RdfItem {
    title: Option<TextNode>,
    link: Option<TextNode>,
    description: Option<TextNode>,
    // quick-xml's serde matches on the local element name; the `dc:` prefix
    // is stripped before binding.
    #[serde(rename = "date")]
    date: Option<TextNode>,
    #[serde(rename = "creator")]
    creator: Option<TextNode>,
}

// ------------------------------------------------------------
// Public API
// ------------------------------------------------------------

/// Parse feed XML into raw items. Items without a non-empty title are
/// dropped silently.
pub fn parse_feed(xml: &str, source_name: &str) -> Vec<RawItem> {
    let t0 = std::time::Instant::now();

    let mut out = Vec::new();
    let mut structured_ok = false;

    if let Ok(rss) = from_str::<Rss>(xml) {
        structured_ok = true;
        for it in rss.channel.items {
            let author = non_empty(text_of(&it.author)).or_else(|| non_empty(text_of(&it.creator)));
            push_item(
                &mut out,
                source_name,
                text_of(&it.title),
                text_of(&it.link),
                text_of(&it.description),
                parse_feed_date(&text_of(&it.pub_date)),
                author,
            );
        }
    }

    if let Ok(feed) = from_str::<AtomFeed>(xml) {
        structured_ok = true;
        for entry in feed.entries {
            let date = parse_feed_date(&text_of(&entry.published))
                .or_else(|| parse_feed_date(&text_of(&entry.updated)));
            let description = non_empty(text_of(&entry.summary))
                .or_else(|| non_empty(text_of(&entry.content)))
                .unwrap_or_default();
            let author = entry
                .author
                .as_ref()
                .and_then(|a| non_empty(text_of(&a.name)));
            push_item(
                &mut out,
                source_name,
                text_of(&entry.title),
                preferred_atom_link(&entry.links),
                description,
                date,
                author,
            );
        }
    }

    if let Ok(rdf) = from_str::<RdfFeed>(xml) {
        structured_ok = true;
        for it in rdf.items {
            push_item(
                &mut out,
                source_name,
                text_of(&it.title),
                text_of(&it.link),
                text_of(&it.description),
                parse_feed_date(&text_of(&it.date)),
                non_empty(text_of(&it.creator)),
            );
        }
    }

    if !structured_ok {
        out = fallback_parse(xml, source_name);
    }

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("scan_parse_ms").record(ms);
    counter!("scan_items_fetched_total").increment(out.len() as u64);

    out
}

/// Among multiple `<link>` entries prefer `rel="alternate"` or
/// `type="text/html"`, else the first.
fn preferred_atom_link(links: &[AtomLink]) -> String {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate") || l.kind.as_deref() == Some("text/html"))
        .or_else(|| links.first())
        .and_then(|l| l.href.clone())
        .map(|h| h.trim().to_string())
        .unwrap_or_default()
}

fn push_item(
    out: &mut Vec<RawItem>,
    source: &str,
    title: String,
    link: String,
    description: String,
    published_at: Option<DateTime<Utc>>,
    author: Option<String>,
) {
    if title.is_empty() {
        return;
    }
    out.push(RawItem {
        title,
        link,
        description,
        published_at,
        author,
        source: source.to_string(),
        full_content: None,
    });
}

/// RFC 2822 first (RSS), then RFC 3339 (Atom / dc:date).
pub(crate) fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let rfc2822 = s.replace(" GMT", " +0000").replace(" UTC", " +0000");
    let parsed = OffsetDateTime::parse(&rfc2822, &Rfc2822)
        .ok()
        .or_else(|| OffsetDateTime::parse(s, &Rfc3339).ok())?;
    DateTime::<Utc>::from_timestamp(parsed.unix_timestamp(), 0)
}

// ------------------------------------------------------------
// Regex fallback for malformed XML
// ------------------------------------------------------------

static RE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(?:item|entry)[\s>].*?</(?:item|entry)>").unwrap());
static RE_TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<title[^>]*>(?:\s*<!\[CDATA\[)?(.*?)(?:\]\]>\s*)?</title>").unwrap()
});
static RE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<link[^>]*>(?:\s*<!\[CDATA\[)?(.*?)(?:\]\]>\s*)?</link>").unwrap()
});
static RE_LINK_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<link[^>]+href=["']([^"']+)["']"#).unwrap());
static RE_DESC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<(?:description|summary)[^>]*>(?:\s*<!\[CDATA\[)?(.*?)(?:\]\]>\s*)?</(?:description|summary)>",
    )
    .unwrap()
});
static RE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(?:pubDate|published|updated)[^>]*>(.*?)</(?:pubDate|published|updated)>")
        .unwrap()
});

/// Tag-scraping fallback: pull item/entry blocks out of XML that the
/// structured parsers refuse.
fn fallback_parse(xml: &str, source_name: &str) -> Vec<RawItem> {
    let mut out = Vec::new();
    for m in RE_BLOCK.find_iter(xml) {
        let block = m.as_str();
        let title = RE_TITLE
            .captures(block)
            .map(|c| normalize_text(&c[1]))
            .unwrap_or_default();
        if title.is_empty() {
            continue;
        }
        let link = RE_LINK
            .captures(block)
            .map(|c| normalize_text(&c[1]))
            .filter(|s| !s.is_empty())
            .or_else(|| {
                RE_LINK_HREF
                    .captures(block)
                    .map(|c| c[1].trim().to_string())
            })
            .unwrap_or_default();
        let description = RE_DESC
            .captures(block)
            .map(|c| normalize_text(&c[1]))
            .unwrap_or_default();
        let published_at = RE_DATE
            .captures(block)
            .and_then(|c| parse_feed_date(c[1].trim()));
        out.push(RawItem {
            title,
            link,
            description,
            published_at,
            author: None,
            source: source_name.to_string(),
            full_content: None,
        });
    }
    out
}
