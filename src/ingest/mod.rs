// src/ingest/mod.rs
pub mod enrich;
pub mod feed;
pub mod fetch;
pub mod scrape;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "scan_items_fetched_total",
            "Items parsed from feed and scrape sources."
        );
        describe_counter!(
            "scan_dedup_total",
            "Items removed by batch or history deduplication."
        );
        describe_counter!(
            "scan_rule_filtered_total",
            "Items removed by learned exclusion rules."
        );
        describe_counter!("scan_persisted_total", "Regulatory updates persisted.");
        describe_counter!(
            "scan_source_errors_total",
            "Per-source fetch/parse failures."
        );
        describe_histogram!("scan_parse_ms", "Feed/page parse time in milliseconds.");
        describe_gauge!("scan_last_run_ts", "Unix ts when the scan pipeline last ran.");
    });
}

/// Normalize text: HTML entity decode, strip tags, normalize quotes,
/// collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();

    out.trim().to_string()
}

/// Dedup key for titles: normalized text, lowercased.
pub fn normalize_title(s: &str) -> String {
    normalize_text(s).to_lowercase()
}

/// Dedup key for URLs: fragment dropped, trailing slash stripped, scheme and
/// host lowercased (the `url` crate does the lowercasing on parse).
pub fn normalize_url(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let without_fragment = match url::Url::parse(trimmed) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.to_string()
        }
        // Relative or malformed links keep their spelling minus the fragment.
        Err(_) => trimmed.split('#').next().unwrap_or(trimmed).to_string(),
    };
    without_fragment.trim_end_matches('/').to_string()
}
