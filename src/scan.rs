// src/scan.rs
//! Scan orchestrator. Drives one pass through
//! CollectSources → FetchAll → Dedupe → Enrich → PersistHealth →
//! FilterByRules → Classify → FinalDedupe → Persist → Report.
//!
//! Every phase degrades per-source or per-item; nothing short of the process
//! dying aborts a scan. The caller (API layer) owns cancellation by wrapping
//! this future in a timeout and dropping it.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use metrics::{counter, gauge};
use serde::Serialize;
use tracing::{info, warn};

use crate::classify::{
    build_classification_prompt, classification_schema, enforcement_detail, parse_classification,
    ClassifiedItem, DynClassifier, MAX_CLASSIFY_BATCH,
};
use crate::dedup::{dedupe_against_history, dedupe_batch, fetch_history_keys, SeenKeys};
use crate::health::{upsert_health, SourceHealth, SourceObservation};
use crate::ingest::enrich::enrich_item;
use crate::ingest::feed::parse_feed;
use crate::ingest::fetch::{fetch_with_retry, DEFAULT_MAX_RETRIES};
use crate::ingest::scrape::scrape_site;
use crate::ingest::types::RawItem;
use crate::ingest::ensure_metrics_described;
use crate::relevance::{apply_exclusions, include_hints};
use crate::sources::{
    load_sources_default, merge_sources, select_sources, static_sources, Source, SourceKind,
};
use crate::store::{CompanyProfile, EnforcementDetail, RegulatoryUpdate, Stores, UpdateType};

/// Enrichment fetches one article page per item; cap the second-fetch volume.
pub const ENRICH_CAP: usize = 15;
/// History window for the dedup passes, independent of the scan's own range.
pub const HISTORY_WINDOW_DAYS: u32 = 30;
pub const DEFAULT_DATE_RANGE_DAYS: u32 = 7;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub date_range_days: u32,
    pub selected_source_ids: Option<Vec<String>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            date_range_days: DEFAULT_DATE_RANGE_DAYS,
            selected_source_ids: None,
        }
    }
}

/// Everything a scan needs, cloned per request.
#[derive(Clone)]
pub struct ScanDeps {
    pub stores: Stores,
    pub classifier: DynClassifier,
    pub client: reqwest::Client,
}

#[derive(Debug, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub sources_scanned: usize,
    pub items_fetched: usize,
    pub duplicates_removed: usize,
    pub rule_filtered: usize,
    pub classified: usize,
    pub persisted: usize,
    pub source_health: Vec<SourceHealth>,
    pub errors: Vec<String>,
}

struct SourceFetchResult {
    source: Source,
    items: Vec<RawItem>,
    error: Option<String>,
    retries_used: u32,
}

/// One source, fully independent: fetch, parse/scrape, never raise.
async fn fetch_source(client: reqwest::Client, source: Source) -> SourceFetchResult {
    match source.kind {
        SourceKind::Rss => {
            let fetched =
                fetch_with_retry(&client, &source.url, &[], DEFAULT_MAX_RETRIES).await;
            let retries_used = fetched.attempts.saturating_sub(1);
            match fetched.body {
                Some(xml) => {
                    let items = parse_feed(&xml, &source.name);
                    SourceFetchResult {
                        source,
                        items,
                        error: None,
                        retries_used,
                    }
                }
                None => SourceFetchResult {
                    error: fetched
                        .error
                        .or_else(|| Some(format!("fetch failed for {}", source.url))),
                    source,
                    items: Vec::new(),
                    retries_used,
                },
            }
        }
        SourceKind::Scrape => {
            let outcome = scrape_site(&client, &source).await;
            SourceFetchResult {
                source,
                items: outcome.items,
                error: outcome.error,
                retries_used: outcome.retries_used,
            }
        }
    }
}

/// Run one full scan. Never errors: partial failures land in the report.
pub async fn run_scan(deps: &ScanDeps, opts: &ScanOptions) -> ScanReport {
    ensure_metrics_described();
    let started_at = Utc::now();
    let t0 = std::time::Instant::now();
    let mut errors: Vec<String> = Vec::new();

    // --- CollectSources: static < file < dynamic, then selection ---
    let file_sources = load_sources_default().unwrap_or_else(|e| {
        warn!(error = %e, "source file override unreadable");
        errors.push(format!("source config: {e}"));
        Vec::new()
    });
    let dynamic_sources = deps.stores.sources.active_sources().await.unwrap_or_else(|e| {
        warn!(error = %e, "source store unavailable, static sources only");
        errors.push(format!("source store: {e}"));
        Vec::new()
    });
    let sources = select_sources(
        merge_sources(vec![static_sources(), file_sources, dynamic_sources]),
        opts.selected_source_ids.as_deref(),
    );
    let sources_scanned = sources.len();

    // --- FetchAll: one task per source, all-settled ---
    let tasks: Vec<_> = sources
        .into_iter()
        .map(|source| {
            let client = deps.client.clone();
            tokio::spawn(fetch_source(client, source))
        })
        .collect();

    let mut results: Vec<SourceFetchResult> = Vec::new();
    for joined in join_all(tasks).await {
        match joined {
            Ok(res) => results.push(res),
            Err(e) => {
                errors.push(format!("source task panicked: {e}"));
                counter!("scan_source_errors_total").increment(1);
            }
        }
    }

    let cutoff = started_at - Duration::days(i64::from(opts.date_range_days));
    let mut batch: Vec<RawItem> = Vec::new();
    let mut items_fetched = 0usize;
    for res in &results {
        items_fetched += res.items.len();
        if let Some(err) = &res.error {
            errors.push(format!("{}: {err}", res.source.name));
            counter!("scan_source_errors_total").increment(1);
        }
        for item in &res.items {
            // Undated items stay in; enrichment may date them later.
            if item.published_at.map(|d| d < cutoff).unwrap_or(false) {
                continue;
            }
            batch.push(item.clone());
        }
    }

    // --- Dedupe: intra-batch, then against the recent window ---
    let (batch, removed_in_batch) = dedupe_batch(batch);
    let (mut batch, removed_by_history) =
        dedupe_against_history(batch, deps.stores.updates.as_ref(), HISTORY_WINDOW_DAYS).await;
    let duplicates_removed = removed_in_batch + removed_by_history;
    counter!("scan_dedup_total").increment(duplicates_removed as u64);

    // --- Enrich: first N survivors, concurrent, all-settled ---
    let tail = if batch.len() > ENRICH_CAP {
        batch.split_off(ENRICH_CAP)
    } else {
        Vec::new()
    };
    let enrich_tasks: Vec<_> = batch
        .into_iter()
        .map(|item| {
            let client = deps.client.clone();
            tokio::spawn(async move { enrich_item(&client, item).await })
        })
        .collect();
    let mut batch: Vec<RawItem> = Vec::with_capacity(enrich_tasks.len() + tail.len());
    for joined in join_all(enrich_tasks).await {
        match joined {
            Ok(item) => batch.push(item),
            Err(e) => errors.push(format!("enrichment task panicked: {e}")),
        }
    }
    batch.extend(tail);

    // --- PersistHealth: upsert one record per source ---
    let now = Utc::now();
    let mut source_health = Vec::with_capacity(results.len());
    for res in &results {
        let obs = SourceObservation {
            source_name: res.source.name.clone(),
            source_url: res.source.url.clone(),
            source_type: match res.source.kind {
                SourceKind::Rss => "rss".to_string(),
                SourceKind::Scrape => "scrape".to_string(),
            },
            items_fetched: res.items.len(),
            error: res.error.clone(),
            retries_used: res.retries_used,
        };
        source_health.push(upsert_health(deps.stores.health.as_ref(), &obs, now).await);
    }

    // --- FilterByRules: learned exclusions before the expensive call ---
    let rules = deps.stores.rules.active_rules().await.unwrap_or_else(|e| {
        warn!(error = %e, "rule store unavailable, filtering with no rules");
        Vec::new()
    });
    let filter_outcome = apply_exclusions(batch, &rules);
    let rule_filtered = filter_outcome.dropped;
    counter!("scan_rule_filtered_total").increment(rule_filtered as u64);
    let usage_queue = filter_outcome.usage;
    let batch = filter_outcome.kept;

    // --- Classify: one batched call, capped ---
    let profile = deps
        .stores
        .profile
        .company_profile()
        .await
        .ok()
        .flatten()
        .unwrap_or_else(CompanyProfile::generic);
    let hints = include_hints(&rules);

    let capped: Vec<RawItem> = if batch.len() > MAX_CLASSIFY_BATCH {
        let overflow = batch.len() - MAX_CLASSIFY_BATCH;
        warn!(overflow, "classification batch capped");
        errors.push(format!(
            "classification capped: {overflow} items beyond the {MAX_CLASSIFY_BATCH}-item batch were not classified"
        ));
        batch.into_iter().take(MAX_CLASSIFY_BATCH).collect()
    } else {
        batch
    };

    let mut relevant: Vec<(RawItem, ClassifiedItem)> = Vec::new();
    if !capped.is_empty() {
        let prompt = build_classification_prompt(&capped, &profile, &hints);
        let schema = classification_schema();
        match deps.classifier.classify(&prompt, &schema).await {
            Ok(value) => {
                for c in parse_classification(&value, capped.len()) {
                    if c.relevant {
                        relevant.push((capped[c.index].clone(), c));
                    }
                }
            }
            Err(e) => errors.push(format!("classification failed: {e}")),
        }
    }
    let classified = relevant.len();

    // --- Secondary sub-analysis for rulings/enforcement, joined in order ---
    let detail_futures = relevant.iter().map(|(item, c)| {
        let classifier = deps.classifier.clone();
        let needs = c.update_type.map(|t| t.needs_detail()).unwrap_or(false);
        let item = item.clone();
        async move {
            if needs {
                enforcement_detail(classifier.as_ref(), &item).await
            } else {
                None
            }
        }
    });
    let details: Vec<Option<EnforcementDetail>> = join_all(detail_futures).await;

    // --- FinalDedupe + Persist: close the race opened during classification ---
    let final_keys = fetch_history_keys(deps.stores.updates.as_ref(), HISTORY_WINDOW_DAYS).await;
    let mut written_this_batch = SeenKeys::default();
    let mut persisted = 0usize;

    for ((item, c), detail) in relevant.into_iter().zip(details) {
        let already_stored = final_keys
            .as_ref()
            .map(|k| k.matches(&item.title, &item.link))
            .unwrap_or(false);
        if already_stored || written_this_batch.matches(&item.title, &item.link) {
            info!(source = %item.source, url = %item.link, "duplicate at final write, skipping");
            continue;
        }

        let record = RegulatoryUpdate {
            title: item.title.clone(),
            source: item.source.clone(),
            source_url: item.link.clone(),
            domain: c.domain,
            jurisdiction: c.jurisdiction,
            risk_score: c.risk_score,
            update_type: c.update_type.unwrap_or(UpdateType::Other),
            summary: if c.summary.is_empty() {
                item.description.clone()
            } else {
                c.summary
            },
            published_at: item.published_at,
            discovered_at: now,
            confidence: c.confidence,
            enforcement: detail,
        };
        match deps.stores.updates.create(record).await {
            Ok(_) => {
                written_this_batch.insert(&item.title, &item.link);
                persisted += 1;
                counter!("scan_persisted_total").increment(1);
            }
            Err(e) => errors.push(format!("persist failed for {}: {e}", item.link)),
        }
    }

    // --- Drain the outbound rule-usage queue after the pipeline ---
    for usage in usage_queue {
        if let Err(e) = deps
            .stores
            .rules
            .increment_times_applied(&usage.rule_id)
            .await
        {
            warn!(rule = %usage.rule_id, error = %e, "rule usage increment failed");
        }
    }

    gauge!("scan_last_run_ts").set(now.timestamp() as f64);
    let elapsed_ms = t0.elapsed().as_millis() as u64;
    info!(
        target: "scan",
        sources = sources_scanned,
        fetched = items_fetched,
        dedup = duplicates_removed,
        filtered = rule_filtered,
        classified,
        persisted,
        elapsed_ms,
        "scan complete"
    );

    ScanReport {
        started_at,
        elapsed_ms,
        sources_scanned,
        items_fetched,
        duplicates_removed,
        rule_filtered,
        classified,
        persisted,
        source_health,
        errors,
    }
}
