// src/dedup.rs
//! Multi-phase deduplication. The pipeline invariant — no two persisted
//! records share a normalized title or a normalized non-empty URL — is
//! enforced at three checkpoints: within the batch, against the store's
//! recent window, and once more immediately before the final write.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use tracing::warn;

use crate::ingest::types::RawItem;
use crate::ingest::{normalize_title, normalize_url};
use crate::store::UpdateStore;

/// Recent-window query cap; bounds the cost of the history pass.
pub const HISTORY_CAP: usize = 500;

/// Title/URL membership sets over already-seen records.
#[derive(Debug, Default)]
pub struct SeenKeys {
    titles: HashSet<String>,
    urls: HashSet<String>,
}

impl SeenKeys {
    pub fn insert(&mut self, title: &str, url: &str) {
        self.titles.insert(normalize_title(title));
        let u = normalize_url(url);
        if !u.is_empty() {
            self.urls.insert(u);
        }
    }

    /// True when either key is already present. Empty URLs never match.
    pub fn matches(&self, title: &str, url: &str) -> bool {
        if self.titles.contains(&normalize_title(title)) {
            return true;
        }
        let u = normalize_url(url);
        !u.is_empty() && self.urls.contains(&u)
    }
}

/// Phase A: one walk over the batch, first occurrence wins per normalized
/// title and, independently, per normalized non-empty URL.
pub fn dedupe_batch(items: Vec<RawItem>) -> (Vec<RawItem>, usize) {
    let mut seen = SeenKeys::default();
    let before = items.len();
    let mut kept = Vec::with_capacity(before);
    for item in items {
        if seen.matches(&item.title, &item.link) {
            continue;
        }
        seen.insert(&item.title, &item.link);
        kept.push(item);
    }
    let removed = before - kept.len();
    (kept, removed)
}

/// Membership keys of records persisted within the window. `None` means the
/// store query failed; callers degrade rather than abort.
pub async fn fetch_history_keys(store: &dyn UpdateStore, window_days: u32) -> Option<SeenKeys> {
    let since = Utc::now() - Duration::days(i64::from(window_days));
    match store.recent(since, HISTORY_CAP).await {
        Ok(records) => {
            let mut keys = SeenKeys::default();
            for r in &records {
                keys.insert(&r.record.title, &r.record.source_url);
            }
            Some(keys)
        }
        Err(e) => {
            warn!(error = %e, "history lookup failed, skipping history dedup");
            None
        }
    }
}

/// Phase B: drop batch items already persisted within the recent window.
/// A store failure returns the batch unchanged — a small duplicate-write
/// risk is preferred over failing the scan.
pub async fn dedupe_against_history(
    items: Vec<RawItem>,
    store: &dyn UpdateStore,
    window_days: u32,
) -> (Vec<RawItem>, usize) {
    let Some(keys) = fetch_history_keys(store, window_days).await else {
        return (items, 0);
    };
    let before = items.len();
    let kept: Vec<RawItem> = items
        .into_iter()
        .filter(|it| !keys.matches(&it.title, &it.link))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RegulatoryUpdate, Stores, UpdateType};

    fn item(title: &str, link: &str) -> RawItem {
        RawItem::new("Test", title.to_string(), link.to_string())
    }

    #[test]
    fn same_normalized_title_keeps_first() {
        let (kept, removed) = dedupe_batch(vec![
            item("FTC Announces New Rule", "https://a.example/1"),
            item("ftc announces  new rule", "https://b.example/2"),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(removed, 1);
        assert_eq!(kept[0].link, "https://a.example/1");
    }

    #[test]
    fn same_normalized_url_keeps_first() {
        let (kept, removed) = dedupe_batch(vec![
            item("First headline about the rule", "https://a.example/doc/"),
            item("Entirely different headline", "https://a.example/doc#top"),
        ]);
        assert_eq!(kept.len(), 1);
        assert_eq!(removed, 1);
    }

    #[test]
    fn empty_urls_never_collide() {
        let (kept, removed) = dedupe_batch(vec![
            item("Headline one about privacy", ""),
            item("Headline two about antitrust", ""),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(removed, 0);
    }

    fn persisted(title: &str, url: &str) -> RegulatoryUpdate {
        RegulatoryUpdate {
            title: title.to_string(),
            source: "Test".into(),
            source_url: url.to_string(),
            domain: "privacy".into(),
            jurisdiction: "US".into(),
            risk_score: 5,
            update_type: UpdateType::Guidance,
            summary: String::new(),
            published_at: None,
            discovered_at: Utc::now(),
            confidence: 0.8,
            enforcement: None,
        }
    }

    #[tokio::test]
    async fn history_pass_drops_known_items() {
        let (stores, _mem) = Stores::in_memory();
        stores
            .updates
            .create(persisted("FTC Announces New Rule", "https://ftc.example/1"))
            .await
            .unwrap();

        let batch = vec![
            item("FTC Announces New Rule", "https://mirror.example/other"),
            item("Fresh Ruling On Data Transfers", "https://court.example/2"),
        ];
        let (kept, removed) = dedupe_against_history(batch, stores.updates.as_ref(), 7).await;
        assert_eq!(kept.len(), 1);
        assert_eq!(removed, 1);
        assert_eq!(kept[0].title, "Fresh Ruling On Data Transfers");
    }

    #[tokio::test]
    async fn store_failure_degrades_to_batch_set() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl UpdateStore for FailingStore {
            async fn recent(
                &self,
                _since: chrono::DateTime<Utc>,
                _limit: usize,
            ) -> anyhow::Result<Vec<crate::store::StoredUpdate>> {
                anyhow::bail!("store offline")
            }
            async fn create(
                &self,
                _record: RegulatoryUpdate,
            ) -> anyhow::Result<crate::store::StoredUpdate> {
                anyhow::bail!("store offline")
            }
        }

        let batch = vec![item("Survives The Outage", "https://a.example/1")];
        let (kept, removed) = dedupe_against_history(batch, &FailingStore, 7).await;
        assert_eq!(kept.len(), 1);
        assert_eq!(removed, 0);
    }
}
