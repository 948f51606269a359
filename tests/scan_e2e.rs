// tests/scan_e2e.rs
// End-to-end scan over stub feeds: two sources publish the same headline,
// exactly one update is persisted, and an immediate re-scan persists nothing.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde_json::json;

use reg_news_scanner::classify::ScriptedClassifier;
use reg_news_scanner::health::HealthStatus;
use reg_news_scanner::ingest::fetch::http_client;
use reg_news_scanner::relevance::{RelevanceRule, RuleType};
use reg_news_scanner::scan::{run_scan, ScanDeps, ScanOptions};
use reg_news_scanner::sources::Source;
use reg_news_scanner::store::{Stores, UpdateType};

fn feed_xml(items: &[(&str, String)]) -> String {
    let now = Utc::now().format("%a, %d %b %Y %H:%M:%S +0000").to_string();
    let mut body = String::new();
    for (title, link) in items {
        body.push_str(&format!(
            "<item><title>{title}</title><link>{link}</link>\
             <description>Agency announcement.</description><pubDate>{now}</pubDate></item>"
        ));
    }
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>stub</title>{body}</channel></rss>"
    )
}

#[tokio::test]
async fn full_scan_persists_once_and_rescan_adds_nothing() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let feed_a = feed_xml(&[
        ("FTC Announces New Rule", format!("http://{addr}/a1")),
        (
            "Join our compliance webinar next week",
            format!("http://{addr}/a2"),
        ),
    ]);
    // Same headline, different URL: intra-batch dedup must keep one.
    let feed_b = feed_xml(&[("FTC Announces New Rule", format!("http://{addr}/b1"))]);

    let app = Router::new()
        .route(
            "/feed-a",
            get(move || {
                let body = feed_a.clone();
                async move { body }
            }),
        )
        .route(
            "/feed-b",
            get(move || {
                let body = feed_b.clone();
                async move { body }
            }),
        );
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let (stores, mem) = Stores::in_memory();
    {
        let mut dynamic = mem.dynamic_sources.write().unwrap();
        let mut a = Source::rss("E2E Feed A", &format!("http://{addr}/feed-a"), "US");
        a.id = "e2e-a".into();
        let mut b = Source::rss("E2E Feed B", &format!("http://{addr}/feed-b"), "US");
        b.id = "e2e-b".into();
        *dynamic = vec![a, b];
    }
    {
        let mut rules = mem.rules.write().unwrap();
        rules.push(RelevanceRule::exclude_keyword(
            "rule-webinar",
            "webinar",
            "event noise",
        ));
        let mut include = RelevanceRule::exclude_keyword("rule-ftc", "ftc", "core regulator");
        include.rule_type = RuleType::IncludeKeyword;
        rules.push(include);
    }

    // First response classifies the batch; second answers the enforcement
    // sub-analysis triggered by the Enforcement update type.
    let classifier = Arc::new(ScriptedClassifier::new(vec![
        json!([{
            "index": 0,
            "relevant": true,
            "domain": "consumer protection",
            "jurisdiction": "US",
            "risk_score": 7,
            "update_type": "Enforcement",
            "summary": "FTC finalized a new rule.",
            "confidence": 0.9
        }]),
        json!({ "agency": "FTC", "penalty": null, "compliance_deadline": null }),
    ]));

    let deps = ScanDeps {
        stores: stores.clone(),
        classifier,
        client: http_client(),
    };
    let opts = ScanOptions {
        date_range_days: 7,
        selected_source_ids: Some(vec!["e2e-a".into(), "e2e-b".into()]),
    };

    let report = run_scan(&deps, &opts).await;
    assert!(report.errors.is_empty(), "unexpected errors: {:?}", report.errors);
    assert_eq!(report.sources_scanned, 2);
    assert_eq!(report.items_fetched, 3);
    assert_eq!(report.duplicates_removed, 1);
    assert_eq!(report.rule_filtered, 1);
    assert_eq!(report.classified, 1);
    assert_eq!(report.persisted, 1);
    assert_eq!(report.source_health.len(), 2);
    assert!(report
        .source_health
        .iter()
        .all(|h| h.status == HealthStatus::Healthy));

    {
        let updates = mem.updates.read().unwrap();
        assert_eq!(updates.len(), 1);
        let rec = &updates[0].record;
        assert_eq!(rec.title, "FTC Announces New Rule");
        assert_eq!(rec.update_type, UpdateType::Enforcement);
        assert_eq!(rec.risk_score, 7);
        assert_eq!(rec.jurisdiction, "US");
        assert_eq!(
            rec.enforcement.as_ref().and_then(|e| e.agency.as_deref()),
            Some("FTC")
        );
    }
    {
        let rules = mem.rules.read().unwrap();
        let webinar = rules.iter().find(|r| r.id == "rule-webinar").unwrap();
        assert_eq!(webinar.times_applied, 1);
    }

    // Second scan right away: the feed still carries the same article, the
    // history pass must catch it before classification.
    let deps2 = ScanDeps {
        stores: stores.clone(),
        classifier: Arc::new(ScriptedClassifier::empty()),
        client: http_client(),
    };
    let report2 = run_scan(&deps2, &opts).await;
    assert!(report2.errors.is_empty(), "unexpected errors: {:?}", report2.errors);
    assert_eq!(report2.persisted, 0);
    assert_eq!(report2.classified, 0);
    assert!(report2.duplicates_removed >= 2); // intra-batch + history
    assert_eq!(mem.updates.read().unwrap().len(), 1);
}
