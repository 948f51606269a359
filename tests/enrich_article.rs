// tests/enrich_article.rs
// Enricher behavior against a stub article page, plus the pass-through
// guarantees for relative links and failed fetches.

use std::net::SocketAddr;

use axum::response::Html;
use axum::routing::get;
use axum::Router;
use chrono::{TimeZone, Utc};

use reg_news_scanner::ingest::enrich::enrich_item;
use reg_news_scanner::ingest::fetch::http_client;
use reg_news_scanner::ingest::types::RawItem;

const ARTICLE: &str = include_str!("fixtures/article.html");

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

#[tokio::test]
async fn article_page_upgrades_date_author_and_content() {
    let app = Router::new().route("/press/1", get(|| async { Html(ARTICLE) }));
    let addr = serve(app).await;

    let mut item = RawItem::new(
        "Agency Newsroom",
        "Agency Fines Platform $40M Over Dark Patterns".into(),
        format!("http://{addr}/press/1"),
    );
    item.description = "short".into();
    // A stale feed date the meta tag must overwrite.
    item.published_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());

    let enriched = enrich_item(&http_client(), item).await;

    assert_eq!(
        enriched.published_at,
        Some(Utc.with_ymd_and_hms(2025, 8, 5, 9, 30, 0).unwrap())
    );
    assert_eq!(enriched.author.as_deref(), Some("Office of Public Affairs"));

    let content = enriched.full_content.expect("body extracted");
    assert!(content.contains("cancellation mechanism"));
    assert!(content.chars().count() <= 8000);

    // Weak description replaced by a content summary.
    assert!(enriched.description.ends_with('…'));
    assert!(enriched.description.starts_with("Agency Fines Platform"));
}

#[tokio::test]
async fn strong_description_is_kept() {
    let app = Router::new().route("/press/1", get(|| async { Html(ARTICLE) }));
    let addr = serve(app).await;

    let mut item = RawItem::new(
        "Agency Newsroom",
        "Agency Fines Platform $40M Over Dark Patterns".into(),
        format!("http://{addr}/press/1"),
    );
    item.description = "x".repeat(200);

    let enriched = enrich_item(&http_client(), item).await;
    assert_eq!(enriched.description, "x".repeat(200));
    assert!(enriched.full_content.is_some());
}

#[tokio::test]
async fn relative_link_is_a_noop() {
    let item = RawItem::new(
        "Agency Newsroom",
        "Agency Fines Platform $40M Over Dark Patterns".into(),
        "/press/1".into(),
    );
    let before = item.clone();
    let after = enrich_item(&http_client(), item).await;
    assert_eq!(before, after);
}

#[tokio::test]
async fn failed_fetch_is_a_noop() {
    let app = Router::new(); // all 404
    let addr = serve(app).await;

    let item = RawItem::new(
        "Agency Newsroom",
        "Agency Fines Platform $40M Over Dark Patterns".into(),
        format!("http://{addr}/press/1"),
    );
    let before = item.clone();
    let after = enrich_item(&http_client(), item).await;
    assert_eq!(before, after);
}
