// tests/scrape_page.rs
// Site scraper behavior over a stub newsroom page: DOM mode with default and
// configured selectors, regex-only mode, and the degraded/failing boundary.

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use chrono::{TimeZone, Utc};

use reg_news_scanner::ingest::fetch::http_client;
use reg_news_scanner::ingest::scrape::scrape_site;
use reg_news_scanner::sources::{ScrapeSelectors, Source};

const SITE: &str = include_str!("fixtures/site.html");

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
async fn dom_mode_extracts_filters_and_dedupes() {
    let app = Router::new().route("/news", get(|| async { Html(SITE) }));
    let addr = serve(app).await;

    let source = Source::scrape("Agency Newsroom", &format!("http://{addr}/news"), "US");
    let out = scrape_site(&http_client(), &source).await;

    assert!(out.error.is_none());
    assert_eq!(out.retries_used, 0);
    // Two real stories survive: the duplicate card, the short "Subscribe"
    // title and the stoplisted "Read more" are all dropped.
    assert_eq!(out.items.len(), 2);
    assert_eq!(
        out.items[0].title,
        "Agency Fines Platform $40M Over Dark Patterns"
    );
    assert_eq!(
        out.items[0].link,
        format!("http://{addr}/press/2025/platform-fine")
    );
    assert!(out.items[0].published_at.is_some());
    assert_eq!(out.items[1].title, "Agency Opens Rulemaking On Automated Decision Systems");
}

#[tokio::test]
async fn configured_selectors_pull_card_fields() {
    let app = Router::new().route("/news", get(|| async { Html(SITE) }));
    let addr = serve(app).await;

    let mut source = Source::scrape("Agency Newsroom", &format!("http://{addr}/news"), "US");
    source.selectors = Some(ScrapeSelectors {
        item: Some("article.news-card".into()),
        title: Some("h2 a".into()),
        date: Some("time".into()),
        description: Some("p.summary".into()),
        author: Some(".byline".into()),
        ..Default::default()
    });
    let out = scrape_site(&http_client(), &source).await;

    assert!(out.error.is_none());
    assert_eq!(out.items.len(), 2);
    let first = &out.items[0];
    assert_eq!(
        first.published_at,
        Some(Utc.with_ymd_and_hms(2025, 8, 5, 9, 30, 0).unwrap())
    );
    assert_eq!(
        first.description,
        "Settlement resolves allegations of deceptive subscription flows."
    );
    assert_eq!(first.author.as_deref(), Some("Office of Public Affairs"));
}

#[tokio::test]
async fn script_rendered_sources_use_regex_mode() {
    let app = Router::new().route("/news", get(|| async { Html(SITE) }));
    let addr = serve(app).await;

    let mut source = Source::scrape("Agency Newsroom", &format!("http://{addr}/news"), "US");
    source.script_rendered = true;
    let out = scrape_site(&http_client(), &source).await;

    assert!(out.error.is_none());
    assert_eq!(out.items.len(), 2);
    assert!(out.items[0].link.starts_with("http://"));
}

#[tokio::test]
async fn fetch_failure_reports_an_error() {
    // No routes: everything 404s, which is a permanent client error.
    let app = Router::new();
    let addr = serve(app).await;

    let source = Source::scrape("Gone Agency", &format!("http://{addr}/news"), "US");
    let out = scrape_site(&http_client(), &source).await;

    assert!(out.items.is_empty());
    assert!(out.error.is_some());
}

#[tokio::test]
async fn empty_page_is_degraded_not_failing() {
    let app = Router::new().route(
        "/news",
        get(|| async { (StatusCode::OK, Html("<html><body><p>nothing here</p></body></html>")) }),
    );
    let addr = serve(app).await;

    let source = Source::scrape("Quiet Agency", &format!("http://{addr}/news"), "US");
    let out = scrape_site(&http_client(), &source).await;

    assert!(out.items.is_empty());
    assert!(out.error.is_none());
}
