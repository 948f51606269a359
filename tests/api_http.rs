// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /scan  (range validation + report shape)

use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use reg_news_scanner::api::{router, AppState};

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

/// Build the same Router the binary uses (minus the metrics merge).
fn test_router() -> Router {
    router(AppState::in_memory())
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router();

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let body = String::from_utf8(bytes).expect("utf8");
    assert_eq!(body.trim(), "OK", "health body should be 'OK'");
}

#[tokio::test]
async fn api_scan_rejects_out_of_range_date_window() {
    for days in [0u32, 61] {
        let app = test_router();
        let payload = json!({ "dateRangeDays": days });
        let req = Request::builder()
            .method("POST")
            .uri("/scan")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("build POST /scan");

        let resp = app.oneshot(req).await.expect("oneshot /scan");
        assert_eq!(
            resp.status(),
            StatusCode::UNPROCESSABLE_ENTITY,
            "dateRangeDays={days} must be rejected"
        );

        let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
            .await
            .expect("read json")
            .to_vec();
        let v: Json = serde_json::from_slice(&bytes).expect("parse error json");
        assert!(
            v.get("error")
                .and_then(Json::as_str)
                .is_some_and(|e| e.contains("dateRangeDays")),
            "error message should name the field"
        );
    }
}

#[tokio::test]
async fn api_scan_returns_report_json() {
    let app = test_router();

    // Select a source id that matches nothing so the scan stays offline.
    let payload = json!({ "selectedSourceIds": ["no-such-source"] });
    let req = Request::builder()
        .method("POST")
        .uri("/scan")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST /scan");

    let resp = app.oneshot(req).await.expect("oneshot /scan");
    assert!(
        resp.status().is_success(),
        "POST /scan should be 2xx, got {}",
        resp.status()
    );

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read json")
        .to_vec();
    let v: Json = serde_json::from_slice(&bytes).expect("parse report json");

    // Contract checks for downstream consumers
    for field in [
        "started_at",
        "elapsed_ms",
        "sources_scanned",
        "items_fetched",
        "duplicates_removed",
        "rule_filtered",
        "classified",
        "persisted",
        "source_health",
        "errors",
    ] {
        assert!(v.get(field).is_some(), "missing '{field}'");
    }
    assert_eq!(v["sources_scanned"], 0);
    assert_eq!(v["persisted"], 0);
}
