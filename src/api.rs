//! HTTP surface: one scan endpoint plus a health probe. The scan runs on a
//! spawned task under a timeout — aborting the task is the cancellation
//! mechanism, and a panicked scan comes back as a 500 instead of taking the
//! process down.

use std::time::Duration;

use shuttle_axum::axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::classify::{build_classifier_from_env, DynClassifier};
use crate::ingest::fetch::http_client;
use crate::scan::{run_scan, ScanDeps, ScanOptions, DEFAULT_DATE_RANGE_DAYS};
use crate::store::Stores;

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
    pub deps: ScanDeps,
    pub scan_timeout: Duration,
}

impl AppState {
    pub fn new(stores: Stores, classifier: DynClassifier) -> Self {
        Self {
            deps: ScanDeps {
                stores,
                classifier,
                client: http_client(),
            },
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    /// In-memory stores + env-configured classifier; the default wiring for
    /// local runs and tests.
    pub fn in_memory() -> Self {
        let (stores, _mem) = Stores::in_memory();
        Self::new(stores, build_classifier_from_env())
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/scan", post(scan))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ScanRequest {
    date_range_days: Option<u32>,
    selected_source_ids: Option<Vec<String>>,
}

#[derive(serde::Serialize)]
struct ScanFailure {
    error: String,
    elapsed_ms: u64,
}

async fn scan(State(state): State<AppState>, Json(body): Json<ScanRequest>) -> Response {
    let t0 = std::time::Instant::now();

    let date_range_days = body.date_range_days.unwrap_or(DEFAULT_DATE_RANGE_DAYS);
    if !(1..=60).contains(&date_range_days) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ScanFailure {
                error: format!("dateRangeDays must be between 1 and 60, got {date_range_days}"),
                elapsed_ms: t0.elapsed().as_millis() as u64,
            }),
        )
            .into_response();
    }

    let opts = ScanOptions {
        date_range_days,
        selected_source_ids: body.selected_source_ids,
    };

    let deps = state.deps.clone();
    let mut handle = tokio::spawn(async move { run_scan(&deps, &opts).await });

    match tokio::time::timeout(state.scan_timeout, &mut handle).await {
        Ok(Ok(report)) => (StatusCode::OK, Json(report)).into_response(),
        Ok(Err(join_err)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ScanFailure {
                error: format!("scan failed: {join_err}"),
                elapsed_ms: t0.elapsed().as_millis() as u64,
            }),
        )
            .into_response(),
        Err(_) => {
            // The scan task must not keep running detached past its budget.
            handle.abort();
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ScanFailure {
                    error: format!("scan timed out after {}s", state.scan_timeout.as_secs()),
                    elapsed_ms: t0.elapsed().as_millis() as u64,
                }),
            )
                .into_response()
        }
    }
}
