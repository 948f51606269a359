//! Regulatory News Scanner — Binary Entrypoint
//! Boots the Axum HTTP server: scan endpoint, health probe, Prometheus
//! exposition, and the store/classifier wiring behind them.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reg_news_scanner::api::{router, AppState};
use reg_news_scanner::metrics::Metrics;

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - SCANNER_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("SCANNER_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scan=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[shuttle_runtime::main]
async fn axum() -> shuttle_axum::ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments. This enables
    // SCANNER_SOURCES_PATH / OPENAI_API_KEY from .env.
    let _ = dotenvy::dotenv();

    // Initialize dev tracing early (no-op in production).
    enable_dev_tracing();

    // Prometheus recorder must be installed before the first scan records.
    let metrics = Metrics::init();

    // Capability stores are wired here. The in-memory backend serves local
    // runs; a deployment swaps in its platform-backed implementations.
    let state = AppState::in_memory();
    let router = router(state).merge(metrics.router());

    Ok(router.into())
}
