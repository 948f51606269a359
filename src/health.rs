// src/health.rs
//! Per-source health telemetry, upserted on every scan and keyed by
//! `source_url`. Records are created on first sight of a source and updated
//! forever after; this subsystem never deletes them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::HealthStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failing,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Failing => "failing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source_name: String,
    pub source_url: String,
    pub source_type: String,
    pub last_check: DateTime<Utc>,
    pub status: HealthStatus,
    pub last_success: Option<DateTime<Utc>>,
    pub items_fetched: Option<u32>,
    pub error_message: Option<String>,
    pub consecutive_failures: u32,
    pub retries_used: u32,
}

impl SourceHealth {
    pub fn new(source_name: &str, source_url: &str, source_type: &str) -> Self {
        Self {
            source_name: source_name.to_string(),
            source_url: source_url.to_string(),
            source_type: source_type.to_string(),
            last_check: Utc::now(),
            status: HealthStatus::Healthy,
            last_success: None,
            items_fetched: None,
            error_message: None,
            consecutive_failures: 0,
            retries_used: 0,
        }
    }
}

/// What one scan observed for one source.
#[derive(Debug, Clone)]
pub struct SourceObservation {
    pub source_name: String,
    pub source_url: String,
    pub source_type: String,
    pub items_fetched: usize,
    pub error: Option<String>,
    pub retries_used: u32,
}

/// Fold one observation over the previous record. Fetch error → failing;
/// fetch ok with zero items → degraded; otherwise healthy.
/// `consecutive_failures` increments only on failing and resets otherwise.
pub fn observe(
    prev: Option<&SourceHealth>,
    obs: &SourceObservation,
    now: DateTime<Utc>,
) -> SourceHealth {
    let status = if obs.error.is_some() {
        HealthStatus::Failing
    } else if obs.items_fetched == 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    let consecutive_failures = match status {
        HealthStatus::Failing => prev.map(|p| p.consecutive_failures).unwrap_or(0) + 1,
        _ => 0,
    };

    let last_success = if status == HealthStatus::Failing {
        prev.and_then(|p| p.last_success)
    } else {
        Some(now)
    };

    SourceHealth {
        source_name: obs.source_name.clone(),
        source_url: obs.source_url.clone(),
        source_type: obs.source_type.clone(),
        last_check: now,
        status,
        last_success,
        items_fetched: Some(obs.items_fetched as u32),
        error_message: obs.error.clone(),
        consecutive_failures,
        retries_used: obs.retries_used,
    }
}

/// Read-modify-write against the health store. A failed read counts as "no
/// previous record"; a failed write is logged and dropped — health telemetry
/// must never fail a scan.
pub async fn upsert_health(
    store: &dyn HealthStore,
    obs: &SourceObservation,
    now: DateTime<Utc>,
) -> SourceHealth {
    let prev = match store.find_by_url(&obs.source_url).await {
        Ok(p) => p,
        Err(e) => {
            warn!(source = %obs.source_name, error = %e, "health lookup failed");
            None
        }
    };

    let next = observe(prev.as_ref().map(|s| &s.record), obs, now);

    let write = match prev {
        Some(stored) => store.update(&stored.id, next.clone()).await,
        None => store.create(next.clone()).await,
    };
    if let Err(e) = write {
        warn!(source = %obs.source_name, error = %e, "health upsert failed");
    }

    next
}
