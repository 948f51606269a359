// src/store.rs
//! Capability-backed persistence seams. The pipeline only ever sees these
//! traits; production wires them to the platform's entity store, tests and
//! local runs use [`MemoryStore`]. Every call site degrades to a documented
//! default when a store errors — a broken collaborator never kills a scan.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::SourceHealth;
use crate::relevance::RelevanceRule;
use crate::sources::Source;

// ------------------------------------------------------------
// Persisted shapes
// ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateType {
    Rulemaking,
    Ruling,
    Enforcement,
    Guidance,
    Legislation,
    Other,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Rulemaking => "Rulemaking",
            UpdateType::Ruling => "Ruling",
            UpdateType::Enforcement => "Enforcement",
            UpdateType::Guidance => "Guidance",
            UpdateType::Legislation => "Legislation",
            UpdateType::Other => "Other",
        }
    }

    /// Rulings and enforcement actions get the per-item sub-analysis pass.
    pub fn needs_detail(&self) -> bool {
        matches!(self, UpdateType::Ruling | UpdateType::Enforcement)
    }
}

/// Extras pulled by the secondary classification pass for rulings and
/// enforcement actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnforcementDetail {
    pub agency: Option<String>,
    pub penalty: Option<String>,
    pub compliance_deadline: Option<String>,
}

/// The durable record this pipeline ultimately creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryUpdate {
    pub title: String,
    pub source: String,
    pub source_url: String,
    pub domain: String,
    pub jurisdiction: String,
    pub risk_score: u8,
    pub update_type: UpdateType,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
    pub confidence: f32,
    pub enforcement: Option<EnforcementDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredUpdate {
    pub id: String,
    pub record: RegulatoryUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHealth {
    pub id: String,
    pub record: SourceHealth,
}

/// Company context folded into the classification prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub company_name: String,
    pub industry: String,
    pub jurisdictions: Vec<String>,
    pub risk_domains: Vec<String>,
}

// ------------------------------------------------------------
// Store traits
// ------------------------------------------------------------

#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Active dynamically-managed sources; merged over the static set.
    async fn active_sources(&self) -> Result<Vec<Source>>;
}

#[async_trait]
pub trait UpdateStore: Send + Sync {
    /// Records discovered since `since`, most recent last, at most `limit`.
    async fn recent(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<StoredUpdate>>;

    async fn create(&self, record: RegulatoryUpdate) -> Result<StoredUpdate>;
}

#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn find_by_url(&self, source_url: &str) -> Result<Option<StoredHealth>>;

    async fn create(&self, record: SourceHealth) -> Result<StoredHealth>;

    async fn update(&self, id: &str, record: SourceHealth) -> Result<StoredHealth>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Active learned rules; the filter treats a failure as "no rules".
    async fn active_rules(&self) -> Result<Vec<RelevanceRule>>;

    /// Usage bump, drained from the outbound queue after a scan.
    async fn increment_times_applied(&self, rule_id: &str) -> Result<()>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn company_profile(&self) -> Result<Option<CompanyProfile>>;
}

/// Bundle handed to the orchestrator and the API state.
#[derive(Clone)]
pub struct Stores {
    pub sources: Arc<dyn SourceStore>,
    pub updates: Arc<dyn UpdateStore>,
    pub health: Arc<dyn HealthStore>,
    pub rules: Arc<dyn RuleStore>,
    pub profile: Arc<dyn ProfileStore>,
}

impl Stores {
    /// One shared in-memory backend behind all five seams. Returns the
    /// concrete store too so tests can seed and inspect it.
    pub fn in_memory() -> (Self, Arc<MemoryStore>) {
        let mem = Arc::new(MemoryStore::default());
        let stores = Self {
            sources: mem.clone(),
            updates: mem.clone(),
            health: mem.clone(),
            rules: mem.clone(),
            profile: mem.clone(),
        };
        (stores, mem)
    }
}

// ------------------------------------------------------------
// In-memory implementation
// ------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    seq: AtomicU64,
    pub updates: RwLock<Vec<StoredUpdate>>,
    pub health: RwLock<HashMap<String, StoredHealth>>,
    pub rules: RwLock<Vec<RelevanceRule>>,
    pub dynamic_sources: RwLock<Vec<Source>>,
    pub profile: RwLock<Option<CompanyProfile>>,
}

impl MemoryStore {
    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.seq.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn active_sources(&self) -> Result<Vec<Source>> {
        Ok(self
            .dynamic_sources
            .read()
            .expect("rwlock poisoned")
            .clone())
    }
}

#[async_trait]
impl UpdateStore for MemoryStore {
    async fn recent(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<StoredUpdate>> {
        let all = self.updates.read().expect("rwlock poisoned");
        let recent: Vec<StoredUpdate> = all
            .iter()
            .filter(|u| u.record.discovered_at >= since)
            .cloned()
            .collect();
        let skip = recent.len().saturating_sub(limit);
        Ok(recent.into_iter().skip(skip).collect())
    }

    async fn create(&self, record: RegulatoryUpdate) -> Result<StoredUpdate> {
        let stored = StoredUpdate {
            id: self.next_id("upd"),
            record,
        };
        self.updates
            .write()
            .expect("rwlock poisoned")
            .push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl HealthStore for MemoryStore {
    async fn find_by_url(&self, source_url: &str) -> Result<Option<StoredHealth>> {
        Ok(self
            .health
            .read()
            .expect("rwlock poisoned")
            .get(source_url)
            .cloned())
    }

    async fn create(&self, record: SourceHealth) -> Result<StoredHealth> {
        let stored = StoredHealth {
            id: self.next_id("health"),
            record,
        };
        self.health
            .write()
            .expect("rwlock poisoned")
            .insert(stored.record.source_url.clone(), stored.clone());
        Ok(stored)
    }

    async fn update(&self, id: &str, record: SourceHealth) -> Result<StoredHealth> {
        let mut map = self.health.write().expect("rwlock poisoned");
        let stored = StoredHealth {
            id: id.to_string(),
            record,
        };
        map.insert(stored.record.source_url.clone(), stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn active_rules(&self) -> Result<Vec<RelevanceRule>> {
        Ok(self
            .rules
            .read()
            .expect("rwlock poisoned")
            .iter()
            .filter(|r| r.is_active)
            .cloned()
            .collect())
    }

    async fn increment_times_applied(&self, rule_id: &str) -> Result<()> {
        let mut rules = self.rules.write().expect("rwlock poisoned");
        if let Some(rule) = rules.iter_mut().find(|r| r.id == rule_id) {
            rule.times_applied += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn company_profile(&self) -> Result<Option<CompanyProfile>> {
        Ok(self.profile.read().expect("rwlock poisoned").clone())
    }
}
