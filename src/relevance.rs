// src/relevance.rs
//! Relevance gate: learned/static rules applied between deduplication and the
//! expensive classification call. Only exclusion rules filter here; inclusion
//! rules surface as prioritization hints inside the classification prompt.
//!
//! Rule usage is not written back inline. Matches are collected into an
//! outbound queue the orchestrator drains after the pipeline, so the
//! side-effecting increments are observable and awaitable in tests.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ingest::types::RawItem;

// --- env names (dev logging gate) ---
pub const ENV_DEV_LOG: &str = "SCANNER_DEV_LOG";

/// Dev logging gate: SCANNER_DEV_LOG=1 AND dev env (debug build or
/// SHUTTLE_ENV in {local, development, dev}).
pub(crate) fn dev_logging_enabled() -> bool {
    let on = std::env::var(ENV_DEV_LOG).ok().as_deref() == Some("1");
    if !on {
        return false;
    }
    if cfg!(debug_assertions) {
        return true;
    }
    matches!(
        std::env::var("SHUTTLE_ENV")
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str(),
        "local" | "development" | "dev"
    )
}

/// Short anonymized id for logging article titles without logging the title.
pub(crate) fn anon_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    IncludeKeyword,
    IncludeTopic,
    ExcludeKeyword,
    ExcludeTopic,
    ExcludeTitlePattern,
    ExcludeSourcePattern,
}

impl RuleType {
    pub fn is_exclusion(&self) -> bool {
        matches!(
            self,
            RuleType::ExcludeKeyword
                | RuleType::ExcludeTopic
                | RuleType::ExcludeTitlePattern
                | RuleType::ExcludeSourcePattern
        )
    }
}

/// A learned or static pattern. Created and tuned by the feedback-learning
/// collaborator; consumed read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceRule {
    #[serde(default)]
    pub id: String,
    pub rule_type: RuleType,
    pub pattern: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub accuracy_score: f32,
    #[serde(default)]
    pub derived_from_feedback_count: u32,
    #[serde(default)]
    pub times_applied: u64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl RelevanceRule {
    pub fn exclude_keyword(id: &str, pattern: &str, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            rule_type: RuleType::ExcludeKeyword,
            pattern: pattern.to_string(),
            domain: None,
            source_name: None,
            reason: reason.to_string(),
            accuracy_score: 0.0,
            derived_from_feedback_count: 0,
            times_applied: 0,
            is_active: true,
        }
    }
}

/// One queued usage increment: the rule that dropped an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleUsage {
    pub rule_id: String,
}

#[derive(Debug)]
pub struct FilterOutcome {
    pub kept: Vec<RawItem>,
    pub dropped: usize,
    pub usage: Vec<RuleUsage>,
}

/// Apply active exclusion rules. First matching rule drops the item and
/// queues one usage increment for that rule.
pub fn apply_exclusions(items: Vec<RawItem>, rules: &[RelevanceRule]) -> FilterOutcome {
    let exclusions: Vec<&RelevanceRule> = rules
        .iter()
        .filter(|r| r.is_active && r.rule_type.is_exclusion())
        .collect();

    let mut kept = Vec::with_capacity(items.len());
    let mut usage = Vec::new();
    let mut dropped = 0usize;

    for item in items {
        match exclusions.iter().find(|r| rule_matches(r, &item)) {
            Some(rule) => {
                dropped += 1;
                usage.push(RuleUsage {
                    rule_id: rule.id.clone(),
                });
                if dev_logging_enabled() {
                    // Never log raw titles; hashed id + rule only.
                    info!(
                        target: "relevance",
                        id = %anon_hash(&item.title),
                        rule = %rule.id,
                        rule_type = ?rule.rule_type,
                        "item excluded by rule"
                    );
                }
            }
            None => kept.push(item),
        }
    }

    FilterOutcome {
        kept,
        dropped,
        usage,
    }
}

/// Case-insensitive substring semantics per rule type.
fn rule_matches(rule: &RelevanceRule, item: &RawItem) -> bool {
    let pattern = rule.pattern.to_lowercase();
    if pattern.is_empty() {
        return false;
    }
    let title = item.title.to_lowercase();
    match rule.rule_type {
        RuleType::ExcludeKeyword | RuleType::ExcludeTopic => {
            title.contains(&pattern) || item.description.to_lowercase().contains(&pattern)
        }
        RuleType::ExcludeTitlePattern => title.contains(&pattern),
        RuleType::ExcludeSourcePattern => item.source.to_lowercase().contains(&pattern),
        RuleType::IncludeKeyword | RuleType::IncludeTopic => false,
    }
}

/// Prioritization hints for the classification prompt, one line per active
/// inclusion rule.
pub fn include_hints(rules: &[RelevanceRule]) -> Vec<String> {
    rules
        .iter()
        .filter(|r| r.is_active && !r.rule_type.is_exclusion())
        .map(|r| {
            if r.reason.is_empty() {
                r.pattern.clone()
            } else {
                format!("{} ({})", r.pattern, r.reason)
            }
        })
        .collect()
}
