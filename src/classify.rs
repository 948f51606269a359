// src/classify.rs
//! Classification collaborator: the one opaque LLM call. This module owns
//! prompt construction (company context + learned prioritization hints +
//! numbered candidates), the declared response schema, and shape validation
//! of whatever comes back. Provider plumbing follows the adapter split:
//! a real OpenAI-compatible provider, a disabled client, and a scripted
//! client for tests.

use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::ingest::types::RawItem;
use crate::store::{CompanyProfile, EnforcementDetail, UpdateType};

/// Hard cap on one classification batch: prompt-size limits. Items beyond
/// the cap are not classified this scan; the orchestrator logs and reports
/// the overflow.
pub const MAX_CLASSIFY_BATCH: usize = 50;

// ------------------------------------------------------------
// Trait + implementations
// ------------------------------------------------------------

#[async_trait]
pub trait Classifier: Send + Sync {
    /// One structured call: prompt in, JSON shaped per `schema` out. The
    /// scanner validates the shape; providers only transport.
    async fn classify(&self, prompt: &str, schema: &Value) -> Result<Value>;

    fn provider_name(&self) -> &'static str;
}

pub type DynClassifier = Arc<dyn Classifier>;

/// Factory: scripted mock when `SCANNER_AI_TEST_MODE=mock`, the real
/// provider when an API key is present, disabled otherwise.
pub fn build_classifier_from_env() -> DynClassifier {
    if std::env::var("SCANNER_AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(ScriptedClassifier::empty());
    }
    if std::env::var("OPENAI_API_KEY")
        .map(|k| !k.is_empty())
        .unwrap_or(false)
    {
        return Arc::new(OpenAiClassifier::new(None));
    }
    Arc::new(DisabledClassifier)
}

/// OpenAI-compatible chat-completions provider. Requires `OPENAI_API_KEY`;
/// `SCANNER_AI_BASE_URL` / `SCANNER_AI_MODEL` override endpoint and model.
pub struct OpenAiClassifier {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(model_override: Option<&str>) -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let base_url = std::env::var("SCANNER_AI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let http = reqwest::Client::builder()
            .user_agent("reg-news-scanner/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        let model = model_override
            .map(str::to_string)
            .or_else(|| std::env::var("SCANNER_AI_MODEL").ok())
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        Self {
            http,
            api_key,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl Classifier for OpenAiClassifier {
    async fn classify(&self, prompt: &str, schema: &Value) -> Result<Value> {
        if self.api_key.is_empty() {
            return Err(anyhow!("OPENAI_API_KEY not set"));
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }

        let sys = format!(
            "You are a regulatory-news classifier. Respond with JSON only, no prose, \
             no markdown fences, strictly matching this JSON schema:\n{schema}"
        );
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &sys,
                },
                Msg {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
        };

        let resp = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .context("classification request failed")?;
        if !resp.status().is_success() {
            return Err(anyhow!("classification call returned {}", resp.status()));
        }
        let body: Resp = resp
            .json()
            .await
            .context("decoding classification response")?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");
        serde_json::from_str(strip_code_fence(content)).context("classifier returned non-JSON")
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Always errors; used when no provider is configured. The orchestrator
/// records the error and persists nothing.
pub struct DisabledClassifier;

#[async_trait]
impl Classifier for DisabledClassifier {
    async fn classify(&self, _prompt: &str, _schema: &Value) -> Result<Value> {
        Err(anyhow!("classifier disabled"))
    }

    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic test double: pops one scripted response per call, then
/// errors (which callers degrade from).
pub struct ScriptedClassifier {
    responses: Mutex<VecDeque<Value>>,
}

impl ScriptedClassifier {
    pub fn new(responses: Vec<Value>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn classify(&self, _prompt: &str, _schema: &Value) -> Result<Value> {
        self.responses
            .lock()
            .expect("mutex poisoned")
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted response left"))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/// Models answer in fences often enough that transport strips them.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

// ------------------------------------------------------------
// Prompt + schema
// ------------------------------------------------------------

impl CompanyProfile {
    /// Fallback context when the profile store is empty or unavailable.
    pub fn generic() -> Self {
        Self {
            company_name: "the company".to_string(),
            industry: "a regulated industry".to_string(),
            jurisdictions: vec!["US".into(), "EU".into(), "UK".into()],
            risk_domains: vec![
                "privacy".into(),
                "antitrust".into(),
                "consumer protection".into(),
                "financial regulation".into(),
            ],
        }
    }
}

/// Declared response shape for the batched call; also embedded in the system
/// message so JSON-mode providers can anchor on it.
pub fn classification_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "required": ["index", "relevant"],
            "properties": {
                "index": { "type": "integer", "minimum": 0 },
                "relevant": { "type": "boolean" },
                "domain": { "type": "string" },
                "jurisdiction": { "type": "string" },
                "risk_score": { "type": "integer", "minimum": 0, "maximum": 10 },
                "update_type": {
                    "type": "string",
                    "enum": ["Rulemaking", "Ruling", "Enforcement", "Guidance", "Legislation", "Other"]
                },
                "summary": { "type": "string" },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
            }
        }
    })
}

pub fn enforcement_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "agency": { "type": ["string", "null"] },
            "penalty": { "type": ["string", "null"] },
            "compliance_deadline": { "type": ["string", "null"] }
        }
    })
}

/// Assemble the batched prompt: company context, learned prioritization
/// hints, then the numbered candidates (already capped by the caller).
pub fn build_classification_prompt(
    items: &[RawItem],
    profile: &CompanyProfile,
    include_hints: &[String],
) -> String {
    let mut prompt = String::with_capacity(2048);

    prompt.push_str(&format!(
        "Classify the regulatory-news candidates below for {}, operating in {}. \
         Jurisdictions of interest: {}. Risk domains of interest: {}.\n\n",
        profile.company_name,
        profile.industry,
        profile.jurisdictions.join(", "),
        profile.risk_domains.join(", ")
    ));

    if !include_hints.is_empty() {
        prompt.push_str("Prioritize candidates matching these learned signals:\n");
        for hint in include_hints {
            prompt.push_str(&format!("- {hint}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "For each candidate return one JSON object with its `index`. Mark `relevant` \
         false for marketing, events, hiring and other non-regulatory noise.\n\nCandidates:\n",
    );

    for (i, item) in items.iter().enumerate() {
        let date = item
            .published_at
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string());
        let description: String = item.description.chars().take(500).collect();
        prompt.push_str(&format!(
            "{i}. [{}] {} ({date})\n   {}\n",
            item.source, item.title, description
        ));
    }

    prompt
}

pub fn build_enforcement_prompt(item: &RawItem) -> String {
    let body: String = item
        .full_content
        .as_deref()
        .unwrap_or(&item.description)
        .chars()
        .take(2000)
        .collect();
    format!(
        "Extract enforcement specifics from this article. Return a JSON object \
         with `agency`, `penalty` and `compliance_deadline` (null when absent).\n\n\
         Title: {}\n{}",
        item.title, body
    )
}

// ------------------------------------------------------------
// Response validation
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassifiedItem {
    pub index: usize,
    pub relevant: bool,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub jurisdiction: String,
    #[serde(default)]
    pub risk_score: u8,
    #[serde(default)]
    pub update_type: Option<UpdateType>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub confidence: f32,
}

/// Validate the returned value against the declared shape. Entries that
/// fail to deserialize, repeat an index, or point outside the batch are
/// dropped with a warning; the rest survive.
pub fn parse_classification(value: &Value, batch_len: usize) -> Vec<ClassifiedItem> {
    // Tolerate the common `{"items": [...]}` wrapping.
    let entries = match value {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(map) => match map.get("items").and_then(Value::as_array) {
            Some(entries) => entries.as_slice(),
            None => {
                warn!("classification response is not an array");
                return Vec::new();
            }
        },
        _ => {
            warn!("classification response is not an array");
            return Vec::new();
        }
    };

    let mut seen_indexes: HashSet<usize> = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value::<ClassifiedItem>(entry.clone()) {
            Ok(mut item) => {
                if item.index >= batch_len {
                    warn!(index = item.index, batch_len, "classified index out of range");
                    continue;
                }
                if !seen_indexes.insert(item.index) {
                    warn!(index = item.index, "duplicate classified index dropped");
                    continue;
                }
                item.risk_score = item.risk_score.min(10);
                item.confidence = item.confidence.clamp(0.0, 1.0);
                out.push(item);
            }
            Err(e) => warn!(error = %e, "dropping malformed classification entry"),
        }
    }
    out
}

/// Secondary per-item pass for rulings and enforcement actions. Failures
/// degrade to `None`; the update persists without extras.
pub async fn enforcement_detail(
    classifier: &dyn Classifier,
    item: &RawItem,
) -> Option<EnforcementDetail> {
    let prompt = build_enforcement_prompt(item);
    let schema = enforcement_schema();
    match classifier.classify(&prompt, &schema).await {
        Ok(value) => match serde_json::from_value::<EnforcementDetail>(value) {
            Ok(detail) => Some(detail),
            Err(e) => {
                warn!(error = %e, "malformed enforcement detail dropped");
                None
            }
        },
        Err(e) => {
            warn!(error = %e, "enforcement sub-analysis failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<RawItem> {
        (0..n)
            .map(|i| {
                RawItem::new(
                    "FTC Press Releases",
                    format!("Headline {i}"),
                    format!("https://ftc.example/{i}"),
                )
            })
            .collect()
    }

    #[test]
    fn prompt_carries_context_hints_and_candidates() {
        let profile = CompanyProfile {
            company_name: "Acme Payments".into(),
            industry: "fintech".into(),
            jurisdictions: vec!["US".into()],
            risk_domains: vec!["financial regulation".into()],
        };
        let hints = vec!["open banking (user flagged relevant)".to_string()];
        let prompt = build_classification_prompt(&items(2), &profile, &hints);
        assert!(prompt.contains("Acme Payments"));
        assert!(prompt.contains("open banking"));
        assert!(prompt.contains("0. [FTC Press Releases] Headline 0"));
        assert!(prompt.contains("1. [FTC Press Releases] Headline 1"));
    }

    #[test]
    fn parse_drops_bad_indexes_and_clamps() {
        let value = json!([
            { "index": 0, "relevant": true, "risk_score": 25, "confidence": 3.0 },
            { "index": 9, "relevant": true },
            { "index": 0, "relevant": false },
            { "relevant": true },
        ]);
        let parsed = parse_classification(&value, 2);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].risk_score, 10);
        assert!((parsed[0].confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn parse_accepts_items_wrapping() {
        let value = json!({ "items": [ { "index": 1, "relevant": false } ] });
        let parsed = parse_classification(&value, 2);
        assert_eq!(parsed.len(), 1);
        assert!(!parsed[0].relevant);
    }

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("[1]"), "[1]");
    }

    #[tokio::test]
    async fn scripted_classifier_pops_in_order() {
        let c = ScriptedClassifier::new(vec![json!([1]), json!([2])]);
        let schema = classification_schema();
        assert_eq!(c.classify("a", &schema).await.unwrap(), json!([1]));
        assert_eq!(c.classify("b", &schema).await.unwrap(), json!([2]));
        assert!(c.classify("c", &schema).await.is_err());
    }

    #[tokio::test]
    async fn enforcement_detail_degrades_on_error() {
        let c = ScriptedClassifier::empty();
        let item = RawItem::new("DOJ", "DOJ fines firm".into(), "https://doj.example/1".into());
        assert_eq!(enforcement_detail(&c, &item).await, None);
    }
}
