//! Pre-persistence guard for extracted entities.
//!
//! Batches go through caps, normalisation, per-entity checks and two
//! dedup passes before anything reaches the knowledge graph.

use chrono::{Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

use orchestra_core::{
    config::ValidationConfig,
    traits::KnowledgeGraph,
    types::{dedup_key, NewEntity, TenantId},
    Result,
};

/// Confidence assumed when a candidate carries none.
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Source field → canonical field. Applied only when the canonical field is absent.
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("type", "entity_type"),
    ("entityType", "entity_type"),
    ("kind", "entity_type"),
    ("title", "name"),
    ("entity_name", "name"),
    ("summary", "description"),
];

const KNOWN_FIELDS: &[&str] = &[
    "name",
    "entity_type",
    "category",
    "description",
    "aliases",
    "properties",
    "confidence",
];

// =============================================================================
// Policy & Outcome
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationPolicy {
    pub max_entities_per_task: usize,
    pub max_entities_per_hour: usize,
    pub required_fields: Vec<String>,
    pub prohibited_patterns: Vec<String>,
    pub dedup_fields: Vec<String>,
    pub min_confidence: f64,
    pub max_name_length: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self::from(&ValidationConfig::default())
    }
}

impl From<&ValidationConfig> for ValidationPolicy {
    fn from(cfg: &ValidationConfig) -> Self {
        Self {
            max_entities_per_task: cfg.max_entities_per_task,
            max_entities_per_hour: cfg.max_entities_per_hour,
            required_fields: cfg.required_fields.clone(),
            prohibited_patterns: cfg.prohibited_patterns.clone(),
            dedup_fields: cfg.dedup_fields.clone(),
            min_confidence: cfg.min_confidence,
            max_name_length: cfg.max_name_length,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    /// Position in the input batch.
    pub index: usize,
    pub name: Option<String>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationOutcome {
    pub accepted: Vec<NewEntity>,
    pub rejected: Vec<Rejection>,
    pub duplicates_skipped: usize,
    /// Batch-level errors. When non-empty nothing was accepted.
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    fn batch_error(msg: String) -> Self {
        Self {
            errors: vec![msg],
            ..Self::default()
        }
    }

    pub fn is_batch_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

// =============================================================================
// Validator
// =============================================================================

pub struct EntityValidator {
    graph: Arc<dyn KnowledgeGraph>,
}

impl EntityValidator {
    pub fn new(graph: Arc<dyn KnowledgeGraph>) -> Self {
        Self { graph }
    }

    /// Validate a batch of raw candidates for `tenant`.
    ///
    /// Storage failures propagate as `Err`; cap violations come back as a
    /// batch error in the outcome with nothing accepted.
    pub async fn validate(
        &self,
        tenant: TenantId,
        batch: &[Value],
        policy: &ValidationPolicy,
    ) -> Result<ValidationOutcome> {
        if batch.len() > policy.max_entities_per_task {
            let msg = format!(
                "Batch of {} entities exceeds the per-task limit of {}",
                batch.len(),
                policy.max_entities_per_task
            );
            tracing::warn!(tenant_id = %tenant, "{}", msg);
            return Ok(ValidationOutcome::batch_error(msg));
        }

        let recent = self
            .graph
            .count_created_since(tenant, Utc::now() - Duration::hours(1))
            .await?;
        if recent + batch.len() > policy.max_entities_per_hour {
            let msg = format!(
                "Hourly entity limit reached: {} created in the last hour, batch of {}, limit {}",
                recent,
                batch.len(),
                policy.max_entities_per_hour
            );
            tracing::warn!(tenant_id = %tenant, "{}", msg);
            return Ok(ValidationOutcome::batch_error(msg));
        }

        let patterns = compile_patterns(&policy.prohibited_patterns);
        let mut outcome = ValidationOutcome::default();
        let mut batch_keys = HashSet::new();
        let mut existing = self.graph.existing_keys(tenant).await?;

        for (index, raw) in batch.iter().enumerate() {
            let Some(fields) = normalize(raw) else {
                outcome.rejected.push(Rejection {
                    index,
                    name: None,
                    reasons: vec!["candidate is not an object".into()],
                });
                continue;
            };

            let confidence = match check_entity(&fields, policy, &patterns) {
                Ok(confidence) => confidence,
                Err(reasons) => {
                    outcome.rejected.push(Rejection {
                        index,
                        name: fields.get("name").and_then(Value::as_str).map(str::to_string),
                        reasons,
                    });
                    continue;
                }
            };

            if !batch_keys.insert(batch_dedup_key(&fields, &policy.dedup_fields)) {
                outcome.duplicates_skipped += 1;
                continue;
            }

            let entity = into_new_entity(fields, confidence);
            if !existing.insert(dedup_key(&entity.name, &entity.entity_type)) {
                outcome.duplicates_skipped += 1;
                continue;
            }

            outcome.accepted.push(entity);
        }

        crate::metrics::track_validation(
            outcome.accepted.len(),
            outcome.rejected.len(),
            outcome.duplicates_skipped,
        );
        tracing::debug!(
            tenant_id = %tenant,
            accepted = outcome.accepted.len(),
            rejected = outcome.rejected.len(),
            duplicates = outcome.duplicates_skipped,
            "Validated entity batch"
        );
        Ok(outcome)
    }
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "Dropping invalid prohibited pattern");
                None
            }
        })
        .collect()
}

/// Shallow copy with alias fields mapped onto their canonical names.
fn normalize(raw: &Value) -> Option<Map<String, Value>> {
    let mut fields = raw.as_object()?.clone();
    for (alias, canonical) in FIELD_ALIASES {
        if fields.contains_key(*canonical) {
            continue;
        }
        if let Some(v) = fields.remove(*alias) {
            fields.insert((*canonical).to_string(), v);
        }
    }
    Some(fields)
}

fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn parse_confidence(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Returns the effective confidence, or every reason the candidate fails.
fn check_entity(
    fields: &Map<String, Value>,
    policy: &ValidationPolicy,
    patterns: &[Regex],
) -> std::result::Result<f64, Vec<String>> {
    let mut reasons = Vec::new();

    for field in &policy.required_fields {
        if fields.get(field).map_or(true, is_blank) {
            reasons.push(format!("missing required field '{}'", field));
        }
    }

    if let Some(name) = fields.get("name").and_then(Value::as_str) {
        if name.chars().count() > policy.max_name_length {
            reasons.push(format!("name exceeds {} characters", policy.max_name_length));
        }
    }

    let confidence = match fields.get("confidence") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE,
        Some(v) => match parse_confidence(v) {
            Some(c) if (0.0..=1.0).contains(&c) => c,
            Some(c) => {
                reasons.push(format!("confidence {} outside [0, 1]", c));
                c
            }
            None => {
                reasons.push("confidence is not a number".into());
                0.0
            }
        },
    };
    if confidence < policy.min_confidence && (0.0..=1.0).contains(&confidence) {
        reasons.push(format!(
            "confidence {} below minimum {}",
            confidence, policy.min_confidence
        ));
    }

    for text in scanned_strings(fields) {
        if let Some(re) = patterns.iter().find(|re| re.is_match(text)) {
            reasons.push(format!("matches prohibited pattern '{}'", re.as_str()));
            break;
        }
    }

    if reasons.is_empty() {
        Ok(confidence)
    } else {
        Err(reasons)
    }
}

/// Top-level string values plus string values one level into `properties`.
fn scanned_strings(fields: &Map<String, Value>) -> Vec<&str> {
    let mut out: Vec<&str> = fields.values().filter_map(Value::as_str).collect();
    if let Some(Value::Object(props)) = fields.get("properties") {
        out.extend(props.values().filter_map(Value::as_str));
    }
    out
}

fn batch_dedup_key(fields: &Map<String, Value>, dedup_fields: &[String]) -> String {
    dedup_fields
        .iter()
        .map(|f| match fields.get(f) {
            Some(Value::String(s)) => s.trim().to_lowercase(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string().to_lowercase(),
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn string_field(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn into_new_entity(mut fields: Map<String, Value>, confidence: f64) -> NewEntity {
    let name = string_field(&mut fields, "name").unwrap_or_default();
    let entity_type = string_field(&mut fields, "entity_type").unwrap_or_default();
    let category = string_field(&mut fields, "category");
    let description = string_field(&mut fields, "description");
    let aliases = match fields.remove("aliases") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    let mut properties = match fields.remove("properties") {
        Some(Value::Object(props)) => props,
        _ => Map::new(),
    };
    fields.remove("confidence");
    for (k, v) in fields {
        if !KNOWN_FIELDS.contains(&k.as_str()) {
            properties.entry(k).or_insert(v);
        }
    }

    NewEntity {
        entity_type,
        name,
        category,
        aliases,
        description,
        properties,
        confidence,
        source_agent_id: None,
        collection_task_id: None,
    }
}
