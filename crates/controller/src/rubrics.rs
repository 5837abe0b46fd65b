//! Scoring rubric registry. Rubrics are data: id, prompts and category ranges.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use orchestra_core::{
    types::{KnowledgeEntity, KnowledgeRelation},
    Error, Result,
};

const DEFAULT_RUBRICS: &str = include_str!("../rubrics/default.yaml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RubricCategory {
    pub max: u32,
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub description: String,
}

impl RubricCategory {
    pub fn clamp(&self, value: f64) -> u32 {
        let min = self.min.unwrap_or(0) as f64;
        value.round().clamp(min, self.max as f64) as u32
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rubric {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    pub prompt_template: String,
    pub categories: BTreeMap<String, RubricCategory>,
}

#[derive(Debug, Deserialize)]
struct RubricFile {
    rubrics: Vec<Rubric>,
}

fn field_or(value: Option<&Value>, fallback: &str) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

impl Rubric {
    /// Fill the prompt template for `entity`. `relations` pairs each relation
    /// with the name of the entity at its other end.
    pub fn render(&self, entity: &KnowledgeEntity, relations: &[(KnowledgeRelation, String)]) -> String {
        let properties =
            serde_json::to_string_pretty(&entity.properties).unwrap_or_else(|_| "{}".to_string());
        let relations_text = if relations.is_empty() {
            "None".to_string()
        } else {
            relations
                .iter()
                .map(|(r, other)| {
                    let arrow = if r.from_entity_id == entity.id { "->" } else { "<-" };
                    format!("- {} {} {}", r.relation_type, arrow, other)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        self.prompt_template
            .replace("{name}", &entity.name)
            .replace("{entity_type}", &entity.entity_type)
            .replace("{category}", entity.category.as_deref().unwrap_or("Unknown"))
            .replace("{description}", entity.description.as_deref().unwrap_or("None"))
            .replace("{properties}", &properties)
            .replace(
                "{enrichment_data}",
                &field_or(entity.properties.get("enrichment_data"), "None"),
            )
            .replace(
                "{source_url}",
                &field_or(entity.properties.get("source_url"), "Unknown"),
            )
            .replace("{relations_text}", &relations_text)
    }
}

/// Rubrics keyed by id.
#[derive(Debug, Clone, Default)]
pub struct RubricRegistry {
    rubrics: HashMap<String, Rubric>,
}

impl RubricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `ai_lead`, `hca_deal` and `marketing_signal`.
    pub fn with_defaults() -> Result<Self> {
        let mut registry = Self::new();
        registry.load_yaml(DEFAULT_RUBRICS)?;
        Ok(registry)
    }

    /// Add or replace rubrics from a YAML document with a top-level
    /// `rubrics:` list. Returns how many were loaded.
    pub fn load_yaml(&mut self, yaml: &str) -> Result<usize> {
        let file: RubricFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::configuration(format!("Failed to parse rubric YAML: {}", e)))?;
        let count = file.rubrics.len();
        for rubric in file.rubrics {
            if rubric.categories.is_empty() {
                return Err(Error::configuration(format!(
                    "rubric '{}' has no categories",
                    rubric.id
                )));
            }
            tracing::debug!(rubric = %rubric.id, "Registered rubric");
            self.rubrics.insert(rubric.id.clone(), rubric);
        }
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<&Rubric> {
        self.rubrics.get(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rubrics.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn entity() -> KnowledgeEntity {
        KnowledgeEntity {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            entity_type: "ai_company".into(),
            category: Some("lead".into()),
            name: "Acme".into(),
            aliases: vec![],
            description: None,
            properties: json!({"employees": 120, "source_url": "https://acme.test"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            confidence: 0.9,
            status: Default::default(),
            source_agent_id: None,
            collection_task_id: None,
            embedding: None,
            score: None,
            scored_at: None,
            scoring_rubric_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_defaults_load() {
        let registry = RubricRegistry::with_defaults().unwrap();
        assert_eq!(registry.ids(), vec!["ai_lead", "hca_deal", "marketing_signal"]);

        let ai = registry.get("ai_lead").unwrap();
        let keys: Vec<&str> = ai.categories.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["company_size", "direct_fit", "funding", "hiring", "news", "tech_stack"]
        );
        for id in registry.ids() {
            let total: u32 = registry.get(&id).unwrap().categories.values().map(|c| c.max).sum();
            assert_eq!(total, 100, "rubric {}", id);
        }
    }

    #[test]
    fn test_render_fills_placeholders() {
        let registry = RubricRegistry::with_defaults().unwrap();
        let prompt = registry.get("ai_lead").unwrap().render(&entity(), &[]);
        assert!(prompt.contains("Name: Acme"));
        assert!(prompt.contains("Source: https://acme.test"));
        assert!(prompt.contains("\"employees\": 120"));
        assert!(prompt.contains("Enrichment: None"));
        assert!(!prompt.contains("{relations_text}"));
    }

    #[test]
    fn test_load_additional_rubric() {
        let mut registry = RubricRegistry::with_defaults().unwrap();
        let n = registry
            .load_yaml(
                r#"
rubrics:
  - id: partner_fit
    name: Partner Fit
    system_prompt: Rate partners.
    prompt_template: "Partner {name}"
    categories:
      overlap: { max: 60 }
      reputation: { max: 40, min: 5 }
"#,
            )
            .unwrap();
        assert_eq!(n, 1);
        let rubric = registry.get("partner_fit").unwrap();
        assert_eq!(rubric.categories["reputation"].clamp(0.0), 5);
        assert_eq!(rubric.categories["overlap"].clamp(99.4), 60);
        assert!(registry.load_yaml("rubrics: [{id: x}]").is_err());
    }
}
