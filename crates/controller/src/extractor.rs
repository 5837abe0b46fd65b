//! Knowledge extraction: agent output to candidate entities, and rubric
//! scoring through the model.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use orchestra_core::{
    text::preview,
    traits::{ChatMessage, ChatRequest, ModelResolver},
    types::{EntityScore, KnowledgeEntity, KnowledgeRelation, RoutingPriority, TenantId},
    Error, Result,
};

use crate::rubrics::Rubric;

/// Characters of content sent to the extraction prompt.
const MAX_EXTRACTION_CHARS: usize = 24_000;

const EXTRACTION_PROMPT: &str = "You extract structured knowledge from text. \
Identify the organizations, people, investors, products and market signals it mentions. \
Return ONLY a JSON array. Each element is an object with: \
\"name\" (string), \"entity_type\" (snake_case string), \
\"category\" (one of lead, contact, investor, accelerator, organization, person, signal), \
\"description\" (one sentence), \"confidence\" (0.0-1.0) and \"properties\" (object of facts). \
Return [] when nothing qualifies. Do not add commentary.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    PlainText,
    StructuredJson,
    Html,
    Transcript,
}

/// Optional hint restricting what the model extracts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntitySchema {
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
}

// =============================================================================
// Tolerant parsing
// =============================================================================

fn strip_fences(text: &str) -> &str {
    let Some(start) = text.find("```") else {
        return text;
    };
    let after = &text[start + 3..];
    // Skip the language tag on the opening fence line.
    let body = match after.find('\n') {
        Some(nl) => &after[nl + 1..],
        None => after,
    };
    match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    }
}

/// Parse model output as JSON: strip code fences, then fall back to the
/// outermost array or object in the text.
pub fn parse_json_lenient(text: &str) -> Result<Value> {
    let body = strip_fences(text.trim()).trim();
    if let Ok(v) = serde_json::from_str(body) {
        return Ok(v);
    }

    let open = body.find(['[', '{']);
    if let Some(start) = open {
        let closer = if body.as_bytes()[start] == b'[' { ']' } else { '}' };
        if let Some(end) = body.rfind(closer) {
            if end > start {
                if let Ok(v) = serde_json::from_str(&body[start..=end]) {
                    return Ok(v);
                }
            }
        }
    }
    Err(Error::extraction(format!(
        "no JSON found in model output: {}",
        preview(body, 120)
    )))
}

/// Flatten a parsed payload into a list of entity objects.
fn entity_objects(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.into_iter().filter(Value::is_object).collect(),
        Value::Object(mut map) => match map.remove("entities") {
            Some(Value::Array(items)) => items.into_iter().filter(Value::is_object).collect(),
            Some(other) => {
                map.insert("entities".into(), other);
                vec![Value::Object(map)]
            }
            None => vec![Value::Object(map)],
        },
        _ => Vec::new(),
    }
}

/// Remove markup, scripts and styles; decode common entities.
pub fn strip_html(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let mut out = String::with_capacity(html.len());
    let mut i = 0;

    while i < html.len() {
        let rest = &lower[i..];
        if rest.starts_with("<script") || rest.starts_with("<style") {
            let tag = if rest.starts_with("<script") { "</script>" } else { "</style>" };
            i = match rest.find(tag) {
                Some(end) => i + end + tag.len(),
                None => html.len(),
            };
            continue;
        }
        if rest.starts_with('<') {
            i = match rest.find('>') {
                Some(end) => i + end + 1,
                None => html.len(),
            };
            out.push(' ');
            continue;
        }
        let next = rest.find('<').map_or(html.len(), |p| i + p);
        out.push_str(&html[i..next]);
        i = next;
    }

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

// =============================================================================
// Extractor
// =============================================================================

pub struct KnowledgeExtractor {
    resolver: Arc<dyn ModelResolver>,
}

impl KnowledgeExtractor {
    pub fn new(resolver: Arc<dyn ModelResolver>) -> Self {
        Self { resolver }
    }

    /// Candidate entities as raw JSON objects, ready for validation.
    #[tracing::instrument(skip(self, content, schema), fields(tenant_id = %tenant, len = content.len()))]
    pub async fn extract(
        &self,
        tenant: TenantId,
        content: &str,
        content_type: ContentType,
        schema: Option<&EntitySchema>,
    ) -> Result<Vec<Value>> {
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        if content_type == ContentType::StructuredJson {
            if let Ok(parsed) = serde_json::from_str::<Value>(content) {
                let entities = apply_schema(entity_objects(parsed), schema);
                tracing::debug!(count = entities.len(), "Mapped structured JSON directly");
                return Ok(entities);
            }
        }

        let text = match content_type {
            ContentType::Html => strip_html(content),
            _ => content.to_string(),
        };

        let mut system = EXTRACTION_PROMPT.to_string();
        if let Some(schema) = schema {
            if let Some(ty) = &schema.entity_type {
                system.push_str(&format!(" Only extract entities of type \"{}\".", ty));
            }
            if !schema.fields.is_empty() {
                system.push_str(&format!(
                    " Put these fields in properties when present: {}.",
                    schema.fields.join(", ")
                ));
            }
        }

        let resolved = self
            .resolver
            .resolve(tenant, Some("knowledge_extraction"), RoutingPriority::Cost)
            .await?;
        let request = ChatRequest::new(
            &resolved.model.model_name,
            vec![
                ChatMessage::system(system),
                ChatMessage::user(preview(&text, MAX_EXTRACTION_CHARS)),
            ],
        )
        .with_temperature(0.0);
        let response = resolved.client.chat(&request).await?;

        let entities = apply_schema(entity_objects(parse_json_lenient(&response.content)?), schema);
        tracing::info!(count = entities.len(), "Extracted candidate entities");
        Ok(entities)
    }

    /// Score `entity` with `rubric`. Scores are clamped to [0, 100] and the
    /// breakdown carries exactly the rubric's categories.
    pub async fn apply_rubric(
        &self,
        tenant: TenantId,
        rubric: &Rubric,
        entity: &KnowledgeEntity,
        relations: &[(KnowledgeRelation, String)],
    ) -> Result<EntityScore> {
        let resolved = self
            .resolver
            .resolve(tenant, Some("entity_scoring"), RoutingPriority::Quality)
            .await?;
        let request = ChatRequest::new(
            &resolved.model.model_name,
            vec![
                ChatMessage::system(rubric.system_prompt.clone()),
                ChatMessage::user(rubric.render(entity, relations)),
            ],
        )
        .with_temperature(0.0);
        let response = resolved.client.chat(&request).await?;

        let parsed = parse_json_lenient(&response.content)?;
        let raw_breakdown = parsed.get("breakdown").and_then(Value::as_object);
        let mut breakdown = Map::new();
        for (name, category) in &rubric.categories {
            let raw = raw_breakdown
                .and_then(|b| b.get(name))
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            breakdown.insert(name.clone(), Value::from(category.clamp(raw)));
        }

        let score = parsed
            .get("score")
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::extraction("rubric response has no numeric score"))?
            .round()
            .clamp(0.0, 100.0) as u8;

        Ok(EntityScore {
            score,
            breakdown,
            reasoning: parsed
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            rubric_id: rubric.id.clone(),
        })
    }
}

fn apply_schema(entities: Vec<Value>, schema: Option<&EntitySchema>) -> Vec<Value> {
    let Some(ty) = schema.and_then(|s| s.entity_type.as_deref()) else {
        return entities;
    };
    entities
        .into_iter()
        .map(|mut e| {
            if let Some(obj) = e.as_object_mut() {
                let missing = obj
                    .get("entity_type")
                    .and_then(Value::as_str)
                    .map_or(true, |s| s.trim().is_empty());
                if missing {
                    obj.insert("entity_type".into(), Value::String(ty.to_string()));
                }
            }
            e
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_core::mocks::{MockLlm, StaticModelResolver};
    use serde_json::json;
    use uuid::Uuid;

    fn extractor(reply: &str) -> (KnowledgeExtractor, Arc<MockLlm>) {
        let llm = Arc::new(MockLlm::constant(reply));
        (
            KnowledgeExtractor::new(Arc::new(StaticModelResolver::with_client(llm.clone()))),
            llm,
        )
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(
            parse_json_lenient("```json\n[{\"name\": \"Acme\"}]\n```").unwrap(),
            json!([{"name": "Acme"}])
        );
        assert_eq!(
            parse_json_lenient("Sure! Here you go: {\"score\": 71} Hope it helps.").unwrap(),
            json!({"score": 71})
        );
        assert_eq!(
            parse_json_lenient("prefix [1, [2, 3]] suffix").unwrap(),
            json!([1, [2, 3]])
        );
        assert!(matches!(
            parse_json_lenient("no json here").unwrap_err(),
            Error::Extraction(_)
        ));
    }

    #[test]
    fn test_strip_html() {
        let html = "<html><head><style>p{color:red}</style><script>alert(1)</script></head>\
                    <body><h1>Acme&nbsp;Corp</h1><p>Hiring &amp; growing</p></body></html>";
        assert_eq!(strip_html(html), "Acme Corp Hiring & growing");
    }

    #[tokio::test]
    async fn test_structured_json_skips_model() {
        let (ex, llm) = extractor("[]");
        let schema = EntitySchema {
            fields: vec![],
            entity_type: Some("investor".into()),
        };
        let out = ex
            .extract(
                Uuid::new_v4(),
                r#"{"entities": [{"name": "Sequoia"}, {"name": "Acme", "entity_type": "ai_company"}]}"#,
                ContentType::StructuredJson,
                Some(&schema),
            )
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["entity_type"], "investor");
        assert_eq!(out[1]["entity_type"], "ai_company");
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_plain_text_goes_through_model() {
        let (ex, llm) = extractor(
            "```json\n[{\"name\": \"Acme\", \"entity_type\": \"ai_company\", \"category\": \"lead\"}]\n```",
        );
        let out = ex
            .extract(
                Uuid::new_v4(),
                "Acme is hiring 3 ML engineers",
                ContentType::PlainText,
                None,
            )
            .await
            .unwrap();
        assert_eq!(out, vec![json!({"name": "Acme", "entity_type": "ai_company", "category": "lead"})]);
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_an_error() {
        let (ex, _) = extractor("I could not find anything.");
        let err = ex
            .extract(Uuid::new_v4(), "text", ContentType::Transcript, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Extraction(_)));
    }
}
