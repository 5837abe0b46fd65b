use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::TenantId;

// =============================================================================
// Entities
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Draft,
    Verified,
    Enriched,
    Actioned,
    Archived,
}

/// A node in the tenant knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEntity {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub entity_type: String,
    pub category: Option<String>,
    pub name: String,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub properties: Map<String, Value>,
    pub confidence: f64,
    pub status: EntityStatus,
    pub source_agent_id: Option<Uuid>,
    pub collection_task_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub score: Option<u8>,
    pub scored_at: Option<DateTime<Utc>>,
    pub scoring_rubric_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeEntity {
    /// Natural dedup key: lowercased, trimmed `(name, entity_type)`.
    pub fn dedup_key(&self) -> (String, String) {
        dedup_key(&self.name, &self.entity_type)
    }
}

/// Lowercased, trimmed `(name, entity_type)` pair.
pub fn dedup_key(name: &str, entity_type: &str) -> (String, String) {
    (name.trim().to_lowercase(), entity_type.trim().to_lowercase())
}

/// Input for `KnowledgeGraph::create_entity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEntity {
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source_agent_id: Option<Uuid>,
    #[serde(default)]
    pub collection_task_id: Option<Uuid>,
}

fn default_confidence() -> f64 {
    1.0
}

impl NewEntity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            name: name.into(),
            category: None,
            aliases: Vec::new(),
            description: None,
            properties: Map::new(),
            confidence: default_confidence(),
            source_agent_id: None,
            collection_task_id: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Text the embedding is computed from.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.name, self.description.as_deref().unwrap_or(""))
    }
}

/// Partial update for `KnowledgeGraph::update_entity`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub status: Option<EntityStatus>,
    pub confidence: Option<f64>,
    pub aliases: Option<Vec<String>>,
    /// Shallow-unioned into the existing properties.
    pub properties: Map<String, Value>,
}

/// Append-only version row written on every entity update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityHistory {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub entity_id: Uuid,
    pub version: u32,
    /// Properties as they were before the change.
    pub properties: Map<String, Value>,
    pub change_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Relations
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRelation {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub from_entity_id: Uuid,
    pub to_entity_id: Uuid,
    pub relation_type: String,
    pub strength: f64,
    pub evidence: Option<String>,
    pub bidirectional: bool,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeRelation {
    /// The endpoint opposite `id`, if `id` is one of the endpoints.
    pub fn other_end(&self, id: Uuid) -> Option<Uuid> {
        if self.from_entity_id == id {
            Some(self.to_entity_id)
        } else if self.to_entity_id == id {
            Some(self.from_entity_id)
        } else {
            None
        }
    }

    pub fn touches(&self, id: Uuid) -> bool {
        self.from_entity_id == id || self.to_entity_id == id
    }
}

/// Input for `KnowledgeGraph::create_relation`.
#[derive(Debug, Clone)]
pub struct NewRelation {
    pub from_entity_id: Uuid,
    pub to_entity_id: Uuid,
    pub relation_type: String,
    pub strength: f64,
    pub evidence: Option<String>,
    pub bidirectional: bool,
}

impl NewRelation {
    pub fn new(from: Uuid, to: Uuid, relation_type: impl Into<String>) -> Self {
        Self {
            from_entity_id: from,
            to_entity_id: to,
            relation_type: relation_type.into(),
            strength: 1.0,
            evidence: None,
            bidirectional: false,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = strength;
        self
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }

    pub fn bidirectional(mut self) -> Self {
        self.bidirectional = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

// =============================================================================
// Queries
// =============================================================================

#[derive(Debug, Clone)]
pub struct EntityQuery {
    pub query: String,
    pub types: Option<Vec<String>>,
    pub limit: usize,
    pub min_confidence: f64,
}

impl EntityQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            types: None,
            limit: 10,
            min_confidence: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RelationFilter {
    pub entity_id: Option<Uuid>,
    pub types: Option<Vec<String>>,
    pub direction: Direction,
    pub min_strength: f64,
}

#[derive(Debug, Clone)]
pub struct PathQuery {
    pub max_depth: usize,
    pub relation_types: Option<Vec<String>>,
    /// `Both` walks relations as undirected edges.
    pub direction: Direction,
}

impl Default for PathQuery {
    fn default() -> Self {
        Self {
            max_depth: 4,
            relation_types: None,
            direction: Direction::Both,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NeighborhoodQuery {
    pub depth: usize,
    pub relation_types: Option<Vec<String>>,
    pub entity_types: Option<Vec<String>>,
}

impl Default for NeighborhoodQuery {
    fn default() -> Self {
        Self {
            depth: 2,
            relation_types: None,
            entity_types: None,
        }
    }
}

// =============================================================================
// Views
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntity {
    pub entity: KnowledgeEntity,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityWithRelations {
    pub entity: KnowledgeEntity,
    pub relations: Vec<KnowledgeRelation>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Neighborhood {
    pub entities: Vec<KnowledgeEntity>,
    pub relations: Vec<KnowledgeRelation>,
}

/// Outcome of applying a scoring rubric to an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityScore {
    pub score: u8,
    pub breakdown: Map<String, Value>,
    pub reasoning: String,
    pub rubric_id: String,
}
