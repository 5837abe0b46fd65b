use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Experience,
    Skill,
    Preference,
    Relationship,
    Procedure,
}

/// A typed, agent-scoped recollection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMemory {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub agent_id: Uuid,
    pub memory_type: MemoryType,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub importance: f64,
    pub access_count: u64,
    pub source: Option<String>,
    pub source_task_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AgentMemory {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Input for `MemoryStore::store`.
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub agent_id: Uuid,
    pub memory_type: MemoryType,
    pub content: String,
    pub importance: f64,
    pub embedding: Option<Vec<f32>>,
    pub source: Option<String>,
    pub source_task_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    pub fn new(agent_id: Uuid, memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            agent_id,
            memory_type,
            content: content.into(),
            importance: 0.5,
            embedding: None,
            source: None,
            source_task_id: None,
            expires_at: None,
        }
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance.clamp(0.0, 1.0);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_source_task(mut self, task_id: Uuid) -> Self {
        self.source_task_id = Some(task_id);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Filter for `MemoryStore::get_relevant`.
#[derive(Debug, Clone)]
pub struct MemoryQuery {
    pub types: Option<Vec<MemoryType>>,
    pub limit: usize,
    pub min_importance: f64,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            types: None,
            limit: 10,
            min_importance: 0.0,
        }
    }
}
