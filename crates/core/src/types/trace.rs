use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Dispatched,
    MemoryRecall,
    Executing,
    EntityPersist,
    SkillCall,
    Delegated,
    Reviewing,
    Approved,
    Completed,
    Failed,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::MemoryRecall => "memory_recall",
            Self::Executing => "executing",
            Self::EntityPersist => "entity_persist",
            Self::SkillCall => "skill_call",
            Self::Delegated => "delegated",
            Self::Reviewing => "reviewing",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "dispatched" => Self::Dispatched,
            "memory_recall" => Self::MemoryRecall,
            "executing" => Self::Executing,
            "entity_persist" => Self::EntityPersist,
            "skill_call" => Self::SkillCall,
            "delegated" => Self::Delegated,
            "reviewing" => Self::Reviewing,
            "approved" => Self::Approved,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => return None,
        })
    }
}

/// Append-only audit row for one step of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionTrace {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub task_id: Uuid,
    pub step_type: StepType,
    /// Strictly increasing per task.
    pub step_order: u32,
    pub agent_id: Option<Uuid>,
    pub details: Value,
    pub duration_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Input for `TraceStore::append`. The store assigns `step_order`.
#[derive(Debug, Clone)]
pub struct NewTrace {
    pub task_id: Uuid,
    pub step_type: StepType,
    pub agent_id: Option<Uuid>,
    pub details: Value,
    pub duration_ms: Option<u64>,
}

impl NewTrace {
    pub fn new(task_id: Uuid, step_type: StepType) -> Self {
        Self {
            task_id,
            step_type,
            agent_id: None,
            details: Value::Object(Default::default()),
            duration_ms: None,
        }
    }

    pub fn with_agent(mut self, agent_id: Option<Uuid>) -> Self {
        self.agent_id = agent_id;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}
