//! Chat sessions as seen from the orchestration core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::TenantId;

/// Named bundle of agents a chat session talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentKit {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub agent_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub user_id: Uuid,
    pub agent_kit_id: Option<Uuid>,
    pub root_task_id: Option<Uuid>,
    /// Runtime session handle when an external agent runtime is used.
    pub runtime_session_id: Option<String>,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(tenant_id: TenantId, user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            agent_kit_id: None,
            root_task_id: None,
            runtime_session_id: None,
            title: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_agent_kit(mut self, kit_id: Uuid) -> Self {
        self.agent_kit_id = Some(kit_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A persisted chat message. Assistant replies carry task and agent refs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub task_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub context: Value,
    pub created_at: DateTime<Utc>,
}

impl SessionMessage {
    pub fn new(tenant_id: TenantId, session_id: Uuid, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            session_id,
            role,
            content: content.into(),
            task_id: None,
            agent_id: None,
            context: Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }
}
