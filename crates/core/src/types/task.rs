use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::TenantId;

/// Task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
    Thinking,
    Executing,
    WaitingInput,
    /// Parent waits here while a child task runs.
    Delegated,
    /// Finished work awaiting human approval.
    Reviewing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Thinking => "thinking",
            Self::Executing => "executing",
            Self::WaitingInput => "waiting_input",
            Self::Delegated => "delegated",
            Self::Reviewing => "reviewing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
    Background,
}

/// A unit of work assigned to one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub assigned_agent_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub task_type: String,
    pub objective: String,
    pub context: Value,
    pub reasoning: Option<String>,
    pub output: Option<String>,
    pub confidence: Option<f64>,
    pub error: Option<String>,
    pub requires_approval: bool,
    pub approved_by: Option<Uuid>,
    pub tokens_used: u64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(tenant_id: TenantId, task_type: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            assigned_agent_id: None,
            group_id: None,
            parent_task_id: None,
            status: TaskStatus::Queued,
            priority: TaskPriority::Normal,
            task_type: task_type.into(),
            objective: objective.into(),
            context: Value::Object(Default::default()),
            reasoning: None,
            output: None,
            confidence: None,
            error: None,
            requires_approval: false,
            approved_by: None,
            tokens_used: 0,
            cost: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_agent(mut self, agent_id: Uuid) -> Self {
        self.assigned_agent_id = Some(agent_id);
        self
    }

    pub fn with_group(mut self, group_id: Uuid) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_parent(mut self, parent_task_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_task_id);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    /// Capabilities requested in `context.required_capabilities`.
    pub fn required_capabilities(&self) -> Vec<String> {
        self.context
            .get("required_capabilities")
            .and_then(Value::as_array)
            .map(|caps| {
                caps.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of ancestors, as recorded in `context.delegation_depth`.
    pub fn delegation_depth(&self) -> u32 {
        self.context
            .get("delegation_depth")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }

    /// Move to a terminal state and stamp the completion time.
    pub fn finish(&mut self, status: TaskStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_required_capabilities_from_context() {
        let task = Task::new(Uuid::new_v4(), "report", "Quarterly numbers")
            .with_context(json!({"required_capabilities": ["sql", "reporting", 3]}));
        assert_eq!(task.required_capabilities(), vec!["sql", "reporting"]);
        assert_eq!(task.delegation_depth(), 0);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let s = serde_json::to_string(&TaskStatus::WaitingInput).unwrap();
        assert_eq!(s, "\"waiting_input\"");
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Reviewing.is_terminal());
    }
}
