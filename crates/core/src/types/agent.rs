use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TenantId;

// =============================================================================
// Agents
// =============================================================================

/// How much freedom an agent has to finish work without a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    #[default]
    Autonomous,
    Supervised,
    /// Finished tasks wait in `reviewing` until approved.
    ApprovalRequired,
}

/// A configured LLM persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub role: String,
    pub capabilities: Vec<String>,
    pub personality: Option<String>,
    pub autonomy_level: AutonomyLevel,
    pub max_delegation_depth: u32,
    pub llm_config_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            role: String::new(),
            capabilities: Vec::new(),
            personality: None,
            autonomy_level: AutonomyLevel::default(),
            max_delegation_depth: 2,
            llm_config_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = Some(personality.into());
        self
    }

    pub fn with_autonomy(mut self, level: AutonomyLevel) -> Self {
        self.autonomy_level = level;
        self
    }

    pub fn with_max_delegation_depth(mut self, depth: u32) -> Self {
        self.max_delegation_depth = depth;
        self
    }

    /// System prompt describing this persona to the model.
    pub fn system_prompt(&self) -> String {
        let mut prompt = format!("You are {}", self.name);
        if !self.role.is_empty() {
            prompt.push_str(&format!(", {}", self.role));
        }
        prompt.push('.');
        if let Some(p) = &self.personality {
            prompt.push(' ');
            prompt.push_str(p);
        }
        if !self.capabilities.is_empty() {
            prompt.push_str(&format!(
                "\nYour capabilities: {}.",
                self.capabilities.join(", ")
            ));
        }
        prompt
    }
}

// =============================================================================
// Groups & Relationships
// =============================================================================

/// A named set of agents connected by relationships.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentGroup {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub goal: Option<String>,
    pub strategy: Option<String>,
    pub shared_context: serde_json::Value,
    pub escalation_rules: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AgentGroup {
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            name: name.into(),
            goal: None,
            strategy: None,
            shared_context: serde_json::Value::Null,
            escalation_rules: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Must stay acyclic within a group.
    Supervises,
    DelegatesTo,
    CollaboratesWith,
}

/// Directed, typed edge between two agents within a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRelationship {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub group_id: Uuid,
    pub from_agent_id: Uuid,
    pub to_agent_id: Uuid,
    pub relationship_type: RelationshipType,
    pub created_at: DateTime<Utc>,
}

impl AgentRelationship {
    pub fn new(
        tenant_id: TenantId,
        group_id: Uuid,
        from_agent_id: Uuid,
        to_agent_id: Uuid,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            group_id,
            from_agent_id,
            to_agent_id,
            relationship_type,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Skill Proficiency
// =============================================================================

/// Per-agent proficiency for a task type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSkill {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub agent_id: Uuid,
    pub skill_name: String,
    pub proficiency: f64,
    pub times_used: u64,
    pub success_rate: f64,
}

impl AgentSkill {
    pub fn new(tenant_id: TenantId, agent_id: Uuid, skill_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            agent_id,
            skill_name: skill_name.into(),
            proficiency: 0.5,
            times_used: 0,
            success_rate: 0.0,
        }
    }

    /// Fold one task outcome into the running statistics.
    pub fn record_use(&mut self, success: bool) {
        let previous = self.times_used as f64;
        self.times_used += 1;
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = (self.success_rate * previous + outcome) / self.times_used as f64;
        self.proficiency = (self.proficiency + 0.02).min(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_use_running_average() {
        let mut skill = AgentSkill::new(Uuid::new_v4(), Uuid::new_v4(), "chat");
        skill.proficiency = 0.99;
        skill.record_use(true);
        skill.record_use(false);
        assert_eq!(skill.times_used, 2);
        assert!((skill.success_rate - 0.5).abs() < 1e-9);
        assert_eq!(skill.proficiency, 1.0);
    }

    #[test]
    fn test_system_prompt_mentions_capabilities() {
        let agent = Agent::new(Uuid::new_v4(), "Scout")
            .with_role("lead researcher")
            .with_capabilities(["sql", "reporting"]);
        let prompt = agent.system_prompt();
        assert!(prompt.starts_with("You are Scout, lead researcher."));
        assert!(prompt.contains("sql, reporting"));
    }
}
