use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::TenantId;

// =============================================================================
// Skill Configuration
// =============================================================================

/// Per-tenant capability flag for a named skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillConfig {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub skill_name: String,
    pub enabled: bool,
    pub requires_approval: bool,
    /// Calls per minute per tenant. `None` means unlimited.
    pub rate_limit: Option<u32>,
    pub created_at: DateTime<Utc>,
}

impl SkillConfig {
    pub fn new(tenant_id: TenantId, skill_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            skill_name: skill_name.into(),
            enabled: true,
            requires_approval: false,
            rate_limit: None,
            created_at: Utc::now(),
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn requiring_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.rate_limit = Some(per_minute);
        self
    }
}

// =============================================================================
// Credentials
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Revoked,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

/// Encrypted credential row. Only ciphertext is ever held here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillCredential {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub skill_config_id: Uuid,
    pub credential_key: String,
    #[serde(skip_serializing)]
    pub encrypted_value: String,
    pub credential_type: String,
    pub status: CredentialStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Tenant Gateway Instances
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Provisioning,
    Running,
    Stopped,
    Error,
    Destroying,
    Upgrading,
}

/// Handle to a running per-tenant gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantInstance {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub instance_type: String,
    pub status: InstanceStatus,
    pub internal_url: String,
    pub health: Option<Value>,
}

impl TenantInstance {
    pub fn new(
        tenant_id: TenantId,
        instance_type: impl Into<String>,
        status: InstanceStatus,
        internal_url: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            instance_type: instance_type.into(),
            status,
            internal_url: internal_url.into(),
            health: None,
        }
    }
}

// =============================================================================
// Skill Outcome
// =============================================================================

/// The three payload shapes a skill invocation can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SkillOutcome {
    Success { result: Value },
    PendingApproval { skill_name: String },
    Error { error: String },
}

impl SkillOutcome {
    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error { error: msg.into() }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::PendingApproval { .. } => "pending_approval",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outcome_wire_shapes() {
        let pending = SkillOutcome::PendingApproval {
            skill_name: "gmail".into(),
        };
        assert_eq!(
            serde_json::to_value(&pending).unwrap(),
            json!({"status": "pending_approval", "skill_name": "gmail"})
        );
        assert_eq!(
            serde_json::to_value(SkillOutcome::error("No running gateway")).unwrap(),
            json!({"status": "error", "error": "No running gateway"})
        );
    }

    #[test]
    fn test_credential_never_serializes_ciphertext() {
        let cred = SkillCredential {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            skill_config_id: Uuid::new_v4(),
            credential_key: "api_key".into(),
            encrypted_value: "c2VjcmV0".into(),
            credential_type: "api_key".into(),
            status: CredentialStatus::Active,
            last_used_at: None,
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(&cred).unwrap();
        assert!(v.get("encrypted_value").is_none());
    }
}
