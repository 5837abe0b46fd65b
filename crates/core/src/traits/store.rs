//! Store traits.
//!
//! Every method takes the tenant explicitly; implementations never read or
//! write across tenants. Lookups of rows outside the tenant behave exactly
//! like lookups of missing rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::Result;
use crate::types::*;

// =============================================================================
// Agents
// =============================================================================

/// Agents, groups, relationships and proficiency rows.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn upsert_agent(&self, agent: Agent) -> Result<()>;

    async fn get_agent(&self, tenant: TenantId, id: Uuid) -> Result<Option<Agent>>;

    async fn list_agents(&self, tenant: TenantId) -> Result<Vec<Agent>>;

    async fn create_group(&self, group: AgentGroup) -> Result<()>;

    async fn get_group(&self, tenant: TenantId, id: Uuid) -> Result<Option<AgentGroup>>;

    /// Add an edge. A `supervises` edge that would close a cycle in its group
    /// fails with an integrity error.
    async fn add_relationship(&self, rel: AgentRelationship) -> Result<()>;

    async fn list_relationships(&self, tenant: TenantId, group: Uuid) -> Result<Vec<AgentRelationship>>;

    /// Relationships touching `agent` in any group of the tenant.
    async fn relationships_of(&self, tenant: TenantId, agent: Uuid) -> Result<Vec<AgentRelationship>>;

    async fn get_skill(&self, tenant: TenantId, agent: Uuid, skill_name: &str) -> Result<Option<AgentSkill>>;

    async fn upsert_skill(&self, skill: AgentSkill) -> Result<()>;
}

// =============================================================================
// Tasks
// =============================================================================

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: Task) -> Result<Task>;

    async fn get(&self, tenant: TenantId, id: Uuid) -> Result<Option<Task>>;

    /// Replace the stored row. Fails with not-found for unknown ids.
    async fn update(&self, task: &Task) -> Result<()>;

    /// Replace the stored row unless it is already `failed`. Returns whether
    /// the write happened. The check and the write are one atomic step.
    async fn update_unless_failed(&self, task: &Task) -> Result<bool>;

    async fn list(&self, tenant: TenantId, statuses: Option<&[TaskStatus]>) -> Result<Vec<Task>>;

    async fn children(&self, tenant: TenantId, parent: Uuid) -> Result<Vec<Task>>;
}

// =============================================================================
// Memory
// =============================================================================

/// Typed agent-scoped recollection. Expired rows are invisible to every read.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store(&self, tenant: TenantId, memory: NewMemory) -> Result<AgentMemory>;

    /// Fetch a memory, bumping `access_count` and `last_accessed_at`.
    async fn recall(&self, tenant: TenantId, id: Uuid) -> Result<Option<AgentMemory>>;

    async fn forget(&self, tenant: TenantId, id: Uuid) -> Result<bool>;

    /// Copy memories to another agent with `importance *= 0.8`.
    async fn share(&self, tenant: TenantId, from_agent: Uuid, to_agent: Uuid, ids: &[Uuid]) -> Result<Vec<AgentMemory>>;

    /// Non-expired memories ordered by importance, highest first.
    async fn get_relevant(&self, tenant: TenantId, agent: Uuid, query: &MemoryQuery) -> Result<Vec<AgentMemory>>;

    /// Ordered by `last_accessed_at` descending, never-accessed first.
    async fn get_recent(&self, tenant: TenantId, agent: Uuid, limit: usize) -> Result<Vec<AgentMemory>>;

    /// Promote frequently accessed memories. Returns the number changed.
    async fn consolidate(&self, tenant: TenantId, agent: Uuid, min_access_count: u64) -> Result<usize>;

    /// Delete expired memories. Returns the number removed.
    async fn sweep_expired(&self, tenant: TenantId) -> Result<usize>;
}

// =============================================================================
// Knowledge Graph
// =============================================================================

#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    async fn create_entity(&self, tenant: TenantId, entity: NewEntity) -> Result<KnowledgeEntity>;

    /// Rank by embedding similarity to the query, ties broken by confidence.
    async fn find_entities(&self, tenant: TenantId, query: &EntityQuery) -> Result<Vec<ScoredEntity>>;

    async fn get_entity(&self, tenant: TenantId, id: Uuid, include_relations: bool) -> Result<Option<EntityWithRelations>>;

    async fn list_entities(
        &self,
        tenant: TenantId,
        types: Option<&[String]>,
        status: Option<EntityStatus>,
    ) -> Result<Vec<KnowledgeEntity>>;

    /// Shallow-union `update.properties` and write a history row.
    async fn update_entity(
        &self,
        tenant: TenantId,
        id: Uuid,
        update: EntityUpdate,
        reason: Option<&str>,
    ) -> Result<Option<KnowledgeEntity>>;

    /// Delete an entity and every relation touching it.
    async fn delete_entity(&self, tenant: TenantId, id: Uuid) -> Result<bool>;

    /// Repoint the duplicates' relations to `primary`, then delete them.
    /// All or nothing.
    async fn merge_entities(
        &self,
        tenant: TenantId,
        primary: Uuid,
        duplicates: &[Uuid],
        reason: &str,
    ) -> Result<KnowledgeEntity>;

    async fn create_relation(&self, tenant: TenantId, relation: NewRelation) -> Result<KnowledgeRelation>;

    async fn find_relations(&self, tenant: TenantId, filter: &RelationFilter) -> Result<Vec<KnowledgeRelation>>;

    /// Breadth-first shortest path as a list of relations. Empty when no path
    /// exists within `max_depth`, when `src == dst`, or when the search
    /// visits more than 1000 nodes.
    async fn get_path(&self, tenant: TenantId, src: Uuid, dst: Uuid, query: &PathQuery) -> Result<Vec<KnowledgeRelation>>;

    async fn get_neighborhood(&self, tenant: TenantId, id: Uuid, query: &NeighborhoodQuery) -> Result<Neighborhood>;

    /// History rows ordered by version.
    async fn get_entity_timeline(&self, tenant: TenantId, id: Uuid) -> Result<Vec<EntityHistory>>;

    /// Persist a rubric score: `score`, `scored_at`, `scoring_rubric_id` and
    /// `properties.score_breakdown`.
    async fn record_score(
        &self,
        tenant: TenantId,
        id: Uuid,
        score: u8,
        rubric_id: &str,
        breakdown: Map<String, Value>,
    ) -> Result<Option<KnowledgeEntity>>;

    async fn count_created_since(&self, tenant: TenantId, since: DateTime<Utc>) -> Result<usize>;

    /// Every lowercased `(name, entity_type)` pair for the tenant, in one read.
    async fn existing_keys(&self, tenant: TenantId) -> Result<HashSet<(String, String)>>;
}

// =============================================================================
// Traces
// =============================================================================

/// Append-only trace rows. The store assigns `step_order = max + 1`.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn append(&self, tenant: TenantId, trace: NewTrace) -> Result<ExecutionTrace>;

    /// Rows for a task ordered by `step_order`.
    async fn list(&self, tenant: TenantId, task: Uuid) -> Result<Vec<ExecutionTrace>>;
}

// =============================================================================
// Skills & Credentials
// =============================================================================

/// Ciphertext rows for the credential vault.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn insert(&self, credential: SkillCredential) -> Result<()>;

    async fn get(&self, tenant: TenantId, id: Uuid) -> Result<Option<SkillCredential>>;

    async fn list_for_skill(&self, tenant: TenantId, skill_config: Uuid) -> Result<Vec<SkillCredential>>;

    async fn set_status(&self, tenant: TenantId, id: Uuid, status: CredentialStatus) -> Result<bool>;

    async fn touch(&self, tenant: TenantId, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Every row across tenants. Used only by offline key rotation.
    async fn list_all(&self) -> Result<Vec<SkillCredential>>;

    async fn replace_ciphertext(&self, id: Uuid, encrypted_value: String) -> Result<()>;
}

/// Skill configs and tenant gateway instances.
#[async_trait]
pub trait SkillCatalog: Send + Sync {
    async fn upsert_config(&self, config: SkillConfig) -> Result<()>;

    async fn get_config(&self, tenant: TenantId, skill_name: &str) -> Result<Option<SkillConfig>>;

    async fn list_configs(&self, tenant: TenantId) -> Result<Vec<SkillConfig>>;

    async fn upsert_instance(&self, instance: TenantInstance) -> Result<()>;

    /// A `running` instance of the given type for the tenant, if any.
    async fn running_instance(&self, tenant: TenantId, instance_type: &str) -> Result<Option<TenantInstance>>;
}

// =============================================================================
// Chat
// =============================================================================

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_session(&self, session: ChatSession) -> Result<()>;

    async fn get_session(&self, tenant: TenantId, id: Uuid) -> Result<Option<ChatSession>>;

    async fn update_session(&self, session: &ChatSession) -> Result<()>;

    async fn append_message(&self, message: SessionMessage) -> Result<SessionMessage>;

    async fn list_messages(&self, tenant: TenantId, session: Uuid) -> Result<Vec<SessionMessage>>;

    async fn upsert_agent_kit(&self, kit: AgentKit) -> Result<()>;

    async fn get_agent_kit(&self, tenant: TenantId, id: Uuid) -> Result<Option<AgentKit>>;
}

// =============================================================================
// LLM Catalogue
// =============================================================================

#[async_trait]
pub trait LlmCatalog: Send + Sync {
    async fn upsert_model(&self, model: LlmModel) -> Result<()>;

    async fn get_model(&self, id: Uuid) -> Result<Option<LlmModel>>;

    async fn list_models(&self) -> Result<Vec<LlmModel>>;

    async fn set_config(&self, config: LlmConfig) -> Result<()>;

    async fn get_config(&self, tenant: TenantId) -> Result<Option<LlmConfig>>;
}
