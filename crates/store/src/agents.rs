//! In-memory agent directory.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

use orchestra_core::{
    traits::AgentDirectory,
    types::{Agent, AgentGroup, AgentRelationship, AgentSkill, RelationshipType, TenantId},
    Error, Result,
};

/// Agents, groups and relationships held in process.
#[derive(Default)]
pub struct InMemoryAgentDirectory {
    agents: DashMap<Uuid, Agent>,
    groups: DashMap<Uuid, AgentGroup>,
    relationships: RwLock<Vec<AgentRelationship>>,
    skills: DashMap<(Uuid, String), AgentSkill>,
}

impl InMemoryAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn agent_in_tenant(&self, tenant: TenantId, id: Uuid) -> bool {
        self.agents
            .get(&id)
            .map(|a| a.tenant_id == tenant)
            .unwrap_or(false)
    }
}

/// True when `to` can already reach `from` through `supervises` edges, so
/// adding `from -> to` would close a cycle.
fn closes_supervision_cycle(edges: &[AgentRelationship], group: Uuid, from: Uuid, to: Uuid) -> bool {
    if from == to {
        return true;
    }
    let mut queue = VecDeque::from([to]);
    let mut seen = HashSet::from([to]);
    while let Some(node) = queue.pop_front() {
        for edge in edges.iter().filter(|e| {
            e.group_id == group
                && e.relationship_type == RelationshipType::Supervises
                && e.from_agent_id == node
        }) {
            if edge.to_agent_id == from {
                return true;
            }
            if seen.insert(edge.to_agent_id) {
                queue.push_back(edge.to_agent_id);
            }
        }
    }
    false
}

#[async_trait]
impl AgentDirectory for InMemoryAgentDirectory {
    async fn upsert_agent(&self, agent: Agent) -> Result<()> {
        self.agents.insert(agent.id, agent);
        Ok(())
    }

    async fn get_agent(&self, tenant: TenantId, id: Uuid) -> Result<Option<Agent>> {
        Ok(self
            .agents
            .get(&id)
            .filter(|a| a.tenant_id == tenant)
            .map(|a| a.clone()))
    }

    async fn list_agents(&self, tenant: TenantId) -> Result<Vec<Agent>> {
        let mut agents: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| a.tenant_id == tenant)
            .map(|a| a.clone())
            .collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(agents)
    }

    async fn create_group(&self, group: AgentGroup) -> Result<()> {
        self.groups.insert(group.id, group);
        Ok(())
    }

    async fn get_group(&self, tenant: TenantId, id: Uuid) -> Result<Option<AgentGroup>> {
        Ok(self
            .groups
            .get(&id)
            .filter(|g| g.tenant_id == tenant)
            .map(|g| g.clone()))
    }

    async fn add_relationship(&self, rel: AgentRelationship) -> Result<()> {
        let group_ok = self
            .groups
            .get(&rel.group_id)
            .map(|g| g.tenant_id == rel.tenant_id)
            .unwrap_or(false);
        if !group_ok {
            return Err(Error::integrity(format!(
                "group {} does not belong to tenant",
                rel.group_id
            )));
        }
        if !self.agent_in_tenant(rel.tenant_id, rel.from_agent_id)
            || !self.agent_in_tenant(rel.tenant_id, rel.to_agent_id)
        {
            return Err(Error::integrity("relationship endpoints must belong to the tenant"));
        }

        let mut edges = self.relationships.write().await;
        if rel.relationship_type == RelationshipType::Supervises
            && closes_supervision_cycle(&edges, rel.group_id, rel.from_agent_id, rel.to_agent_id)
        {
            return Err(Error::integrity(format!(
                "supervises edge {} -> {} would create a cycle",
                rel.from_agent_id, rel.to_agent_id
            )));
        }
        tracing::debug!(
            group_id = %rel.group_id,
            from = %rel.from_agent_id,
            to = %rel.to_agent_id,
            kind = ?rel.relationship_type,
            "Relationship added"
        );
        edges.push(rel);
        Ok(())
    }

    async fn list_relationships(&self, tenant: TenantId, group: Uuid) -> Result<Vec<AgentRelationship>> {
        Ok(self
            .relationships
            .read()
            .await
            .iter()
            .filter(|r| r.tenant_id == tenant && r.group_id == group)
            .cloned()
            .collect())
    }

    async fn relationships_of(&self, tenant: TenantId, agent: Uuid) -> Result<Vec<AgentRelationship>> {
        Ok(self
            .relationships
            .read()
            .await
            .iter()
            .filter(|r| r.tenant_id == tenant && (r.from_agent_id == agent || r.to_agent_id == agent))
            .cloned()
            .collect())
    }

    async fn get_skill(&self, tenant: TenantId, agent: Uuid, skill_name: &str) -> Result<Option<AgentSkill>> {
        Ok(self
            .skills
            .get(&(agent, skill_name.to_string()))
            .filter(|s| s.tenant_id == tenant)
            .map(|s| s.clone()))
    }

    async fn upsert_skill(&self, skill: AgentSkill) -> Result<()> {
        self.skills
            .insert((skill.agent_id, skill.skill_name.clone()), skill);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(dir: &InMemoryAgentDirectory, tenant: TenantId) -> (AgentGroup, Vec<Agent>) {
        let group = AgentGroup::new(tenant, "research");
        dir.create_group(group.clone()).await.unwrap();
        let mut agents = Vec::new();
        for name in ["lead", "analyst", "writer"] {
            let agent = Agent::new(tenant, name);
            dir.upsert_agent(agent.clone()).await.unwrap();
            agents.push(agent);
        }
        (group, agents)
    }

    #[tokio::test]
    async fn test_supervises_cycle_rejected() {
        let dir = InMemoryAgentDirectory::new();
        let tenant = Uuid::new_v4();
        let (group, a) = seed(&dir, tenant).await;

        let edge = |from: &Agent, to: &Agent| {
            AgentRelationship::new(tenant, group.id, from.id, to.id, RelationshipType::Supervises)
        };
        dir.add_relationship(edge(&a[0], &a[1])).await.unwrap();
        dir.add_relationship(edge(&a[1], &a[2])).await.unwrap();

        let err = dir.add_relationship(edge(&a[2], &a[0])).await.unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));

        // Other edge types may point back up.
        dir.add_relationship(AgentRelationship::new(
            tenant,
            group.id,
            a[2].id,
            a[0].id,
            RelationshipType::CollaboratesWith,
        ))
        .await
        .unwrap();
        assert_eq!(dir.list_relationships(tenant, group.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cross_tenant_lookups_are_invisible() {
        let dir = InMemoryAgentDirectory::new();
        let tenant = Uuid::new_v4();
        let (group, agents) = seed(&dir, tenant).await;
        let other = Uuid::new_v4();

        assert!(dir.get_agent(other, agents[0].id).await.unwrap().is_none());
        assert!(dir.get_group(other, group.id).await.unwrap().is_none());
        assert!(dir.list_agents(other).await.unwrap().is_empty());

        let foreign = Agent::new(other, "intruder");
        dir.upsert_agent(foreign.clone()).await.unwrap();
        let err = dir
            .add_relationship(AgentRelationship::new(
                tenant,
                group.id,
                agents[0].id,
                foreign.id,
                RelationshipType::DelegatesTo,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
    }
}
