//! Agent memory stores.
//!
//! Expired rows stay stored until `sweep_expired` runs but are filtered out
//! of every read path. Ranking and consolidation rules are shared by both
//! backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use orchestra_core::{
    traits::MemoryStore,
    types::{AgentMemory, MemoryQuery, NewMemory, TenantId},
    Error, Result,
};

use crate::sqlite::{blocking, db_err, doc_col, open_connection};

/// Importance multiplier applied to shared copies.
pub const SHARE_DECAY: f64 = 0.8;
/// Ceiling reached by consolidation.
pub const CONSOLIDATION_CAP: f64 = 0.95;
/// Memories at or above this importance are left alone by consolidation.
pub const CONSOLIDATION_THRESHOLD: f64 = 0.9;

fn new_row(tenant: TenantId, memory: NewMemory) -> Result<AgentMemory> {
    if memory.content.trim().is_empty() {
        return Err(Error::validation("memory content must not be empty"));
    }
    Ok(AgentMemory {
        id: Uuid::new_v4(),
        tenant_id: tenant,
        agent_id: memory.agent_id,
        memory_type: memory.memory_type,
        content: memory.content,
        embedding: memory.embedding,
        importance: memory.importance.clamp(0.0, 1.0),
        access_count: 0,
        source: memory.source,
        source_task_id: memory.source_task_id,
        expires_at: memory.expires_at,
        last_accessed_at: None,
        created_at: Utc::now(),
    })
}

fn shared_copy(m: &AgentMemory, to_agent: Uuid, now: DateTime<Utc>) -> AgentMemory {
    AgentMemory {
        id: Uuid::new_v4(),
        agent_id: to_agent,
        importance: m.importance * SHARE_DECAY,
        access_count: 0,
        source: Some("shared".to_string()),
        last_accessed_at: None,
        created_at: now,
        ..m.clone()
    }
}

fn touch(m: &mut AgentMemory, now: DateTime<Utc>) {
    m.access_count += 1;
    m.last_accessed_at = Some(now);
}

fn consolidates(m: &AgentMemory, min_access_count: u64) -> bool {
    m.access_count >= min_access_count && m.importance < CONSOLIDATION_THRESHOLD
}

fn consolidate_one(m: &mut AgentMemory) {
    m.importance = (m.importance + 0.1).min(CONSOLIDATION_CAP);
}

/// Highest importance first, newest first on ties.
fn rank_relevant(found: Vec<AgentMemory>, query: &MemoryQuery) -> Vec<AgentMemory> {
    let mut found: Vec<AgentMemory> = found
        .into_iter()
        .filter(|m| m.importance >= query.min_importance)
        .filter(|m| {
            query
                .types
                .as_ref()
                .map(|t| t.contains(&m.memory_type))
                .unwrap_or(true)
        })
        .collect();
    found.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.created_at.cmp(&a.created_at))
    });
    found.truncate(query.limit);
    found
}

fn rank_recent(mut found: Vec<AgentMemory>, limit: usize) -> Vec<AgentMemory> {
    // Never-accessed rows sort first, then most recently accessed.
    found.sort_by(|a, b| match (a.last_accessed_at, b.last_accessed_at) {
        (None, None) => b.created_at.cmp(&a.created_at),
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(x), Some(y)) => y.cmp(&x),
    });
    found.truncate(limit);
    found
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
pub struct InMemoryMemoryStore {
    memories: RwLock<HashMap<Uuid, AgentMemory>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.memories.read().await.len()
    }

    async fn live_for(&self, tenant: TenantId, agent: Uuid) -> Vec<AgentMemory> {
        let now = Utc::now();
        self.memories
            .read()
            .await
            .values()
            .filter(|m| m.tenant_id == tenant && m.agent_id == agent && !m.is_expired(now))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn store(&self, tenant: TenantId, memory: NewMemory) -> Result<AgentMemory> {
        let row = new_row(tenant, memory)?;
        tracing::debug!(
            memory_id = %row.id,
            agent_id = %row.agent_id,
            memory_type = ?row.memory_type,
            importance = row.importance,
            "Memory stored"
        );
        self.memories.write().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn recall(&self, tenant: TenantId, id: Uuid) -> Result<Option<AgentMemory>> {
        let now = Utc::now();
        let mut memories = self.memories.write().await;
        Ok(memories
            .get_mut(&id)
            .filter(|m| m.tenant_id == tenant && !m.is_expired(now))
            .map(|m| {
                touch(m, now);
                m.clone()
            }))
    }

    async fn forget(&self, tenant: TenantId, id: Uuid) -> Result<bool> {
        let mut memories = self.memories.write().await;
        match memories.get(&id) {
            Some(m) if m.tenant_id == tenant => {
                memories.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn share(&self, tenant: TenantId, from_agent: Uuid, to_agent: Uuid, ids: &[Uuid]) -> Result<Vec<AgentMemory>> {
        let now = Utc::now();
        let mut memories = self.memories.write().await;
        let copies: Vec<AgentMemory> = ids
            .iter()
            .filter_map(|id| memories.get(id))
            .filter(|m| m.tenant_id == tenant && m.agent_id == from_agent && !m.is_expired(now))
            .map(|m| shared_copy(m, to_agent, now))
            .collect();
        for copy in &copies {
            memories.insert(copy.id, copy.clone());
        }
        tracing::debug!(from = %from_agent, to = %to_agent, count = copies.len(), "Memories shared");
        Ok(copies)
    }

    async fn get_relevant(&self, tenant: TenantId, agent: Uuid, query: &MemoryQuery) -> Result<Vec<AgentMemory>> {
        Ok(rank_relevant(self.live_for(tenant, agent).await, query))
    }

    async fn get_recent(&self, tenant: TenantId, agent: Uuid, limit: usize) -> Result<Vec<AgentMemory>> {
        Ok(rank_recent(self.live_for(tenant, agent).await, limit))
    }

    async fn consolidate(&self, tenant: TenantId, agent: Uuid, min_access_count: u64) -> Result<usize> {
        let now = Utc::now();
        let mut memories = self.memories.write().await;
        let mut changed = 0;
        for m in memories.values_mut().filter(|m| {
            m.tenant_id == tenant && m.agent_id == agent && !m.is_expired(now) && consolidates(m, min_access_count)
        }) {
            consolidate_one(m);
            changed += 1;
        }
        tracing::debug!(agent_id = %agent, changed, "Memories consolidated");
        Ok(changed)
    }

    async fn sweep_expired(&self, tenant: TenantId) -> Result<usize> {
        let now = Utc::now();
        let mut memories = self.memories.write().await;
        let before = memories.len();
        memories.retain(|_, m| !(m.tenant_id == tenant && m.is_expired(now)));
        Ok(before - memories.len())
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite-backed memory store. Rows are JSON documents keyed by tenant and
/// agent; filtering and ranking run over the decoded rows.
pub struct SqliteMemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMemoryStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS agent_memories (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                data TEXT NOT NULL -- JSON
            );
            CREATE INDEX IF NOT EXISTS idx_memories_tenant_agent ON agent_memories (tenant_id, agent_id);",
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn insert_row(conn: &Connection, m: &AgentMemory) -> Result<()> {
    conn.execute(
        "INSERT INTO agent_memories (id, tenant_id, agent_id, data) VALUES (?1, ?2, ?3, ?4)",
        params![
            m.id.to_string(),
            m.tenant_id.to_string(),
            m.agent_id.to_string(),
            serde_json::to_string(m)?,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn save_row(conn: &Connection, m: &AgentMemory) -> Result<()> {
    conn.execute(
        "UPDATE agent_memories SET data = ?1 WHERE id = ?2",
        params![serde_json::to_string(m)?, m.id.to_string()],
    )
    .map_err(db_err)?;
    Ok(())
}

fn load_rows(conn: &Connection, sql: &str, args: &[String]) -> Result<Vec<AgentMemory>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| doc_col::<AgentMemory>(row, 0))
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

fn live_rows(conn: &Connection, tenant: TenantId, agent: Uuid) -> Result<Vec<AgentMemory>> {
    let now = Utc::now();
    let rows = load_rows(
        conn,
        "SELECT data FROM agent_memories WHERE tenant_id = ?1 AND agent_id = ?2",
        &[tenant.to_string(), agent.to_string()],
    )?;
    Ok(rows.into_iter().filter(|m| !m.is_expired(now)).collect())
}

#[async_trait]
impl MemoryStore for SqliteMemoryStore {
    async fn store(&self, tenant: TenantId, memory: NewMemory) -> Result<AgentMemory> {
        let row = new_row(tenant, memory)?;
        let stored = row.clone();
        blocking(&self.conn, move |conn| insert_row(conn, &stored)).await?;
        tracing::debug!(memory_id = %row.id, agent_id = %row.agent_id, "Memory stored");
        Ok(row)
    }

    async fn recall(&self, tenant: TenantId, id: Uuid) -> Result<Option<AgentMemory>> {
        blocking(&self.conn, move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let found: Option<AgentMemory> = tx
                .query_row(
                    "SELECT data FROM agent_memories WHERE tenant_id = ?1 AND id = ?2",
                    params![tenant.to_string(), id.to_string()],
                    |row| doc_col(row, 0),
                )
                .optional()
                .map_err(db_err)?;
            let now = Utc::now();
            let Some(mut memory) = found.filter(|m| !m.is_expired(now)) else {
                return Ok(None);
            };
            touch(&mut memory, now);
            save_row(&tx, &memory)?;
            tx.commit().map_err(db_err)?;
            Ok(Some(memory))
        })
        .await
    }

    async fn forget(&self, tenant: TenantId, id: Uuid) -> Result<bool> {
        blocking(&self.conn, move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM agent_memories WHERE tenant_id = ?1 AND id = ?2",
                    params![tenant.to_string(), id.to_string()],
                )
                .map_err(db_err)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn share(&self, tenant: TenantId, from_agent: Uuid, to_agent: Uuid, ids: &[Uuid]) -> Result<Vec<AgentMemory>> {
        let ids = ids.to_vec();
        let copies = blocking(&self.conn, move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let now = Utc::now();
            let copies: Vec<AgentMemory> = live_rows(&tx, tenant, from_agent)?
                .iter()
                .filter(|m| ids.contains(&m.id))
                .map(|m| shared_copy(m, to_agent, now))
                .collect();
            for copy in &copies {
                insert_row(&tx, copy)?;
            }
            tx.commit().map_err(db_err)?;
            Ok(copies)
        })
        .await?;
        tracing::debug!(from = %from_agent, to = %to_agent, count = copies.len(), "Memories shared");
        Ok(copies)
    }

    async fn get_relevant(&self, tenant: TenantId, agent: Uuid, query: &MemoryQuery) -> Result<Vec<AgentMemory>> {
        let rows = blocking(&self.conn, move |conn| live_rows(conn, tenant, agent)).await?;
        Ok(rank_relevant(rows, query))
    }

    async fn get_recent(&self, tenant: TenantId, agent: Uuid, limit: usize) -> Result<Vec<AgentMemory>> {
        let rows = blocking(&self.conn, move |conn| live_rows(conn, tenant, agent)).await?;
        Ok(rank_recent(rows, limit))
    }

    async fn consolidate(&self, tenant: TenantId, agent: Uuid, min_access_count: u64) -> Result<usize> {
        let changed = blocking(&self.conn, move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let mut changed = 0;
            for mut m in live_rows(&tx, tenant, agent)? {
                if consolidates(&m, min_access_count) {
                    consolidate_one(&mut m);
                    save_row(&tx, &m)?;
                    changed += 1;
                }
            }
            tx.commit().map_err(db_err)?;
            Ok(changed)
        })
        .await?;
        tracing::debug!(agent_id = %agent, changed, "Memories consolidated");
        Ok(changed)
    }

    async fn sweep_expired(&self, tenant: TenantId) -> Result<usize> {
        blocking(&self.conn, move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let now = Utc::now();
            let expired: Vec<String> = load_rows(
                &tx,
                "SELECT data FROM agent_memories WHERE tenant_id = ?1",
                &[tenant.to_string()],
            )?
            .into_iter()
            .filter(|m| m.is_expired(now))
            .map(|m| m.id.to_string())
            .collect();
            for id in &expired {
                tx.execute("DELETE FROM agent_memories WHERE id = ?1", params![id])
                    .map_err(db_err)?;
            }
            tx.commit().map_err(db_err)?;
            Ok(expired.len())
        })
        .await
    }
}
