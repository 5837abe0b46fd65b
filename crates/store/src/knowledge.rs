//! Knowledge graph stores.
//!
//! Entities, relations and history live behind one lock so multi-step
//! writes such as merges are atomic. Similarity search embeds the query with
//! the injected embedder and ranks with a configurable metric (cosine by
//! default). The SQLite store loads every row at open and writes each
//! mutation through.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use orchestra_core::{
    embedding::SimilarityMetric,
    traits::{Embedder, KnowledgeGraph},
    types::*,
    Error, Result,
};

use crate::sqlite::{blocking, db_err, doc_col, open_connection};

/// Hard cap on nodes visited by `get_path`.
pub const MAX_PATH_VISITS: usize = 1000;

#[derive(Default)]
struct GraphState {
    entities: HashMap<Uuid, KnowledgeEntity>,
    relations: HashMap<Uuid, KnowledgeRelation>,
    history: Vec<EntityHistory>,
}

impl GraphState {
    fn entity(&self, tenant: TenantId, id: Uuid) -> Option<&KnowledgeEntity> {
        self.entities.get(&id).filter(|e| e.tenant_id == tenant)
    }

    fn next_version(&self, entity_id: Uuid) -> u32 {
        self.history
            .iter()
            .filter(|h| h.entity_id == entity_id)
            .map(|h| h.version)
            .max()
            .unwrap_or(0)
            + 1
    }

    fn push_history(&mut self, entity: &KnowledgeEntity, previous: Map<String, Value>, reason: Option<&str>) {
        let version = self.next_version(entity.id);
        self.history.push(EntityHistory {
            id: Uuid::new_v4(),
            tenant_id: entity.tenant_id,
            entity_id: entity.id,
            version,
            properties: previous,
            change_reason: reason.map(str::to_string),
            created_at: Utc::now(),
        });
    }

    /// Neighbours of `node` reachable in one hop, with the relation used.
    fn neighbours(
        &self,
        tenant: TenantId,
        node: Uuid,
        types: Option<&[String]>,
        direction: Direction,
    ) -> Vec<(Uuid, Uuid)> {
        self.relations
            .values()
            .filter(|r| r.tenant_id == tenant)
            .filter(|r| types.map(|t| t.contains(&r.relation_type)).unwrap_or(true))
            .filter_map(|r| {
                let forward = r.from_entity_id == node;
                let backward = r.to_entity_id == node;
                let next = match direction {
                    Direction::Both => r.other_end(node),
                    Direction::Outgoing if forward => Some(r.to_entity_id),
                    Direction::Outgoing if backward && r.bidirectional => Some(r.from_entity_id),
                    Direction::Incoming if backward => Some(r.from_entity_id),
                    Direction::Incoming if forward && r.bidirectional => Some(r.to_entity_id),
                    _ => None,
                }?;
                self.entity(tenant, next).map(|_| (next, r.id))
            })
            .collect()
    }
}

pub struct InMemoryKnowledgeGraph {
    state: RwLock<GraphState>,
    embedder: Arc<dyn Embedder>,
    metric: SimilarityMetric,
}

impl InMemoryKnowledgeGraph {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            state: RwLock::new(GraphState::default()),
            embedder,
            metric: SimilarityMetric::default(),
        }
    }

    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.metric = metric;
        self
    }

    fn from_rows(
        embedder: Arc<dyn Embedder>,
        entities: Vec<KnowledgeEntity>,
        relations: Vec<KnowledgeRelation>,
        history: Vec<EntityHistory>,
    ) -> Self {
        let state = GraphState {
            entities: entities.into_iter().map(|e| (e.id, e)).collect(),
            relations: relations.into_iter().map(|r| (r.id, r)).collect(),
            history,
        };
        Self {
            state: RwLock::new(state),
            embedder,
            metric: SimilarityMetric::default(),
        }
    }
}

fn matches_types(value: &str, types: Option<&[String]>) -> bool {
    types.map(|t| t.iter().any(|x| x == value)).unwrap_or(true)
}

#[async_trait]
impl KnowledgeGraph for InMemoryKnowledgeGraph {
    async fn create_entity(&self, tenant: TenantId, entity: NewEntity) -> Result<KnowledgeEntity> {
        if entity.name.trim().is_empty() || entity.entity_type.trim().is_empty() {
            return Err(Error::validation("entity requires a name and an entity_type"));
        }
        let embedding = self.embedder.embed(&entity.embedding_text()).await?;
        let now = Utc::now();
        let row = KnowledgeEntity {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            entity_type: entity.entity_type,
            category: entity.category,
            name: entity.name,
            aliases: entity.aliases,
            description: entity.description,
            properties: entity.properties,
            confidence: entity.confidence.clamp(0.0, 1.0),
            status: EntityStatus::Draft,
            source_agent_id: entity.source_agent_id,
            collection_task_id: entity.collection_task_id,
            embedding: Some(embedding),
            score: None,
            scored_at: None,
            scoring_rubric_id: None,
            created_at: now,
            updated_at: now,
        };
        tracing::debug!(
            entity_id = %row.id,
            tenant_id = %tenant,
            entity_type = %row.entity_type,
            "Entity created"
        );
        self.state.write().await.entities.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_entities(&self, tenant: TenantId, query: &EntityQuery) -> Result<Vec<ScoredEntity>> {
        let query_vec = self.embedder.embed(&query.query).await?;
        let state = self.state.read().await;
        let mut scored: Vec<ScoredEntity> = state
            .entities
            .values()
            .filter(|e| e.tenant_id == tenant)
            .filter(|e| matches_types(&e.entity_type, query.types.as_deref()))
            .filter(|e| e.confidence >= query.min_confidence)
            .map(|e| ScoredEntity {
                similarity: e
                    .embedding
                    .as_deref()
                    .map(|v| self.metric.score(&query_vec, v))
                    .unwrap_or(f32::NEG_INFINITY),
                entity: e.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.entity
                        .confidence
                        .partial_cmp(&a.entity.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
        scored.truncate(query.limit);
        Ok(scored)
    }

    async fn get_entity(&self, tenant: TenantId, id: Uuid, include_relations: bool) -> Result<Option<EntityWithRelations>> {
        let state = self.state.read().await;
        let Some(entity) = state.entity(tenant, id) else {
            return Ok(None);
        };
        let relations = if include_relations {
            let mut rels: Vec<KnowledgeRelation> = state
                .relations
                .values()
                .filter(|r| r.tenant_id == tenant && r.touches(id))
                .cloned()
                .collect();
            rels.sort_by_key(|r| r.created_at);
            rels
        } else {
            Vec::new()
        };
        Ok(Some(EntityWithRelations {
            entity: entity.clone(),
            relations,
        }))
    }

    async fn list_entities(
        &self,
        tenant: TenantId,
        types: Option<&[String]>,
        status: Option<EntityStatus>,
    ) -> Result<Vec<KnowledgeEntity>> {
        let state = self.state.read().await;
        let mut entities: Vec<KnowledgeEntity> = state
            .entities
            .values()
            .filter(|e| e.tenant_id == tenant)
            .filter(|e| matches_types(&e.entity_type, types))
            .filter(|e| status.map(|s| e.status == s).unwrap_or(true))
            .cloned()
            .collect();
        entities.sort_by_key(|e| e.created_at);
        Ok(entities)
    }

    async fn update_entity(
        &self,
        tenant: TenantId,
        id: Uuid,
        update: EntityUpdate,
        reason: Option<&str>,
    ) -> Result<Option<KnowledgeEntity>> {
        let reembed_text = {
            let state = self.state.read().await;
            let Some(current) = state.entity(tenant, id) else {
                return Ok(None);
            };
            if update.name.is_some() || update.description.is_some() {
                let name = update.name.as_deref().unwrap_or(&current.name);
                let description = update
                    .description
                    .as_deref()
                    .or(current.description.as_deref())
                    .unwrap_or("");
                Some(format!("{} {}", name, description))
            } else {
                None
            }
        };
        let embedding = match reembed_text {
            Some(text) => Some(self.embedder.embed(&text).await?),
            None => None,
        };

        let mut state = self.state.write().await;
        let Some(entity) = state.entities.get_mut(&id).filter(|e| e.tenant_id == tenant) else {
            return Ok(None);
        };
        let previous = entity.properties.clone();
        if let Some(name) = update.name {
            entity.name = name;
        }
        if let Some(description) = update.description {
            entity.description = Some(description);
        }
        if let Some(category) = update.category {
            entity.category = Some(category);
        }
        if let Some(status) = update.status {
            entity.status = status;
        }
        if let Some(confidence) = update.confidence {
            entity.confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(aliases) = update.aliases {
            entity.aliases = aliases;
        }
        if embedding.is_some() {
            entity.embedding = embedding;
        }
        for (k, v) in update.properties {
            entity.properties.insert(k, v);
        }
        entity.updated_at = Utc::now();
        let updated = entity.clone();
        state.push_history(&updated, previous, reason);
        Ok(Some(updated))
    }

    async fn delete_entity(&self, tenant: TenantId, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.entity(tenant, id).is_none() {
            return Ok(false);
        }
        state.entities.remove(&id);
        state.relations.retain(|_, r| !r.touches(id));
        state.history.retain(|h| h.entity_id != id);
        tracing::debug!(entity_id = %id, "Entity deleted with its relations");
        Ok(true)
    }

    async fn merge_entities(
        &self,
        tenant: TenantId,
        primary: Uuid,
        duplicates: &[Uuid],
        reason: &str,
    ) -> Result<KnowledgeEntity> {
        let mut state = self.state.write().await;

        // Validate everything before touching any row.
        if state.entity(tenant, primary).is_none() {
            return Err(Error::integrity(format!("primary entity {} not found", primary)));
        }
        let mut dupes: Vec<Uuid> = Vec::new();
        for id in duplicates {
            if *id == primary {
                return Err(Error::integrity("an entity cannot be merged into itself"));
            }
            if state.entity(tenant, *id).is_none() {
                return Err(Error::integrity(format!("duplicate entity {} not found", id)));
            }
            if !dupes.contains(id) {
                dupes.push(*id);
            }
        }

        let dupe_set: HashSet<Uuid> = dupes.iter().copied().collect();
        let mut dropped_loops = 0usize;
        state.relations.retain(|_, r| {
            if dupe_set.contains(&r.from_entity_id) {
                r.from_entity_id = primary;
            }
            if dupe_set.contains(&r.to_entity_id) {
                r.to_entity_id = primary;
            }
            let keep = r.from_entity_id != r.to_entity_id;
            if !keep {
                dropped_loops += 1;
            }
            keep
        });

        let mut extra_aliases = Vec::new();
        let mut extra_properties = Map::new();
        for id in &dupes {
            if let Some(dup) = state.entities.remove(id) {
                extra_aliases.push(dup.name);
                extra_aliases.extend(dup.aliases);
                for (k, v) in dup.properties {
                    extra_properties.entry(k).or_insert(v);
                }
            }
        }
        state.history.retain(|h| !dupe_set.contains(&h.entity_id));

        let Some(entity) = state.entities.get_mut(&primary) else {
            return Err(Error::integrity(format!("primary entity {} vanished", primary)));
        };
        let previous = entity.properties.clone();
        for alias in extra_aliases {
            let lower = alias.to_lowercase();
            if lower != entity.name.to_lowercase()
                && !entity.aliases.iter().any(|a| a.to_lowercase() == lower)
            {
                entity.aliases.push(alias);
            }
        }
        for (k, v) in extra_properties {
            entity.properties.entry(k).or_insert(v);
        }
        entity.updated_at = Utc::now();
        let merged = entity.clone();
        state.push_history(&merged, previous, Some(reason));

        tracing::info!(
            primary = %primary,
            merged = dupes.len(),
            dropped_self_loops = dropped_loops,
            reason,
            "Entities merged"
        );
        Ok(merged)
    }

    async fn create_relation(&self, tenant: TenantId, relation: NewRelation) -> Result<KnowledgeRelation> {
        let mut state = self.state.write().await;
        if state.entity(tenant, relation.from_entity_id).is_none()
            || state.entity(tenant, relation.to_entity_id).is_none()
        {
            return Err(Error::integrity(
                "relation endpoints must both exist in the tenant",
            ));
        }
        let row = KnowledgeRelation {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            from_entity_id: relation.from_entity_id,
            to_entity_id: relation.to_entity_id,
            relation_type: relation.relation_type,
            strength: relation.strength.clamp(0.0, 1.0),
            evidence: relation.evidence,
            bidirectional: relation.bidirectional,
            created_at: Utc::now(),
        };
        state.relations.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_relations(&self, tenant: TenantId, filter: &RelationFilter) -> Result<Vec<KnowledgeRelation>> {
        let state = self.state.read().await;
        let mut rels: Vec<KnowledgeRelation> = state
            .relations
            .values()
            .filter(|r| r.tenant_id == tenant)
            .filter(|r| r.strength >= filter.min_strength)
            .filter(|r| matches_types(&r.relation_type, filter.types.as_deref()))
            .filter(|r| match filter.entity_id {
                None => true,
                Some(id) => match filter.direction {
                    Direction::Both => r.touches(id),
                    Direction::Outgoing => {
                        r.from_entity_id == id || (r.bidirectional && r.to_entity_id == id)
                    }
                    Direction::Incoming => {
                        r.to_entity_id == id || (r.bidirectional && r.from_entity_id == id)
                    }
                },
            })
            .cloned()
            .collect();
        rels.sort_by_key(|r| r.created_at);
        Ok(rels)
    }

    async fn get_path(&self, tenant: TenantId, src: Uuid, dst: Uuid, query: &PathQuery) -> Result<Vec<KnowledgeRelation>> {
        if src == dst {
            return Ok(Vec::new());
        }
        let state = self.state.read().await;
        if state.entity(tenant, src).is_none() || state.entity(tenant, dst).is_none() {
            return Ok(Vec::new());
        }

        let types = query.relation_types.as_deref();
        let mut parent: HashMap<Uuid, (Uuid, Uuid)> = HashMap::new();
        let mut visited: HashSet<Uuid> = HashSet::from([src]);
        let mut queue: VecDeque<(Uuid, usize)> = VecDeque::from([(src, 0)]);

        while let Some((node, depth)) = queue.pop_front() {
            if node == dst {
                let mut path = Vec::with_capacity(depth);
                let mut cursor = dst;
                while let Some((prev, rel_id)) = parent.get(&cursor) {
                    if let Some(rel) = state.relations.get(rel_id) {
                        path.push(rel.clone());
                    }
                    cursor = *prev;
                }
                path.reverse();
                return Ok(path);
            }
            if depth >= query.max_depth {
                continue;
            }
            for (next, rel_id) in state.neighbours(tenant, node, types, query.direction) {
                if visited.insert(next) {
                    if visited.len() > MAX_PATH_VISITS {
                        tracing::warn!(src = %src, dst = %dst, "Path search exceeded visit cap");
                        return Ok(Vec::new());
                    }
                    parent.insert(next, (node, rel_id));
                    queue.push_back((next, depth + 1));
                }
            }
        }
        Ok(Vec::new())
    }

    async fn get_neighborhood(&self, tenant: TenantId, id: Uuid, query: &NeighborhoodQuery) -> Result<Neighborhood> {
        let state = self.state.read().await;
        if state.entity(tenant, id).is_none() {
            return Ok(Neighborhood::default());
        }
        let rel_types = query.relation_types.as_deref();
        let entity_types = query.entity_types.as_deref();

        let mut visited: HashSet<Uuid> = HashSet::from([id]);
        let mut seen_relations: HashSet<Uuid> = HashSet::new();
        let mut result = Neighborhood::default();
        let mut frontier = vec![id];

        for _ in 0..query.depth {
            let mut next_frontier = Vec::new();
            for node in frontier {
                for (next, rel_id) in state.neighbours(tenant, node, rel_types, Direction::Both) {
                    let Some(entity) = state.entity(tenant, next) else {
                        continue;
                    };
                    if !matches_types(&entity.entity_type, entity_types) {
                        continue;
                    }
                    if seen_relations.insert(rel_id) {
                        if let Some(rel) = state.relations.get(&rel_id) {
                            result.relations.push(rel.clone());
                        }
                    }
                    if visited.insert(next) {
                        result.entities.push(entity.clone());
                        next_frontier.push(next);
                    }
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        Ok(result)
    }

    async fn get_entity_timeline(&self, tenant: TenantId, id: Uuid) -> Result<Vec<EntityHistory>> {
        let state = self.state.read().await;
        let mut rows: Vec<EntityHistory> = state
            .history
            .iter()
            .filter(|h| h.tenant_id == tenant && h.entity_id == id)
            .cloned()
            .collect();
        rows.sort_by_key(|h| h.version);
        Ok(rows)
    }

    async fn record_score(
        &self,
        tenant: TenantId,
        id: Uuid,
        score: u8,
        rubric_id: &str,
        breakdown: Map<String, Value>,
    ) -> Result<Option<KnowledgeEntity>> {
        let mut state = self.state.write().await;
        let Some(entity) = state.entities.get_mut(&id).filter(|e| e.tenant_id == tenant) else {
            return Ok(None);
        };
        let now = Utc::now();
        entity.score = Some(score.min(100));
        entity.scored_at = Some(now);
        entity.scoring_rubric_id = Some(rubric_id.to_string());
        entity
            .properties
            .insert("score_breakdown".to_string(), Value::Object(breakdown));
        entity.updated_at = now;
        Ok(Some(entity.clone()))
    }

    async fn count_created_since(&self, tenant: TenantId, since: DateTime<Utc>) -> Result<usize> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .values()
            .filter(|e| e.tenant_id == tenant && e.created_at >= since)
            .count())
    }

    async fn existing_keys(&self, tenant: TenantId) -> Result<HashSet<(String, String)>> {
        let state = self.state.read().await;
        Ok(state
            .entities
            .values()
            .filter(|e| e.tenant_id == tenant)
            .map(KnowledgeEntity::dedup_key)
            .collect())
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite-backed knowledge graph.
///
/// Reads are served from the in-memory graph. Mutations are serialized by
/// `writes` so each one persists the rows it touched before the next starts.
pub struct SqliteKnowledgeGraph {
    graph: InMemoryKnowledgeGraph,
    conn: Arc<Mutex<Connection>>,
    writes: Mutex<()>,
}

impl SqliteKnowledgeGraph {
    /// Open (or create) the graph tables at `path` and load every row.
    pub fn open(path: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS knowledge_entities (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                data TEXT NOT NULL -- JSON
            );
            CREATE TABLE IF NOT EXISTS knowledge_relations (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                from_entity_id TEXT NOT NULL,
                to_entity_id TEXT NOT NULL,
                data TEXT NOT NULL -- JSON
            );
            CREATE TABLE IF NOT EXISTS entity_history (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                data TEXT NOT NULL -- JSON
            );
            CREATE INDEX IF NOT EXISTS idx_relations_from ON knowledge_relations (from_entity_id);
            CREATE INDEX IF NOT EXISTS idx_relations_to ON knowledge_relations (to_entity_id);
            CREATE INDEX IF NOT EXISTS idx_history_entity ON entity_history (entity_id);",
        )
        .map_err(db_err)?;

        let entities = load_docs::<KnowledgeEntity>(&conn, "SELECT data FROM knowledge_entities")?;
        let relations = load_docs::<KnowledgeRelation>(&conn, "SELECT data FROM knowledge_relations")?;
        let history = load_docs::<EntityHistory>(&conn, "SELECT data FROM entity_history")?;
        tracing::info!(
            entities = entities.len(),
            relations = relations.len(),
            "Knowledge graph loaded from SQLite"
        );

        Ok(Self {
            graph: InMemoryKnowledgeGraph::from_rows(embedder, entities, relations, history),
            conn: Arc::new(Mutex::new(conn)),
            writes: Mutex::new(()),
        })
    }

    pub fn with_metric(mut self, metric: SimilarityMetric) -> Self {
        self.graph = self.graph.with_metric(metric);
        self
    }

    async fn latest_history(&self, tenant: TenantId, id: Uuid) -> Result<Option<EntityHistory>> {
        Ok(self.graph.get_entity_timeline(tenant, id).await?.pop())
    }
}

fn load_docs<T: serde::de::DeserializeOwned>(conn: &Connection, sql: &str) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    let rows = stmt.query_map([], |row| doc_col::<T>(row, 0)).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

fn save_entity(conn: &Connection, e: &KnowledgeEntity) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO knowledge_entities (id, tenant_id, data) VALUES (?1, ?2, ?3)",
        params![e.id.to_string(), e.tenant_id.to_string(), serde_json::to_string(e)?],
    )
    .map_err(db_err)?;
    Ok(())
}

fn save_relation(conn: &Connection, r: &KnowledgeRelation) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO knowledge_relations (id, tenant_id, from_entity_id, to_entity_id, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            r.id.to_string(),
            r.tenant_id.to_string(),
            r.from_entity_id.to_string(),
            r.to_entity_id.to_string(),
            serde_json::to_string(r)?,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

fn save_history(conn: &Connection, h: &EntityHistory) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO entity_history (id, tenant_id, entity_id, data) VALUES (?1, ?2, ?3, ?4)",
        params![
            h.id.to_string(),
            h.tenant_id.to_string(),
            h.entity_id.to_string(),
            serde_json::to_string(h)?,
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Drop an entity row along with its relations and history.
fn remove_entity(conn: &Connection, id: Uuid) -> Result<()> {
    let id = id.to_string();
    conn.execute("DELETE FROM knowledge_entities WHERE id = ?1", params![id])
        .map_err(db_err)?;
    conn.execute(
        "DELETE FROM knowledge_relations WHERE from_entity_id = ?1 OR to_entity_id = ?1",
        params![id],
    )
    .map_err(db_err)?;
    conn.execute("DELETE FROM entity_history WHERE entity_id = ?1", params![id])
        .map_err(db_err)?;
    Ok(())
}

#[async_trait]
impl KnowledgeGraph for SqliteKnowledgeGraph {
    async fn create_entity(&self, tenant: TenantId, entity: NewEntity) -> Result<KnowledgeEntity> {
        let _write = self.writes.lock().await;
        let row = self.graph.create_entity(tenant, entity).await?;
        let saved = row.clone();
        blocking(&self.conn, move |conn| save_entity(conn, &saved)).await?;
        Ok(row)
    }

    async fn find_entities(&self, tenant: TenantId, query: &EntityQuery) -> Result<Vec<ScoredEntity>> {
        self.graph.find_entities(tenant, query).await
    }

    async fn get_entity(&self, tenant: TenantId, id: Uuid, include_relations: bool) -> Result<Option<EntityWithRelations>> {
        self.graph.get_entity(tenant, id, include_relations).await
    }

    async fn list_entities(
        &self,
        tenant: TenantId,
        types: Option<&[String]>,
        status: Option<EntityStatus>,
    ) -> Result<Vec<KnowledgeEntity>> {
        self.graph.list_entities(tenant, types, status).await
    }

    async fn update_entity(
        &self,
        tenant: TenantId,
        id: Uuid,
        update: EntityUpdate,
        reason: Option<&str>,
    ) -> Result<Option<KnowledgeEntity>> {
        let _write = self.writes.lock().await;
        let Some(updated) = self.graph.update_entity(tenant, id, update, reason).await? else {
            return Ok(None);
        };
        let history = self.latest_history(tenant, id).await?;
        let saved = updated.clone();
        blocking(&self.conn, move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            save_entity(&tx, &saved)?;
            if let Some(h) = &history {
                save_history(&tx, h)?;
            }
            tx.commit().map_err(db_err)
        })
        .await?;
        Ok(Some(updated))
    }

    async fn delete_entity(&self, tenant: TenantId, id: Uuid) -> Result<bool> {
        let _write = self.writes.lock().await;
        if !self.graph.delete_entity(tenant, id).await? {
            return Ok(false);
        }
        blocking(&self.conn, move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            remove_entity(&tx, id)?;
            tx.commit().map_err(db_err)
        })
        .await?;
        Ok(true)
    }

    async fn merge_entities(
        &self,
        tenant: TenantId,
        primary: Uuid,
        duplicates: &[Uuid],
        reason: &str,
    ) -> Result<KnowledgeEntity> {
        let _write = self.writes.lock().await;
        let merged = self.graph.merge_entities(tenant, primary, duplicates, reason).await?;
        let relations = self
            .graph
            .find_relations(
                tenant,
                &RelationFilter {
                    entity_id: Some(primary),
                    ..Default::default()
                },
            )
            .await?;
        let history = self.latest_history(tenant, primary).await?;
        let duplicates = duplicates.to_vec();
        let saved = merged.clone();
        blocking(&self.conn, move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            for id in &duplicates {
                remove_entity(&tx, *id)?;
            }
            for r in &relations {
                save_relation(&tx, r)?;
            }
            save_entity(&tx, &saved)?;
            if let Some(h) = &history {
                save_history(&tx, h)?;
            }
            tx.commit().map_err(db_err)
        })
        .await?;
        Ok(merged)
    }

    async fn create_relation(&self, tenant: TenantId, relation: NewRelation) -> Result<KnowledgeRelation> {
        let _write = self.writes.lock().await;
        let row = self.graph.create_relation(tenant, relation).await?;
        let saved = row.clone();
        blocking(&self.conn, move |conn| save_relation(conn, &saved)).await?;
        Ok(row)
    }

    async fn find_relations(&self, tenant: TenantId, filter: &RelationFilter) -> Result<Vec<KnowledgeRelation>> {
        self.graph.find_relations(tenant, filter).await
    }

    async fn get_path(&self, tenant: TenantId, src: Uuid, dst: Uuid, query: &PathQuery) -> Result<Vec<KnowledgeRelation>> {
        self.graph.get_path(tenant, src, dst, query).await
    }

    async fn get_neighborhood(&self, tenant: TenantId, id: Uuid, query: &NeighborhoodQuery) -> Result<Neighborhood> {
        self.graph.get_neighborhood(tenant, id, query).await
    }

    async fn get_entity_timeline(&self, tenant: TenantId, id: Uuid) -> Result<Vec<EntityHistory>> {
        self.graph.get_entity_timeline(tenant, id).await
    }

    async fn record_score(
        &self,
        tenant: TenantId,
        id: Uuid,
        score: u8,
        rubric_id: &str,
        breakdown: Map<String, Value>,
    ) -> Result<Option<KnowledgeEntity>> {
        let _write = self.writes.lock().await;
        let Some(scored) = self.graph.record_score(tenant, id, score, rubric_id, breakdown).await? else {
            return Ok(None);
        };
        let saved = scored.clone();
        blocking(&self.conn, move |conn| save_entity(conn, &saved)).await?;
        Ok(Some(scored))
    }

    async fn count_created_since(&self, tenant: TenantId, since: DateTime<Utc>) -> Result<usize> {
        self.graph.count_created_since(tenant, since).await
    }

    async fn existing_keys(&self, tenant: TenantId) -> Result<HashSet<(String, String)>> {
        self.graph.existing_keys(tenant).await
    }
}
