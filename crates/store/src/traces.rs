//! Execution trace stores.
//!
//! Both implementations assign `step_order = max(existing) + 1` under a
//! single lock so concurrent appends for one task never share an order.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use orchestra_core::{
    traits::TraceStore,
    types::{ExecutionTrace, NewTrace, StepType, TenantId},
    Error, Result,
};

use crate::sqlite::{db_err, join_err, json_col, open_connection, opt_uuid_col, ts_col, uuid_col};

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
pub struct InMemoryTraceStore {
    rows: Mutex<HashMap<Uuid, Vec<ExecutionTrace>>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn append(&self, tenant: TenantId, trace: NewTrace) -> Result<ExecutionTrace> {
        let mut rows = self.rows.lock().await;
        let task_rows = rows.entry(trace.task_id).or_default();
        if task_rows.iter().any(|r| r.tenant_id != tenant) {
            return Err(Error::integrity(format!(
                "task {} already traced under another tenant",
                trace.task_id
            )));
        }
        let step_order = task_rows.iter().map(|r| r.step_order).max().unwrap_or(0) + 1;
        let row = ExecutionTrace {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            task_id: trace.task_id,
            step_type: trace.step_type,
            step_order,
            agent_id: trace.agent_id,
            details: trace.details,
            duration_ms: trace.duration_ms,
            created_at: Utc::now(),
        };
        task_rows.push(row.clone());
        Ok(row)
    }

    async fn list(&self, tenant: TenantId, task: Uuid) -> Result<Vec<ExecutionTrace>> {
        let rows = self.rows.lock().await;
        let mut out: Vec<ExecutionTrace> = rows
            .get(&task)
            .map(|r| r.iter().filter(|t| t.tenant_id == tenant).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|t| t.step_order);
        Ok(out)
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite-backed trace store.
pub struct SqliteTraceStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTraceStore {
    /// Open (or create) the trace table at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS execution_traces (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                step_type TEXT NOT NULL,
                step_order INTEGER NOT NULL,
                agent_id TEXT,
                details TEXT NOT NULL, -- JSON
                duration_ms INTEGER,
                created_at TEXT NOT NULL,
                UNIQUE (task_id, step_order)
            );
            CREATE INDEX IF NOT EXISTS idx_traces_tenant_task ON execution_traces (tenant_id, task_id);",
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn row_to_trace(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionTrace> {
    let step: String = row.get(3)?;
    let step_type = StepType::parse(&step).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown step type {}", step).into(),
        )
    })?;
    let duration: Option<i64> = row.get(7)?;
    let step_order: i64 = row.get(4)?;
    Ok(ExecutionTrace {
        id: uuid_col(row, 0)?,
        tenant_id: uuid_col(row, 1)?,
        task_id: uuid_col(row, 2)?,
        step_type,
        step_order: step_order as u32,
        agent_id: opt_uuid_col(row, 5)?,
        details: json_col(row, 6)?,
        duration_ms: duration.map(|d| d as u64),
        created_at: ts_col(row, 8)?,
    })
}

#[async_trait]
impl TraceStore for SqliteTraceStore {
    async fn append(&self, tenant: TenantId, trace: NewTrace) -> Result<ExecutionTrace> {
        let conn = self.conn.clone();
        let details_json = serde_json::to_string(&trace.details)?;

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction().map_err(db_err)?;

            let foreign: Option<String> = tx
                .query_row(
                    "SELECT tenant_id FROM execution_traces WHERE task_id = ?1 AND tenant_id != ?2 LIMIT 1",
                    params![trace.task_id.to_string(), tenant.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            if foreign.is_some() {
                return Err(Error::integrity(format!(
                    "task {} already traced under another tenant",
                    trace.task_id
                )));
            }

            let max: i64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(step_order), 0) FROM execution_traces WHERE task_id = ?1",
                    params![trace.task_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(db_err)?;

            let row = ExecutionTrace {
                id: Uuid::new_v4(),
                tenant_id: tenant,
                task_id: trace.task_id,
                step_type: trace.step_type,
                step_order: (max + 1) as u32,
                agent_id: trace.agent_id,
                details: trace.details,
                duration_ms: trace.duration_ms,
                created_at: Utc::now(),
            };
            tx.execute(
                "INSERT INTO execution_traces
                    (id, tenant_id, task_id, step_type, step_order, agent_id, details, duration_ms, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    row.id.to_string(),
                    row.tenant_id.to_string(),
                    row.task_id.to_string(),
                    row.step_type.as_str(),
                    row.step_order as i64,
                    row.agent_id.map(|a| a.to_string()),
                    details_json,
                    row.duration_ms.map(|d| d as i64),
                    row.created_at.to_rfc3339(),
                ],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(row)
        })
        .await
        .map_err(join_err)?
    }

    async fn list(&self, tenant: TenantId, task: Uuid) -> Result<Vec<ExecutionTrace>> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn
                .prepare(
                    "SELECT id, tenant_id, task_id, step_type, step_order, agent_id, details, duration_ms, created_at
                     FROM execution_traces WHERE tenant_id = ?1 AND task_id = ?2 ORDER BY step_order",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![tenant.to_string(), task.to_string()], row_to_trace)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
        .await
        .map_err(join_err)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn assert_monotonic(store: &dyn TraceStore) {
        let tenant = Uuid::new_v4();
        let task = Uuid::new_v4();
        for step in [StepType::Dispatched, StepType::MemoryRecall, StepType::Executing] {
            store
                .append(tenant, NewTrace::new(task, step).with_details(json!({"k": 1})))
                .await
                .unwrap();
        }
        let rows = store.list(tenant, task).await.unwrap();
        let orders: Vec<u32> = rows.iter().map(|r| r.step_order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(rows[1].step_type, StepType::MemoryRecall);
        assert_eq!(rows[0].details, json!({"k": 1}));

        assert!(store.list(Uuid::new_v4(), task).await.unwrap().is_empty());
        assert!(store
            .append(Uuid::new_v4(), NewTrace::new(task, StepType::Failed))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_in_memory_step_order() {
        assert_monotonic(&InMemoryTraceStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_step_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.db");
        let store = SqliteTraceStore::open(path.to_str().unwrap()).unwrap();
        assert_monotonic(&store).await;
    }

    #[tokio::test]
    async fn test_concurrent_appends_never_collide() {
        let store = Arc::new(InMemoryTraceStore::new());
        let tenant = Uuid::new_v4();
        let task = Uuid::new_v4();
        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append(tenant, NewTrace::new(task, StepType::SkillCall))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap();
        }
        let orders: Vec<u32> = store
            .list(tenant, task)
            .await
            .unwrap()
            .iter()
            .map(|r| r.step_order)
            .collect();
        assert_eq!(orders, (1..=20).collect::<Vec<u32>>());
    }
}
