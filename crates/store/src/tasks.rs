//! Task stores.
//!
//! `update_unless_failed` checks and writes under one lock (a DashMap entry
//! guard, or a single conditional `UPDATE`).

use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use orchestra_core::{
    traits::TaskStore,
    types::{Task, TaskStatus, TenantId},
    Error, Result,
};

use crate::sqlite::{db_err, doc_col, join_err, open_connection};

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<Uuid, Task>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: Task) -> Result<Task> {
        tracing::trace!(task_id = %task.id, tenant_id = %task.tenant_id, "Task created");
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get(&self, tenant: TenantId, id: Uuid) -> Result<Option<Task>> {
        Ok(self
            .tasks
            .get(&id)
            .filter(|t| t.tenant_id == tenant)
            .map(|t| t.clone()))
    }

    async fn update(&self, task: &Task) -> Result<()> {
        match self.tasks.get_mut(&task.id) {
            Some(mut existing) if existing.tenant_id == task.tenant_id => {
                *existing = task.clone();
                Ok(())
            }
            _ => Err(Error::not_found(format!("task {}", task.id))),
        }
    }

    async fn update_unless_failed(&self, task: &Task) -> Result<bool> {
        match self.tasks.get_mut(&task.id) {
            Some(mut existing) if existing.tenant_id == task.tenant_id => {
                if existing.status == TaskStatus::Failed {
                    return Ok(false);
                }
                *existing = task.clone();
                Ok(true)
            }
            _ => Err(Error::not_found(format!("task {}", task.id))),
        }
    }

    async fn list(&self, tenant: TenantId, statuses: Option<&[TaskStatus]>) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.tenant_id == tenant)
            .filter(|t| statuses.map(|s| s.contains(&t.status)).unwrap_or(true))
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn children(&self, tenant: TenantId, parent: Uuid) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| t.tenant_id == tenant && t.parent_task_id == Some(parent))
            .map(|t| t.clone())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite-backed task store. The full row is kept as a JSON document next
/// to the columns the queries filter on.
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                parent_task_id TEXT,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL -- JSON
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_tenant_status ON tasks (tenant_id, status);
            CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks (tenant_id, parent_task_id);",
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn query(&self, sql: &'static str, args: Vec<String>) -> Result<Vec<Task>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(sql).map_err(db_err)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), |row| doc_col::<Task>(row, 0))
                .map_err(db_err)?;
            let mut tasks = rows.collect::<rusqlite::Result<Vec<Task>>>().map_err(db_err)?;
            tasks.sort_by_key(|t| t.created_at);
            Ok(tasks)
        })
        .await
        .map_err(join_err)?
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task: Task) -> Result<Task> {
        let conn = self.conn.clone();
        let data = serde_json::to_string(&task)?;
        let row = task.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO tasks (id, tenant_id, parent_task_id, status, created_at, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.id.to_string(),
                    row.tenant_id.to_string(),
                    row.parent_task_id.map(|p| p.to_string()),
                    row.status.as_str(),
                    row.created_at.to_rfc3339(),
                    data,
                ],
            )
            .map_err(db_err)
        })
        .await
        .map_err(join_err)??;

        tracing::trace!(task_id = %task.id, tenant_id = %task.tenant_id, "Task created");
        Ok(task)
    }

    async fn get(&self, tenant: TenantId, id: Uuid) -> Result<Option<Task>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                "SELECT data FROM tasks WHERE tenant_id = ?1 AND id = ?2",
                params![tenant.to_string(), id.to_string()],
                |row| doc_col::<Task>(row, 0),
            )
            .optional()
            .map_err(db_err)
        })
        .await
        .map_err(join_err)?
    }

    async fn update(&self, task: &Task) -> Result<()> {
        let conn = self.conn.clone();
        let data = serde_json::to_string(task)?;
        let (id, tenant, status) = (task.id, task.tenant_id, task.status);

        let changed = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "UPDATE tasks SET status = ?1, data = ?2 WHERE id = ?3 AND tenant_id = ?4",
                params![status.as_str(), data, id.to_string(), tenant.to_string()],
            )
            .map_err(db_err)
        })
        .await
        .map_err(join_err)??;

        if changed == 0 {
            return Err(Error::not_found(format!("task {}", id)));
        }
        Ok(())
    }

    async fn update_unless_failed(&self, task: &Task) -> Result<bool> {
        let conn = self.conn.clone();
        let data = serde_json::to_string(task)?;
        let (id, tenant, status) = (task.id, task.tenant_id, task.status);

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let changed = conn
                .execute(
                    "UPDATE tasks SET status = ?1, data = ?2
                     WHERE id = ?3 AND tenant_id = ?4 AND status != ?5",
                    params![
                        status.as_str(),
                        data,
                        id.to_string(),
                        tenant.to_string(),
                        TaskStatus::Failed.as_str(),
                    ],
                )
                .map_err(db_err)?;
            if changed > 0 {
                return Ok(true);
            }
            let exists: Option<String> = conn
                .query_row(
                    "SELECT status FROM tasks WHERE id = ?1 AND tenant_id = ?2",
                    params![id.to_string(), tenant.to_string()],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            match exists {
                Some(_) => Ok(false),
                None => Err(Error::not_found(format!("task {}", id))),
            }
        })
        .await
        .map_err(join_err)?
    }

    async fn list(&self, tenant: TenantId, statuses: Option<&[TaskStatus]>) -> Result<Vec<Task>> {
        let tasks = self
            .query(
                "SELECT data FROM tasks WHERE tenant_id = ?1",
                vec![tenant.to_string()],
            )
            .await?;
        Ok(match statuses {
            Some(wanted) => tasks.into_iter().filter(|t| wanted.contains(&t.status)).collect(),
            None => tasks,
        })
    }

    async fn children(&self, tenant: TenantId, parent: Uuid) -> Result<Vec<Task>> {
        self.query(
            "SELECT data FROM tasks WHERE tenant_id = ?1 AND parent_task_id = ?2",
            vec![tenant.to_string(), parent.to_string()],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_requires_same_tenant() {
        let store = InMemoryTaskStore::new();
        let tenant = Uuid::new_v4();
        let mut task = store
            .create(Task::new(tenant, "chat", "hello"))
            .await
            .unwrap();

        task.status = TaskStatus::Executing;
        store.update(&task).await.unwrap();
        let loaded = store.get(tenant, task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Executing);

        let mut forged = task.clone();
        forged.tenant_id = Uuid::new_v4();
        assert!(store.update(&forged).await.is_err());
        assert!(store.get(forged.tenant_id, task.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_update_keeps_failed_row() {
        let store = InMemoryTaskStore::new();
        let tenant = Uuid::new_v4();
        let task = store.create(Task::new(tenant, "chat", "hello")).await.unwrap();

        let mut failed = task.clone();
        failed.error = Some("cancelled".into());
        failed.finish(TaskStatus::Failed);
        store.update(&failed).await.unwrap();

        let mut stale = task.clone();
        stale.status = TaskStatus::Executing;
        assert!(!store.update_unless_failed(&stale).await.unwrap());
        let loaded = store.get(tenant, task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("cancelled"));

        let other = store.create(Task::new(tenant, "chat", "again")).await.unwrap();
        let mut running = other.clone();
        running.status = TaskStatus::Thinking;
        assert!(store.update_unless_failed(&running).await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_rows_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.db");
        let path = path.to_str().unwrap();
        let tenant = Uuid::new_v4();

        let (parent, child) = {
            let store = SqliteTaskStore::open(path).unwrap();
            let parent = store.create(Task::new(tenant, "chat", "p")).await.unwrap();
            let mut child = store
                .create(Task::new(tenant, "research", "c").with_parent(parent.id))
                .await
                .unwrap();
            child.output = Some("found it".into());
            child.finish(TaskStatus::Completed);
            store.update(&child).await.unwrap();
            (parent, child)
        };

        let store = SqliteTaskStore::open(path).unwrap();
        let loaded = store.get(tenant, child.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.output.as_deref(), Some("found it"));
        assert!(store.get(Uuid::new_v4(), child.id).await.unwrap().is_none());

        let kids = store.children(tenant, parent.id).await.unwrap();
        assert_eq!(kids.len(), 1);
        let done = store
            .list(tenant, Some(&[TaskStatus::Completed]))
            .await
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(store.list(tenant, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_conditional_update_keeps_failed_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTaskStore::open(dir.path().join("tasks.db").to_str().unwrap()).unwrap();
        let tenant = Uuid::new_v4();
        let task = store.create(Task::new(tenant, "chat", "hello")).await.unwrap();

        let mut running = task.clone();
        running.status = TaskStatus::Executing;
        assert!(store.update_unless_failed(&running).await.unwrap());

        let mut failed = task.clone();
        failed.finish(TaskStatus::Failed);
        store.update(&failed).await.unwrap();
        assert!(!store.update_unless_failed(&running).await.unwrap());
        assert_eq!(
            store.get(tenant, task.id).await.unwrap().unwrap().status,
            TaskStatus::Failed
        );

        let mut forged = running.clone();
        forged.tenant_id = Uuid::new_v4();
        assert!(store.update_unless_failed(&forged).await.is_err());
    }

    #[tokio::test]
    async fn test_list_by_status_and_children() {
        let store = InMemoryTaskStore::new();
        let tenant = Uuid::new_v4();
        let parent = store.create(Task::new(tenant, "chat", "p")).await.unwrap();
        store
            .create(
                Task::new(tenant, "research", "c")
                    .with_parent(parent.id)
                    .with_status(TaskStatus::Thinking),
            )
            .await
            .unwrap();

        let running = store
            .list(tenant, Some(&[TaskStatus::Thinking, TaskStatus::Executing]))
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(store.children(tenant, parent.id).await.unwrap().len(), 1);
    }
}
