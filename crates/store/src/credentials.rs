//! Credential ciphertext stores. Plaintext never reaches this layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use orchestra_core::{
    traits::CredentialStore,
    types::{CredentialStatus, SkillCredential, TenantId},
    Error, Result,
};

use crate::sqlite::{db_err, join_err, open_connection, opt_ts_col, ts_col, uuid_col};

// =============================================================================
// In-memory
// =============================================================================

#[derive(Default)]
pub struct InMemoryCredentialStore {
    rows: DashMap<Uuid, SkillCredential>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn insert(&self, credential: SkillCredential) -> Result<()> {
        self.rows.insert(credential.id, credential);
        Ok(())
    }

    async fn get(&self, tenant: TenantId, id: Uuid) -> Result<Option<SkillCredential>> {
        Ok(self
            .rows
            .get(&id)
            .filter(|c| c.tenant_id == tenant)
            .map(|c| c.clone()))
    }

    async fn list_for_skill(&self, tenant: TenantId, skill_config: Uuid) -> Result<Vec<SkillCredential>> {
        let mut rows: Vec<SkillCredential> = self
            .rows
            .iter()
            .filter(|c| c.tenant_id == tenant && c.skill_config_id == skill_config)
            .map(|c| c.clone())
            .collect();
        rows.sort_by_key(|c| c.created_at);
        Ok(rows)
    }

    async fn set_status(&self, tenant: TenantId, id: Uuid, status: CredentialStatus) -> Result<bool> {
        match self.rows.get_mut(&id) {
            Some(mut c) if c.tenant_id == tenant => {
                c.status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(&self, tenant: TenantId, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(mut c) = self.rows.get_mut(&id) {
            if c.tenant_id == tenant {
                c.last_used_at = Some(at);
            }
        }
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<SkillCredential>> {
        Ok(self.rows.iter().map(|c| c.clone()).collect())
    }

    async fn replace_ciphertext(&self, id: Uuid, encrypted_value: String) -> Result<()> {
        match self.rows.get_mut(&id) {
            Some(mut c) => {
                c.encrypted_value = encrypted_value;
                Ok(())
            }
            None => Err(Error::not_found(format!("credential {}", id))),
        }
    }
}

// =============================================================================
// SQLite
// =============================================================================

/// SQLite-backed credential store.
pub struct SqliteCredentialStore {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = "SELECT id, tenant_id, skill_config_id, credential_key, encrypted_value,
    credential_type, status, last_used_at, created_at FROM skill_credentials";

impl SqliteCredentialStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = open_connection(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS skill_credentials (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                skill_config_id TEXT NOT NULL,
                credential_key TEXT NOT NULL,
                encrypted_value TEXT NOT NULL, -- base64(nonce || ciphertext)
                credential_type TEXT NOT NULL,
                status TEXT NOT NULL,
                last_used_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_credentials_skill ON skill_credentials (tenant_id, skill_config_id);",
        )
        .map_err(db_err)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn query(&self, sql: String, args: Vec<String>) -> Result<Vec<SkillCredential>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(args.iter()), row_to_credential)
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
        })
        .await
        .map_err(join_err)?
    }

    async fn execute(&self, sql: &'static str, args: Vec<Option<String>>) -> Result<usize> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(sql, rusqlite::params_from_iter(args.iter()))
                .map_err(db_err)
        })
        .await
        .map_err(join_err)?
    }
}

fn row_to_credential(row: &rusqlite::Row<'_>) -> rusqlite::Result<SkillCredential> {
    let status: String = row.get(6)?;
    Ok(SkillCredential {
        id: uuid_col(row, 0)?,
        tenant_id: uuid_col(row, 1)?,
        skill_config_id: uuid_col(row, 2)?,
        credential_key: row.get(3)?,
        encrypted_value: row.get(4)?,
        credential_type: row.get(5)?,
        status: CredentialStatus::parse(&status).unwrap_or(CredentialStatus::Revoked),
        last_used_at: opt_ts_col(row, 7)?,
        created_at: ts_col(row, 8)?,
    })
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn insert(&self, credential: SkillCredential) -> Result<()> {
        self.execute(
            "INSERT OR REPLACE INTO skill_credentials
                (id, tenant_id, skill_config_id, credential_key, encrypted_value, credential_type, status, last_used_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            vec![
                Some(credential.id.to_string()),
                Some(credential.tenant_id.to_string()),
                Some(credential.skill_config_id.to_string()),
                Some(credential.credential_key),
                Some(credential.encrypted_value),
                Some(credential.credential_type),
                Some(credential.status.as_str().to_string()),
                credential.last_used_at.map(|t| t.to_rfc3339()),
                Some(credential.created_at.to_rfc3339()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get(&self, tenant: TenantId, id: Uuid) -> Result<Option<SkillCredential>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.query_row(
                &format!("{} WHERE id = ?1 AND tenant_id = ?2", SELECT_COLUMNS),
                params![id.to_string(), tenant.to_string()],
                row_to_credential,
            )
            .optional()
            .map_err(db_err)
        })
        .await
        .map_err(join_err)?
    }

    async fn list_for_skill(&self, tenant: TenantId, skill_config: Uuid) -> Result<Vec<SkillCredential>> {
        self.query(
            format!(
                "{} WHERE tenant_id = ?1 AND skill_config_id = ?2 ORDER BY created_at",
                SELECT_COLUMNS
            ),
            vec![tenant.to_string(), skill_config.to_string()],
        )
        .await
    }

    async fn set_status(&self, tenant: TenantId, id: Uuid, status: CredentialStatus) -> Result<bool> {
        let changed = self
            .execute(
                "UPDATE skill_credentials SET status = ?1 WHERE id = ?2 AND tenant_id = ?3",
                vec![
                    Some(status.as_str().to_string()),
                    Some(id.to_string()),
                    Some(tenant.to_string()),
                ],
            )
            .await?;
        Ok(changed > 0)
    }

    async fn touch(&self, tenant: TenantId, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        self.execute(
            "UPDATE skill_credentials SET last_used_at = ?1 WHERE id = ?2 AND tenant_id = ?3",
            vec![
                Some(at.to_rfc3339()),
                Some(id.to_string()),
                Some(tenant.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<SkillCredential>> {
        self.query(format!("{} ORDER BY created_at", SELECT_COLUMNS), Vec::new())
            .await
    }

    async fn replace_ciphertext(&self, id: Uuid, encrypted_value: String) -> Result<()> {
        let changed = self
            .execute(
                "UPDATE skill_credentials SET encrypted_value = ?1 WHERE id = ?2",
                vec![Some(encrypted_value), Some(id.to_string())],
            )
            .await?;
        if changed == 0 {
            return Err(Error::not_found(format!("credential {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(tenant: TenantId, skill: Uuid) -> SkillCredential {
        SkillCredential {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            skill_config_id: skill,
            credential_key: "api_key".into(),
            encrypted_value: "Y2lwaGVy".into(),
            credential_type: "api_key".into(),
            status: CredentialStatus::Active,
            last_used_at: None,
            created_at: Utc::now(),
        }
    }

    async fn exercise(store: &dyn CredentialStore) {
        let (tenant, skill) = (Uuid::new_v4(), Uuid::new_v4());
        let c = credential(tenant, skill);
        store.insert(c.clone()).await.unwrap();

        assert!(store.get(Uuid::new_v4(), c.id).await.unwrap().is_none());
        assert_eq!(store.list_for_skill(tenant, skill).await.unwrap().len(), 1);

        let at = Utc::now();
        store.touch(tenant, c.id, at).await.unwrap();
        let loaded = store.get(tenant, c.id).await.unwrap().unwrap();
        assert!(loaded.last_used_at.is_some());

        assert!(!store
            .set_status(Uuid::new_v4(), c.id, CredentialStatus::Revoked)
            .await
            .unwrap());
        assert!(store
            .set_status(tenant, c.id, CredentialStatus::Revoked)
            .await
            .unwrap());
        let loaded = store.get(tenant, c.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, CredentialStatus::Revoked);

        store.replace_ciphertext(c.id, "bmV3".into()).await.unwrap();
        assert_eq!(store.list_all().await.unwrap()[0].encrypted_value, "bmV3");
    }

    #[tokio::test]
    async fn test_in_memory_credentials() {
        exercise(&InMemoryCredentialStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.db");
        let store = SqliteCredentialStore::open(path.to_str().unwrap()).unwrap();
        exercise(&store).await;
    }
}
