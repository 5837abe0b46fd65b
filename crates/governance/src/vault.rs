//! Credential vault.
//!
//! Skill credentials are encrypted with AES-256-GCM under a single master
//! key and stored as `base64(nonce || ciphertext)`. Plaintext only ever
//! lives in `SecretString` values handed back to the skill router.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use orchestra_core::{
    traits::CredentialStore,
    types::{CredentialStatus, SkillCredential, TenantId},
    Error, Result,
};

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

// =============================================================================
// Master Key
// =============================================================================

/// 32-byte AES key. Accepts 64 hex chars or standard base64.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    pub fn parse(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        let bytes = if encoded.len() == KEY_LEN * 2 && encoded.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(encoded).map_err(|e| Error::configuration(format!("Invalid hex master key: {}", e)))?
        } else {
            BASE64
                .decode(encoded)
                .map_err(|e| Error::configuration(format!("Invalid base64 master key: {}", e)))?
        };

        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| Error::configuration("Master key must decode to exactly 32 bytes"))?;
        Ok(Self(key))
    }

    pub fn from_secret(secret: &SecretString) -> Result<Self> {
        Self::parse(secret.expose_secret())
    }

    /// Fresh random key, hex encoded. Used by operators to mint keys.
    pub fn generate_hex() -> String {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

fn encrypt(cipher: &Aes256Gcm, plaintext: &str) -> Result<String> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| Error::internal(format!("Encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(out))
}

fn decrypt(cipher: &Aes256Gcm, encoded: &str) -> Result<String> {
    let data = BASE64
        .decode(encoded)
        .map_err(|e| Error::internal(format!("Ciphertext is not base64: {}", e)))?;
    if data.len() < NONCE_LEN {
        return Err(Error::internal("Ciphertext too short"));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| Error::internal(format!("Decryption failed: {}", e)))?;
    String::from_utf8(plaintext).map_err(|e| Error::internal(format!("Plaintext is not UTF-8: {}", e)))
}

// =============================================================================
// Vault
// =============================================================================

/// Encrypting facade over a `CredentialStore`.
pub struct CredentialVault {
    store: Arc<dyn CredentialStore>,
    cipher: Option<Aes256Gcm>,
}

impl CredentialVault {
    /// Build from configuration. An absent key yields a vault that refuses
    /// every operation with `VaultNotConfigured`; a malformed key is an error.
    pub fn new(store: Arc<dyn CredentialStore>, master_key: Option<&SecretString>) -> Result<Self> {
        let cipher = match master_key {
            Some(secret) => Some(MasterKey::from_secret(secret)?.cipher()),
            None => None,
        };
        Ok(Self { store, cipher })
    }

    pub fn with_key(store: Arc<dyn CredentialStore>, key: &MasterKey) -> Self {
        Self {
            store,
            cipher: Some(key.cipher()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.cipher.is_some()
    }

    fn cipher(&self) -> Result<&Aes256Gcm> {
        self.cipher.as_ref().ok_or(Error::VaultNotConfigured)
    }

    /// Encrypt and persist a credential for a skill config.
    pub async fn store(
        &self,
        tenant: TenantId,
        skill_config: Uuid,
        key: &str,
        plaintext: &SecretString,
        credential_type: &str,
    ) -> Result<SkillCredential> {
        let cipher = self.cipher()?;
        let credential = SkillCredential {
            id: Uuid::new_v4(),
            tenant_id: tenant,
            skill_config_id: skill_config,
            credential_key: key.to_string(),
            encrypted_value: encrypt(cipher, plaintext.expose_secret())?,
            credential_type: credential_type.to_string(),
            status: CredentialStatus::Active,
            last_used_at: None,
            created_at: Utc::now(),
        };
        self.store.insert(credential.clone()).await?;

        tracing::info!(
            tenant_id = %tenant,
            credential_id = %credential.id,
            credential_key = key,
            "Stored credential"
        );
        Ok(credential)
    }

    /// Decrypt one active credential. Missing, revoked and undecryptable
    /// rows all come back as `None`.
    pub async fn retrieve(&self, tenant: TenantId, id: Uuid) -> Result<Option<SecretString>> {
        let cipher = self.cipher()?;
        let Some(row) = self.store.get(tenant, id).await? else {
            return Ok(None);
        };
        if row.status != CredentialStatus::Active {
            return Ok(None);
        }

        match decrypt(cipher, &row.encrypted_value) {
            Ok(plaintext) => {
                self.store.touch(tenant, id, Utc::now()).await?;
                Ok(Some(Secret::new(plaintext)))
            }
            Err(e) => {
                tracing::warn!(tenant_id = %tenant, credential_id = %id, error = %e, "Credential decryption failed");
                Ok(None)
            }
        }
    }

    /// Decrypt every active credential of a skill config, keyed by
    /// `credential_key`. Rows that fail to decrypt are skipped.
    pub async fn retrieve_for_skill(
        &self,
        tenant: TenantId,
        skill_config: Uuid,
    ) -> Result<HashMap<String, SecretString>> {
        let cipher = self.cipher()?;
        let now = Utc::now();
        let mut out = HashMap::new();

        for row in self.store.list_for_skill(tenant, skill_config).await? {
            if row.status != CredentialStatus::Active {
                continue;
            }
            match decrypt(cipher, &row.encrypted_value) {
                Ok(plaintext) => {
                    self.store.touch(tenant, row.id, now).await?;
                    out.insert(row.credential_key, Secret::new(plaintext));
                }
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %tenant,
                        credential_id = %row.id,
                        error = %e,
                        "Skipping undecryptable credential"
                    );
                }
            }
        }
        Ok(out)
    }

    pub async fn revoke(&self, tenant: TenantId, id: Uuid) -> Result<bool> {
        let revoked = self.store.set_status(tenant, id, CredentialStatus::Revoked).await?;
        if revoked {
            tracing::info!(tenant_id = %tenant, credential_id = %id, "Revoked credential");
        }
        Ok(revoked)
    }
}

// =============================================================================
// Key Rotation
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub rotated: usize,
    pub failed: usize,
}

/// Re-encrypt every stored credential from `old` to `new`. Meant to run
/// offline; rows that do not decrypt under `old` are left untouched.
pub async fn rotate_master_key(
    store: &dyn CredentialStore,
    old: &MasterKey,
    new: &MasterKey,
) -> Result<RotationReport> {
    let (old_cipher, new_cipher) = (old.cipher(), new.cipher());
    let mut report = RotationReport::default();

    for row in store.list_all().await? {
        match decrypt(&old_cipher, &row.encrypted_value) {
            Ok(plaintext) => {
                let reencrypted = encrypt(&new_cipher, &plaintext)?;
                store.replace_ciphertext(row.id, reencrypted).await?;
                report.rotated += 1;
            }
            Err(e) => {
                tracing::warn!(credential_id = %row.id, error = %e, "Credential not rotated");
                report.failed += 1;
            }
        }
    }

    tracing::info!(rotated = report.rotated, failed = report.failed, "Master key rotation finished");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestra_store::InMemoryCredentialStore;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    fn vault() -> (CredentialVault, Arc<InMemoryCredentialStore>) {
        let store = Arc::new(InMemoryCredentialStore::new());
        let key = MasterKey::parse(KEY).unwrap();
        (CredentialVault::with_key(store.clone(), &key), store)
    }

    fn secret(s: &str) -> SecretString {
        Secret::new(s.to_string())
    }

    #[test]
    fn test_master_key_formats() {
        assert!(MasterKey::parse(KEY).is_ok());
        let b64 = BASE64.encode([7u8; 32]);
        assert!(MasterKey::parse(&b64).is_ok());
        assert!(MasterKey::parse("abcd").is_err());
        assert!(MasterKey::parse(&BASE64.encode([1u8; 16])).is_err());
        assert_eq!(MasterKey::generate_hex().len(), 64);
    }

    #[tokio::test]
    async fn test_store_retrieve_revoke() {
        let (vault, store) = vault();
        let tenant = Uuid::new_v4();
        let skill = Uuid::new_v4();

        let cred = vault
            .store(tenant, skill, "api_key", &secret("sk-live-123"), "api_key")
            .await
            .unwrap();
        assert!(!cred.encrypted_value.contains("sk-live-123"));

        let got = vault.retrieve(tenant, cred.id).await.unwrap().unwrap();
        assert_eq!(got.expose_secret(), "sk-live-123");
        assert!(store.get(tenant, cred.id).await.unwrap().unwrap().last_used_at.is_some());

        assert!(vault.retrieve(Uuid::new_v4(), cred.id).await.unwrap().is_none());

        assert!(vault.revoke(tenant, cred.id).await.unwrap());
        assert!(vault.retrieve(tenant, cred.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unconfigured_vault() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let vault = CredentialVault::new(store, None).unwrap();
        assert!(!vault.is_configured());
        let err = vault
            .store(Uuid::new_v4(), Uuid::new_v4(), "k", &secret("v"), "api_key")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VaultNotConfigured));
    }

    #[tokio::test]
    async fn test_retrieve_for_skill_skips_bad_rows() {
        let (vault, store) = vault();
        let tenant = Uuid::new_v4();
        let skill = Uuid::new_v4();

        vault.store(tenant, skill, "user", &secret("alice"), "basic").await.unwrap();
        let pw = vault.store(tenant, skill, "password", &secret("hunter2"), "basic").await.unwrap();
        store.replace_ciphertext(pw.id, "bm90LXZhbGlk".into()).await.unwrap();

        let creds = vault.retrieve_for_skill(tenant, skill).await.unwrap();
        assert_eq!(creds.len(), 1);
        assert_eq!(creds["user"].expose_secret(), "alice");
        assert!(vault.retrieve(tenant, pw.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_master_key() {
        let (vault, store) = vault();
        let tenant = Uuid::new_v4();
        let cred = vault
            .store(tenant, Uuid::new_v4(), "token", &secret("xyz"), "bearer")
            .await
            .unwrap();

        let old = MasterKey::parse(KEY).unwrap();
        let new = MasterKey::parse(&MasterKey::generate_hex()).unwrap();
        let report = rotate_master_key(store.as_ref(), &old, &new).await.unwrap();
        assert_eq!(report, RotationReport { rotated: 1, failed: 0 });

        assert!(vault.retrieve(tenant, cred.id).await.unwrap().is_none());
        let rotated = CredentialVault::with_key(store.clone(), &new);
        assert_eq!(
            rotated.retrieve(tenant, cred.id).await.unwrap().unwrap().expose_secret(),
            "xyz"
        );
    }

    #[tokio::test]
    async fn test_rotation_survives_reopen_on_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchestra.db");
        let path = path.to_str().unwrap();
        let old = MasterKey::parse(KEY).unwrap();
        let new = MasterKey::parse(&MasterKey::generate_hex()).unwrap();
        let tenant = Uuid::new_v4();

        let id = {
            let store = Arc::new(orchestra_store::SqliteCredentialStore::open(path).unwrap());
            let vault = CredentialVault::with_key(store.clone(), &old);
            let cred = vault
                .store(tenant, Uuid::new_v4(), "api_key", &secret("sk-abc"), "api_key")
                .await
                .unwrap();
            rotate_master_key(store.as_ref(), &old, &new).await.unwrap();
            cred.id
        };

        let store = Arc::new(orchestra_store::SqliteCredentialStore::open(path).unwrap());
        let vault = CredentialVault::with_key(store, &new);
        assert_eq!(vault.retrieve(tenant, id).await.unwrap().unwrap().expose_secret(), "sk-abc");
    }
}
