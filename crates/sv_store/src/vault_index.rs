//! Vault metadata and the per-vault item index.
//!
//! Each vault is one JSON record under `vault:{id}`; the set of known vault
//! ids lives under `vaults`. The item count is derived from the stored id
//! set, so it always equals the number of items registered to the vault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditLog};
use crate::error::{StoreError, StoreResult};
use crate::keys::{vault_key, VAULT_REGISTRY_KEY};
use crate::kv::KeyValueStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultMetadata {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub item_ids: BTreeSet<String>,
    #[serde(default)]
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultMetadata {
    pub fn item_count(&self) -> usize {
        self.item_ids.len()
    }

    pub fn lock_state(&self) -> LockState {
        if self.locked {
            LockState::Locked
        } else {
            LockState::Unlocked
        }
    }
}

pub struct VaultIndex {
    kv: Arc<dyn KeyValueStore>,
    audit: Arc<AuditLog>,
    // Serializes read-modify-write of vault records and the registry.
    lock: Mutex<()>,
}

impl VaultIndex {
    pub fn new(kv: Arc<dyn KeyValueStore>, audit: Arc<AuditLog>) -> Self {
        Self {
            kv,
            audit,
            lock: Mutex::new(()),
        }
    }

    pub async fn create_vault(&self, name: &str, color: &str) -> StoreResult<VaultMetadata> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Validation("vault name must not be empty".into()));
        }
        let now = Utc::now();
        let vault = VaultMetadata {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            color: color.to_string(),
            item_ids: BTreeSet::new(),
            locked: false,
            created_at: now,
            updated_at: now,
        };

        {
            let _guard = self.lock.lock().await;
            self.save(&vault).await?;
            let mut registry = self.load_registry().await?;
            registry.insert(vault.id.clone());
            self.save_registry(&registry).await?;
        }

        tracing::info!(vault_id = %vault.id, "vault created");
        self.audit_best_effort(
            AuditEventType::VaultCreated,
            json!({ "vault_id": vault.id, "name": vault.name }),
        )
        .await;
        Ok(vault)
    }

    pub async fn get_vault(&self, vault_id: &str) -> StoreResult<Option<VaultMetadata>> {
        match self.kv.get(&vault_key(vault_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn list_vaults(&self) -> StoreResult<Vec<VaultMetadata>> {
        let registry = self.load_registry().await?;
        let mut vaults = Vec::with_capacity(registry.len());
        for id in registry {
            if let Some(vault) = self.get_vault(&id).await? {
                vaults.push(vault);
            } else {
                tracing::warn!(vault_id = %id, "vault registry references a missing vault record");
            }
        }
        vaults.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(vaults)
    }

    /// Delete an empty vault.
    pub async fn delete_vault(&self, vault_id: &str) -> StoreResult<()> {
        {
            let _guard = self.lock.lock().await;
            let vault = self.require(vault_id).await?;
            if !vault.item_ids.is_empty() {
                return Err(StoreError::Validation(format!(
                    "vault {vault_id} still holds {} items",
                    vault.item_count()
                )));
            }
            self.kv.delete(&vault_key(vault_id)).await?;
            let mut registry = self.load_registry().await?;
            registry.remove(vault_id);
            self.save_registry(&registry).await?;
        }
        tracing::info!(vault_id, "vault deleted");
        self.audit_best_effort(AuditEventType::VaultDeleted, json!({ "vault_id": vault_id }))
            .await;
        Ok(())
    }

    pub async fn add_item(&self, vault_id: &str, item_id: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut vault = self.require(vault_id).await?;
        if vault.item_ids.insert(item_id.to_string()) {
            vault.updated_at = Utc::now();
            self.save(&vault).await?;
        }
        Ok(())
    }

    /// Removing an id the vault does not hold is a no-op.
    pub async fn remove_item(&self, vault_id: &str, item_id: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut vault = self.require(vault_id).await?;
        if vault.item_ids.remove(item_id) {
            vault.updated_at = Utc::now();
            self.save(&vault).await?;
        }
        Ok(())
    }

    pub async fn count(&self, vault_id: &str) -> StoreResult<usize> {
        Ok(self.require(vault_id).await?.item_count())
    }

    pub async fn item_ids(&self, vault_id: &str) -> StoreResult<Vec<String>> {
        Ok(self.require(vault_id).await?.item_ids.into_iter().collect())
    }

    pub async fn lock_state(&self, vault_id: &str) -> StoreResult<LockState> {
        Ok(self.require(vault_id).await?.lock_state())
    }

    pub async fn lock(&self, vault_id: &str) -> StoreResult<()> {
        self.set_locked(vault_id, true).await
    }

    pub async fn unlock(&self, vault_id: &str) -> StoreResult<()> {
        self.set_locked(vault_id, false).await
    }

    async fn set_locked(&self, vault_id: &str, locked: bool) -> StoreResult<()> {
        {
            let _guard = self.lock.lock().await;
            let mut vault = self.require(vault_id).await?;
            if vault.locked == locked {
                return Ok(());
            }
            vault.locked = locked;
            vault.updated_at = Utc::now();
            self.save(&vault).await?;
        }
        let event = if locked {
            AuditEventType::VaultLocked
        } else {
            AuditEventType::VaultUnlocked
        };
        tracing::info!(vault_id, locked, "vault lock state changed");
        self.audit_best_effort(event, json!({ "vault_id": vault_id })).await;
        Ok(())
    }

    async fn require(&self, vault_id: &str) -> StoreResult<VaultMetadata> {
        self.get_vault(vault_id)
            .await?
            .ok_or_else(|| StoreError::VaultNotFound(vault_id.to_string()))
    }

    async fn save(&self, vault: &VaultMetadata) -> StoreResult<()> {
        let raw = serde_json::to_string(vault)?;
        self.kv.set(&vault_key(&vault.id), &raw).await
    }

    async fn load_registry(&self) -> StoreResult<BTreeSet<String>> {
        match self.kv.get(VAULT_REGISTRY_KEY).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(BTreeSet::new()),
        }
    }

    async fn save_registry(&self, registry: &BTreeSet<String>) -> StoreResult<()> {
        let raw = serde_json::to_string(registry)?;
        self.kv.set(VAULT_REGISTRY_KEY, &raw).await
    }

    async fn audit_best_effort(&self, event: AuditEventType, details: serde_json::Value) {
        if let Err(e) = self.audit.record(event, details).await {
            tracing::warn!(error = %e, event = ?event, "audit append failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use sv_crypto::{MasterKey, XChaChaEnvelope};

    fn index() -> (VaultIndex, Arc<AuditLog>) {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKv::new());
        let envelope = Arc::new(XChaChaEnvelope::new(MasterKey::from_bytes([1u8; 32])));
        let audit = Arc::new(AuditLog::new(kv.clone(), envelope));
        (VaultIndex::new(kv, audit.clone()), audit)
    }

    #[tokio::test]
    async fn create_get_list() {
        let (index, _) = index();
        let a = index.create_vault("Personal", "#ff0000").await.unwrap();
        let b = index.create_vault("Work", "#00ff00").await.unwrap();

        let fetched = index.get_vault(&a.id).await.unwrap().unwrap();
        assert_eq!(fetched, a);
        let ids: Vec<_> = index.list_vaults().await.unwrap().into_iter().map(|v| v.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&a.id) && ids.contains(&b.id));
        assert!(index.get_vault("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_name_rejected() {
        let (index, _) = index();
        assert!(matches!(
            index.create_vault("  ", "blue").await,
            Err(StoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn counts_follow_add_and_remove() {
        let (index, _) = index();
        let v = index.create_vault("Docs", "blue").await.unwrap();
        index.add_item(&v.id, "i1").await.unwrap();
        index.add_item(&v.id, "i2").await.unwrap();
        index.add_item(&v.id, "i2").await.unwrap();
        assert_eq!(index.count(&v.id).await.unwrap(), 2);

        index.remove_item(&v.id, "i1").await.unwrap();
        index.remove_item(&v.id, "never-added").await.unwrap();
        assert_eq!(index.count(&v.id).await.unwrap(), 1);
        assert_eq!(index.item_ids(&v.id).await.unwrap(), vec!["i2".to_string()]);
    }

    #[tokio::test]
    async fn unknown_vault_is_reported() {
        let (index, _) = index();
        assert!(matches!(
            index.add_item("nope", "i").await,
            Err(StoreError::VaultNotFound(_))
        ));
        assert!(matches!(
            index.lock_state("nope").await,
            Err(StoreError::VaultNotFound(_))
        ));
    }

    #[tokio::test]
    async fn lock_transitions_are_audited() {
        let (index, audit) = index();
        let v = index.create_vault("Secrets", "black").await.unwrap();
        assert_eq!(index.lock_state(&v.id).await.unwrap(), LockState::Unlocked);

        index.lock(&v.id).await.unwrap();
        index.lock(&v.id).await.unwrap();
        assert_eq!(index.lock_state(&v.id).await.unwrap(), LockState::Locked);
        index.unlock(&v.id).await.unwrap();
        assert_eq!(index.lock_state(&v.id).await.unwrap(), LockState::Unlocked);

        let types: Vec<_> = audit
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            types,
            vec![
                AuditEventType::VaultUnlocked,
                AuditEventType::VaultLocked,
                AuditEventType::VaultCreated,
            ]
        );
    }

    #[tokio::test]
    async fn only_empty_vaults_can_be_deleted() {
        let (index, _) = index();
        let v = index.create_vault("Temp", "grey").await.unwrap();
        index.add_item(&v.id, "i1").await.unwrap();
        assert!(matches!(
            index.delete_vault(&v.id).await,
            Err(StoreError::Validation(_))
        ));
        index.remove_item(&v.id, "i1").await.unwrap();
        index.delete_vault(&v.id).await.unwrap();
        assert!(index.get_vault(&v.id).await.unwrap().is_none());
        assert!(index.list_vaults().await.unwrap().is_empty());
    }
}
