//! Item CRUD over the storage collaborator.
//!
//! Records are persisted "sealed": identical to [`Item`] except that every
//! sensitive field holds envelope ciphertext. Media payloads live under their
//! own key and are verified against the record's digest on every read.

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use rand::RngCore;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use sv_crypto::{integrity, Envelope};
use tokio::sync::Mutex;

use crate::audit::{AuditEventType, AuditLog};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::item::{validate_name, Item, ItemPatch, NewItem};
use crate::keys::{blob_key, field_context, item_key};
use crate::kv::KeyValueStore;
use crate::unlock::open_envelope;
use crate::vault_index::VaultIndex;

const ID_BYTES: usize = 16;
const ID_ATTEMPTS: usize = 4;

pub struct ItemStore {
    kv: Arc<dyn KeyValueStore>,
    envelope: Arc<dyn Envelope>,
    vaults: Arc<VaultIndex>,
    audit: Arc<AuditLog>,
    config: StoreConfig,
    // One mutex per item id, held by every operation that touches both the
    // record and its payload.
    item_locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ItemStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        envelope: Arc<dyn Envelope>,
        vaults: Arc<VaultIndex>,
        audit: Arc<AuditLog>,
        config: StoreConfig,
    ) -> Self {
        Self {
            kv,
            envelope,
            vaults,
            audit,
            config,
            item_locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Unlock with the master password and wire up the audit log and vault
    /// index over the same backend.
    pub async fn open(
        kv: Arc<dyn KeyValueStore>,
        password: &str,
        config: StoreConfig,
    ) -> StoreResult<Self> {
        config.validate()?;
        let envelope: Arc<dyn Envelope> =
            Arc::new(open_envelope(kv.as_ref(), password, &config.kdf).await?);
        let audit = Arc::new(AuditLog::with_capacity(
            kv.clone(),
            envelope.clone(),
            config.audit_capacity,
        ));
        let vaults = Arc::new(VaultIndex::new(kv.clone(), audit.clone()));
        Ok(Self::new(kv, envelope, vaults, audit, config))
    }

    pub fn vaults(&self) -> &Arc<VaultIndex> {
        &self.vaults
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn create(&self, vault_id: &str, new_item: NewItem) -> StoreResult<Item> {
        validate_name(&new_item.name)?;
        new_item.kind.validate()?;
        let item_type = new_item.kind.item_type();
        if item_type.is_media() && new_item.content.is_none() {
            return Err(StoreError::Validation(format!(
                "{item_type} item requires a content payload"
            )));
        }
        if !item_type.is_media() && new_item.content.is_some() {
            return Err(StoreError::Validation(format!(
                "{item_type} items do not carry a content payload"
            )));
        }
        self.check_vault(vault_id).await?;

        let NewItem {
            name,
            tags,
            is_favorite,
            notes,
            mut kind,
            content,
        } = new_item;

        if let (Some(content), Some(slot)) = (content.as_ref(), kind.media_mut()) {
            *slot.size = content.len() as u64;
            *slot.hash = integrity::digest(content);
        }

        let now = Utc::now();
        let item = Item {
            id: self.allocate_id().await?,
            vault_id: vault_id.to_string(),
            name: name.trim().to_string(),
            created_at: now,
            updated_at: now,
            tags,
            is_favorite,
            notes,
            version: 1,
            kind,
        };
        let sealed = self.seal(&item)?;

        if let (Some(hash), Some(content)) = (item.kind.content_hash(), &content) {
            self.write_content(&blob_key(&item.id, hash), content).await?;
        }
        if let Err(e) = self.write_record(&sealed).await {
            self.discard(&item).await;
            return Err(e);
        }
        if let Err(e) = self.vaults.add_item(vault_id, &item.id).await {
            self.discard(&item).await;
            return Err(e);
        }

        tracing::debug!(item_id = %item.id, vault_id, %item_type, "item created");
        self.audit_best_effort(
            AuditEventType::ItemAdded,
            json!({
                "item_id": item.id,
                "vault_id": vault_id,
                "item_type": item_type,
                "details": item.kind.audit_details(),
            }),
        )
        .await;
        Ok(item)
    }

    pub async fn get(&self, item_id: &str) -> StoreResult<Item> {
        let lock = self.item_lock(item_id);
        let _guard = lock.lock().await;

        let sealed = self.load_existing(item_id).await?;
        self.check_vault(&sealed.vault_id).await?;
        let item = self.open_audited(sealed).await?;
        if item.item_type().is_media() {
            self.load_verified_content(&item).await?;
        }
        Ok(item)
    }

    /// Verified media payload of an item.
    pub async fn content(&self, item_id: &str) -> StoreResult<Vec<u8>> {
        let lock = self.item_lock(item_id);
        let _guard = lock.lock().await;

        let sealed = self.load_existing(item_id).await?;
        self.check_vault(&sealed.vault_id).await?;
        if !sealed.item_type().is_media() {
            return Err(StoreError::Validation(format!(
                "{} items have no content payload",
                sealed.item_type()
            )));
        }
        // media variants carry no sealed fields
        self.load_verified_content(&sealed).await
    }

    /// All items of a vault, oldest first. Payloads are not re-verified here;
    /// `get` and `content` do that.
    pub async fn list(&self, vault_id: &str) -> StoreResult<Vec<Item>> {
        self.check_vault(vault_id).await?;
        let ids = self.vaults.item_ids(vault_id).await?;
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_record(&id).await {
                Ok(sealed) => items.push(self.open_audited(sealed).await?),
                Err(StoreError::ItemNotFound(_)) => {
                    tracing::warn!(item_id = %id, vault_id, "index references a missing item");
                }
                Err(e) => return Err(e),
            }
        }
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    pub async fn update(&self, item_id: &str, patch: ItemPatch) -> StoreResult<Item> {
        let lock = self.item_lock(item_id);
        let _guard = lock.lock().await;

        let stored = self.load_existing(item_id).await?;
        self.check_vault(&stored.vault_id).await?;
        if let Some(expected) = patch.expected_version {
            if expected != stored.version {
                return Err(StoreError::Conflict {
                    item_id: item_id.to_string(),
                    expected,
                    found: stored.version,
                });
            }
        }
        let current = self.open_audited(stored.clone()).await?;
        let touched = patch.touched();

        let ItemPatch {
            name,
            tags,
            is_favorite,
            notes,
            fields,
            content,
            ..
        } = patch;

        let mut next = current.clone();
        if let Some(name) = name {
            validate_name(&name)?;
            next.name = name.trim().to_string();
        }
        if let Some(tags) = tags {
            next.tags = tags;
        }
        if let Some(is_favorite) = is_favorite {
            next.is_favorite = is_favorite;
        }
        if let Some(notes) = notes {
            next.notes = notes;
        }
        if let Some(mut kind) = fields {
            if kind.item_type() != current.item_type() {
                return Err(StoreError::Validation(format!(
                    "item type is immutable: cannot change {} to {}",
                    current.item_type(),
                    kind.item_type()
                )));
            }
            kind.validate()?;
            if let Some(slot) = kind.media_mut() {
                *slot.size = current.kind.content_size().unwrap_or_default();
                *slot.hash = current.kind.content_hash().unwrap_or_default().to_string();
            }
            next.kind = kind;
        }
        if let Some(content) = &content {
            let item_type = next.item_type();
            let Some(slot) = next.kind.media_mut() else {
                return Err(StoreError::Validation(format!(
                    "{item_type} items do not carry a content payload"
                )));
            };
            *slot.size = content.len() as u64;
            *slot.hash = integrity::digest(content);
        }
        next.updated_at = Utc::now().max(current.updated_at);
        next.version = stored.version + 1;

        let (sealed, re_encrypted) = self.reseal(&stored, &current, &next)?;
        let old_blob = stored.kind.content_hash().map(|hash| blob_key(item_id, hash));
        let new_blob = next.kind.content_hash().map(|hash| blob_key(item_id, hash));
        let replaced = new_blob != old_blob;

        if let (Some(key), Some(content)) = (&new_blob, &content) {
            self.write_content(key, content).await?;
        }
        if let Err(e) = self.write_record(&sealed).await {
            // the committed record still points at the old payload
            if let (true, Some(key)) = (replaced, &new_blob) {
                self.delete_quietly(key).await;
            }
            return Err(e);
        }
        if let (true, Some(key)) = (replaced, &old_blob) {
            self.delete_quietly(key).await;
        }

        tracing::debug!(item_id, version = next.version, re_encrypted, "item updated");
        self.audit_best_effort(
            AuditEventType::ItemUpdated,
            json!({
                "item_id": item_id,
                "vault_id": next.vault_id,
                "item_type": next.item_type(),
                "changed": touched,
                "re_encrypted_fields": re_encrypted,
            }),
        )
        .await;
        Ok(next)
    }

    /// Delete an item. Deleting an absent id fails with `ItemNotFound`.
    pub async fn delete(&self, item_id: &str) -> StoreResult<()> {
        let lock = self.item_lock(item_id);
        let stored = {
            let _guard = lock.lock().await;
            let stored = self.load_existing(item_id).await?;
            self.check_vault(&stored.vault_id).await?;
            self.vaults.remove_item(&stored.vault_id, item_id).await?;
            if let Err(e) = self.kv.delete(&item_key(item_id)).await {
                if let Err(restore) = self.vaults.add_item(&stored.vault_id, item_id).await {
                    tracing::error!(item_id, error = %restore, "index entry lost after failed delete");
                }
                return Err(e);
            }
            // record is gone; a payload left behind is unreachable
            if let Some(hash) = stored.kind.content_hash() {
                self.delete_quietly(&blob_key(item_id, hash)).await;
            }
            stored
        };
        self.item_locks.lock().remove(item_id);

        tracing::debug!(item_id, vault_id = %stored.vault_id, "item deleted");
        self.audit_best_effort(
            AuditEventType::ItemDeleted,
            json!({
                "item_id": item_id,
                "vault_id": stored.vault_id,
                "item_type": stored.item_type(),
            }),
        )
        .await;
        Ok(())
    }

    pub async fn lock_vault(&self, vault_id: &str) -> StoreResult<()> {
        self.vaults.lock(vault_id).await
    }

    pub async fn unlock_vault(&self, vault_id: &str) -> StoreResult<()> {
        self.vaults.unlock(vault_id).await
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn item_lock(&self, item_id: &str) -> Arc<Mutex<()>> {
        self.item_locks
            .lock()
            .entry(item_id.to_string())
            .or_default()
            .clone()
    }

    async fn check_vault(&self, vault_id: &str) -> StoreResult<()> {
        let vault = self
            .vaults
            .get_vault(vault_id)
            .await?
            .ok_or_else(|| StoreError::VaultNotFound(vault_id.to_string()))?;
        if self.config.enforce_vault_lock && vault.locked {
            return Err(StoreError::VaultLocked(vault_id.to_string()));
        }
        Ok(())
    }

    async fn allocate_id(&self) -> StoreResult<String> {
        for _ in 0..ID_ATTEMPTS {
            let mut bytes = [0u8; ID_BYTES];
            rand::rngs::OsRng.fill_bytes(&mut bytes);
            let id = hex::encode(bytes);
            if self.kv.get(&item_key(&id)).await?.is_none() {
                return Ok(id);
            }
            tracing::warn!(item_id = %id, "item id collision, regenerating");
        }
        Err(StoreError::Storage("could not allocate a unique item id".into()))
    }

    async fn load_record(&self, item_id: &str) -> StoreResult<Item> {
        let raw = self
            .kv
            .get(&item_key(item_id))
            .await?
            .ok_or_else(|| StoreError::ItemNotFound(item_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// `load_record` that also drops the lock entry of an id that does not exist.
    async fn load_existing(&self, item_id: &str) -> StoreResult<Item> {
        let result = self.load_record(item_id).await;
        if matches!(result, Err(StoreError::ItemNotFound(_))) {
            self.item_locks.lock().remove(item_id);
        }
        result
    }

    async fn write_record(&self, sealed: &Item) -> StoreResult<()> {
        let raw = serde_json::to_string(sealed)?;
        self.kv.set(&item_key(&sealed.id), &raw).await
    }

    async fn write_content(&self, key: &str, content: &[u8]) -> StoreResult<()> {
        let encoded = general_purpose::STANDARD.encode(content);
        self.kv.set(key, &encoded).await
    }

    /// Best-effort cleanup after a failed create.
    async fn discard(&self, item: &Item) {
        self.delete_quietly(&item_key(&item.id)).await;
        if let Some(hash) = item.kind.content_hash() {
            self.delete_quietly(&blob_key(&item.id, hash)).await;
        }
    }

    async fn delete_quietly(&self, key: &str) {
        if let Err(e) = self.kv.delete(key).await {
            tracing::warn!(key = %key, error = %e, "stale key could not be removed");
        }
    }

    fn seal(&self, item: &Item) -> StoreResult<Item> {
        let mut sealed = item.clone();
        for (field, value) in sealed.kind.sensitive_fields_mut() {
            *value = self
                .envelope
                .encrypt_str(value, &field_context(&item.id, field))
                .map_err(StoreError::Encryption)?;
        }
        Ok(sealed)
    }

    fn unseal(&self, mut sealed: Item) -> StoreResult<Item> {
        let item_id = sealed.id.clone();
        for (field, value) in sealed.kind.sensitive_fields_mut() {
            *value = self
                .envelope
                .decrypt_string(value, &field_context(&item_id, field))
                .map_err(StoreError::Decryption)?;
        }
        Ok(sealed)
    }

    /// Seal `next`, keeping the stored ciphertext of every sensitive value
    /// whose plaintext did not change. Returns the number re-encrypted.
    fn reseal(&self, stored: &Item, current: &Item, next: &Item) -> StoreResult<(Item, usize)> {
        let mut stored_kind = stored.kind.clone();
        let mut current_kind = current.kind.clone();
        let previous: HashMap<&'static str, (String, String)> = stored_kind
            .sensitive_fields_mut()
            .into_iter()
            .zip(current_kind.sensitive_fields_mut())
            .map(|((name, sealed), (_, plain))| (name, (plain.clone(), sealed.clone())))
            .collect();

        let mut out = next.clone();
        let mut re_encrypted = 0;
        let item_id = out.id.clone();
        for (name, value) in out.kind.sensitive_fields_mut() {
            match previous.get(name) {
                Some((plain, sealed)) if plain.as_str() == value.as_str() => {
                    *value = sealed.clone();
                }
                _ => {
                    *value = self
                        .envelope
                        .encrypt_str(value, &field_context(&item_id, name))
                        .map_err(StoreError::Encryption)?;
                    re_encrypted += 1;
                }
            }
        }
        Ok((out, re_encrypted))
    }

    async fn open_audited(&self, sealed: Item) -> StoreResult<Item> {
        let item_id = sealed.id.clone();
        let vault_id = sealed.vault_id.clone();
        match self.unseal(sealed) {
            Err(err @ StoreError::Decryption(_)) => {
                tracing::error!(item_id = %item_id, error = %err, "sensitive field failed authentication");
                self.audit_best_effort(
                    AuditEventType::DecryptionFailed,
                    json!({ "item_id": item_id, "vault_id": vault_id }),
                )
                .await;
                Err(err)
            }
            other => other,
        }
    }

    async fn load_verified_content(&self, item: &Item) -> StoreResult<Vec<u8>> {
        let expected = item.kind.content_hash().unwrap_or_default();
        let decoded = match self.kv.get(&blob_key(&item.id, expected)).await? {
            Some(encoded) => general_purpose::STANDARD.decode(encoded).ok(),
            None => None,
        };
        match decoded {
            Some(content) if integrity::verify(&content, expected) => Ok(content),
            Some(_) => Err(self.integrity_violation(item, "digest mismatch").await),
            None => Err(self.integrity_violation(item, "payload missing or undecodable").await),
        }
    }

    async fn integrity_violation(&self, item: &Item, reason: &str) -> StoreError {
        tracing::error!(item_id = %item.id, reason, "media payload failed integrity check");
        self.audit_best_effort(
            AuditEventType::IntegrityViolation,
            json!({ "item_id": item.id, "vault_id": item.vault_id, "reason": reason }),
        )
        .await;
        StoreError::IntegrityViolation(item.id.clone())
    }

    async fn audit_best_effort(&self, event: AuditEventType, details: serde_json::Value) {
        if let Err(e) = self.audit.record(event, details).await {
            tracing::warn!(error = %e, event = ?event, "audit append failed");
        }
    }
}
