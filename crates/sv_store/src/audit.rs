//! Encrypted, capacity-capped security audit log.
//!
//! The whole log lives under one storage key as envelope ciphertext of a JSON
//! array (oldest first). Appends are read-append-write under an async mutex.
//! A log that cannot be decrypted or parsed is discarded: the primary
//! operation must never fail because the trail is unreadable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use sv_crypto::Envelope;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::DEFAULT_AUDIT_CAPACITY;
use crate::error::{StoreError, StoreResult};
use crate::keys::AUDIT_LOG_KEY;
use crate::kv::KeyValueStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warn,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    VaultCreated,
    VaultDeleted,
    VaultLocked,
    VaultUnlocked,
    ItemAdded,
    ItemUpdated,
    ItemDeleted,
    IntegrityViolation,
    DecryptionFailed,
    LogCleared,
}

impl AuditEventType {
    pub fn severity(self) -> EventSeverity {
        match self {
            AuditEventType::IntegrityViolation | AuditEventType::DecryptionFailed => {
                EventSeverity::Critical
            }
            AuditEventType::VaultDeleted
            | AuditEventType::ItemDeleted
            | AuditEventType::LogCleared => EventSeverity::Warn,
            AuditEventType::VaultCreated
            | AuditEventType::VaultLocked
            | AuditEventType::VaultUnlocked
            | AuditEventType::ItemAdded
            | AuditEventType::ItemUpdated => EventSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub severity: EventSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: serde_json::Value,
}

pub struct AuditLog {
    kv: Arc<dyn KeyValueStore>,
    envelope: Arc<dyn Envelope>,
    capacity: usize,
    lock: Mutex<()>,
    corruption_resets: AtomicU64,
}

impl AuditLog {
    pub fn new(kv: Arc<dyn KeyValueStore>, envelope: Arc<dyn Envelope>) -> Self {
        Self::with_capacity(kv, envelope, DEFAULT_AUDIT_CAPACITY)
    }

    pub fn with_capacity(
        kv: Arc<dyn KeyValueStore>,
        envelope: Arc<dyn Envelope>,
        capacity: usize,
    ) -> Self {
        Self {
            kv,
            envelope,
            capacity: capacity.max(1),
            lock: Mutex::new(()),
            corruption_resets: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// How many times an unreadable log has been discarded since start-up.
    pub fn corruption_resets(&self) -> u64 {
        self.corruption_resets.load(Ordering::Relaxed)
    }

    /// Append an event; evicts the oldest entries beyond capacity.
    pub async fn append(
        &self,
        event_type: AuditEventType,
        details: serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<AuditEvent> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        let event = new_event(event_type, details, timestamp);
        events.push(event.clone());
        if events.len() > self.capacity {
            let excess = events.len() - self.capacity;
            events.drain(..excess);
        }
        self.persist(&events).await?;
        tracing::debug!(event = ?event_type, retained = events.len(), "audit event appended");
        Ok(event)
    }

    /// Append with the current time.
    pub async fn record(
        &self,
        event_type: AuditEventType,
        details: serde_json::Value,
    ) -> StoreResult<AuditEvent> {
        self.append(event_type, details, Utc::now()).await
    }

    /// Retained events, newest first.
    pub async fn list(&self) -> StoreResult<Vec<AuditEvent>> {
        let _guard = self.lock.lock().await;
        let mut events = self.load().await?;
        events.reverse();
        Ok(events)
    }

    /// Drop every retained event.
    pub async fn clear(&self) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        self.kv.delete(AUDIT_LOG_KEY).await?;
        tracing::info!("audit log cleared");
        Ok(())
    }

    /// Replace the whole log with a single `log_cleared` marker so the wipe
    /// itself stays on record. One write under the log lock: no concurrent
    /// append can land between the wipe and the marker.
    pub async fn clear_with_marker(&self, details: serde_json::Value) -> StoreResult<AuditEvent> {
        let _guard = self.lock.lock().await;
        let marker = new_event(AuditEventType::LogCleared, details, Utc::now());
        self.persist(std::slice::from_ref(&marker)).await?;
        tracing::info!("audit log cleared");
        Ok(marker)
    }

    /// Oldest-first events. Storage errors propagate; unreadable content
    /// resets the log.
    async fn load(&self) -> StoreResult<Vec<AuditEvent>> {
        let Some(ciphertext) = self.kv.get(AUDIT_LOG_KEY).await? else {
            return Ok(Vec::new());
        };
        match self.decode(&ciphertext) {
            Ok(events) => Ok(events),
            Err(err) => {
                self.corruption_resets.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    target: "sv_store::audit",
                    error = %err,
                    "audit log unreadable; discarding it and starting empty"
                );
                if let Err(e) = self.kv.delete(AUDIT_LOG_KEY).await {
                    tracing::warn!(target: "sv_store::audit", error = %e, "failed to remove corrupt audit log");
                }
                Ok(Vec::new())
            }
        }
    }

    fn decode(&self, ciphertext: &str) -> StoreResult<Vec<AuditEvent>> {
        let plaintext = self
            .envelope
            .decrypt(ciphertext, AUDIT_LOG_KEY)
            .map_err(StoreError::Decryption)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    async fn persist(&self, events: &[AuditEvent]) -> StoreResult<()> {
        let plaintext = serde_json::to_vec(events)?;
        let ciphertext = self
            .envelope
            .encrypt(&plaintext, AUDIT_LOG_KEY)
            .map_err(StoreError::Encryption)?;
        self.kv.set(AUDIT_LOG_KEY, &ciphertext).await
    }
}

fn new_event(
    event_type: AuditEventType,
    details: serde_json::Value,
    timestamp: DateTime<Utc>,
) -> AuditEvent {
    AuditEvent {
        id: Uuid::new_v4(),
        event_type,
        severity: event_type.severity(),
        timestamp,
        details,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use serde_json::json;
    use sv_crypto::{MasterKey, XChaChaEnvelope};

    fn log_with(kv: Arc<MemoryKv>, capacity: usize) -> AuditLog {
        let envelope = Arc::new(XChaChaEnvelope::new(MasterKey::from_bytes([5u8; 32])));
        AuditLog::with_capacity(kv, envelope, capacity)
    }

    #[tokio::test]
    async fn cap_keeps_newest_first() {
        let kv = Arc::new(MemoryKv::new());
        let log = log_with(kv, 100);
        let start = Utc::now();
        for i in 0..150 {
            log.append(
                AuditEventType::ItemAdded,
                json!({ "i": i }),
                start + chrono::Duration::milliseconds(i),
            )
            .await
            .unwrap();
        }
        let events = log.list().await.unwrap();
        assert_eq!(events.len(), 100);
        assert_eq!(events[0].details["i"], 149);
        assert_eq!(events[99].details["i"], 50);
        assert!(events.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
    }

    #[tokio::test]
    async fn stored_log_is_encrypted() {
        let kv = Arc::new(MemoryKv::new());
        let log = log_with(kv.clone(), 10);
        log.record(AuditEventType::VaultCreated, json!({ "name": "Family Photos" }))
            .await
            .unwrap();
        let raw = kv.get(AUDIT_LOG_KEY).await.unwrap().unwrap();
        assert!(!raw.contains("Family Photos"));
        assert!(!raw.contains("vault_created"));
    }

    #[tokio::test]
    async fn corrupt_log_resets_instead_of_failing() {
        let kv = Arc::new(MemoryKv::new());
        let log = log_with(kv.clone(), 10);
        log.record(AuditEventType::ItemAdded, json!({})).await.unwrap();

        kv.set(AUDIT_LOG_KEY, "garbage!!").await.unwrap();
        assert!(log.list().await.unwrap().is_empty());
        assert_eq!(log.corruption_resets(), 1);

        log.record(AuditEventType::ItemDeleted, json!({})).await.unwrap();
        let events = log.list().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::ItemDeleted);
        assert_eq!(events[0].severity, EventSeverity::Warn);
    }

    #[tokio::test]
    async fn log_written_under_other_key_is_discarded() {
        let kv = Arc::new(MemoryKv::new());
        let other = log_with(kv.clone(), 10);
        other.record(AuditEventType::ItemAdded, json!({})).await.unwrap();

        let envelope = Arc::new(XChaChaEnvelope::new(MasterKey::from_bytes([6u8; 32])));
        let log = AuditLog::with_capacity(kv, envelope, 10);
        assert!(log.list().await.unwrap().is_empty());
        assert_eq!(log.corruption_resets(), 1);
    }

    #[tokio::test]
    async fn clear_empties_log() {
        let kv = Arc::new(MemoryKv::new());
        let log = log_with(kv.clone(), 10);
        log.record(AuditEventType::ItemAdded, json!({})).await.unwrap();
        log.clear().await.unwrap();
        assert!(log.list().await.unwrap().is_empty());
        assert!(kv.get(AUDIT_LOG_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_with_marker_keeps_one_event() {
        let kv = Arc::new(MemoryKv::new());
        let log = log_with(kv, 10);
        for _ in 0..3 {
            log.record(AuditEventType::ItemAdded, json!({})).await.unwrap();
        }
        log.clear_with_marker(json!({ "source": "test" })).await.unwrap();
        let events = log.list().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::LogCleared);
        assert_eq!(events[0].severity, EventSeverity::Warn);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn marker_is_oldest_event_under_concurrent_appends() {
        let kv = Arc::new(MemoryKv::new());
        let log = Arc::new(log_with(kv, 100));
        for _ in 0..5 {
            log.record(AuditEventType::ItemAdded, json!({})).await.unwrap();
        }

        let appenders: Vec<_> = (0..20)
            .map(|i| {
                let log = log.clone();
                tokio::spawn(async move {
                    log.record(AuditEventType::ItemUpdated, json!({ "i": i }))
                        .await
                        .unwrap();
                })
            })
            .collect();
        log.clear_with_marker(json!({ "source": "test" })).await.unwrap();
        for handle in appenders {
            handle.await.unwrap();
        }

        let events = log.list().await.unwrap();
        let oldest = events.last().unwrap();
        assert_eq!(oldest.event_type, AuditEventType::LogCleared);
        assert_eq!(
            events
                .iter()
                .filter(|e| e.event_type == AuditEventType::LogCleared)
                .count(),
            1
        );
        assert!(events
            .iter()
            .all(|e| e.event_type != AuditEventType::ItemAdded));
    }

    #[tokio::test]
    async fn storage_failures_propagate() {
        let kv = Arc::new(MemoryKv::new());
        let log = log_with(kv.clone(), 10);
        kv.set_fail_writes(true);
        assert!(matches!(
            log.record(AuditEventType::ItemAdded, json!({})).await,
            Err(StoreError::Storage(_))
        ));
    }
}
