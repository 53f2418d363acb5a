//! Key-value storage collaborator.
//!
//! Every component persists through this contract. Values are opaque
//! strings; sensitive content is already envelope-encrypted before it gets
//! here. Backends do not retry; retry policy belongs to the caller's
//! infrastructure.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{StoreError, StoreResult};

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// In-process backend. Used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryKv {
    data: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`delete` fail with `StoreError::Storage`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Storage("write rejected by backend".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.data.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.data.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_operations() {
        let kv = MemoryKv::new();
        assert!(kv.get("a").await.unwrap().is_none());
        kv.set("a", "1").await.unwrap();
        kv.set("a", "2").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("2"));
        kv.delete("a").await.unwrap();
        assert!(kv.get("a").await.unwrap().is_none());
        // deleting an absent key is not an error
        kv.delete("a").await.unwrap();
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn write_failures_surface_as_storage_errors() {
        let kv = MemoryKv::new();
        kv.set("k", "v").await.unwrap();
        kv.set_fail_writes(true);
        assert!(matches!(kv.set("k", "w").await, Err(StoreError::Storage(_))));
        assert!(matches!(kv.delete("k").await, Err(StoreError::Storage(_))));
        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
