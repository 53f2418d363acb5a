use serde::{Deserialize, Serialize};
use std::path::Path;
use sv_crypto::KdfParams;

use crate::error::{StoreError, StoreResult};

pub const DEFAULT_AUDIT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Number of most recent audit events retained.
    #[serde(default = "default_audit_capacity")]
    pub audit_capacity: usize,
    /// Reject item access inside locked vaults.
    #[serde(default = "default_enforce_vault_lock")]
    pub enforce_vault_lock: bool,
    #[serde(default)]
    pub kdf: KdfParams,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            enforce_vault_lock: true,
            kdf: KdfParams::default(),
        }
    }
}

impl StoreConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = std::fs::read(path)
            .map_err(|e| StoreError::Storage(format!("read config {}: {e}", path.display())))?;
        let config: StoreConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.audit_capacity == 0 {
            return Err(StoreError::Validation(
                "audit_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_audit_capacity() -> usize {
    DEFAULT_AUDIT_CAPACITY
}

fn default_enforce_vault_lock() -> bool {
    true
}
