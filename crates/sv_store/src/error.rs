use sv_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Encryption failed: {0}")]
    Encryption(#[source] CryptoError),

    #[error("Decryption failed: {0}")]
    Decryption(#[source] CryptoError),

    #[error("Integrity violation: content of item {0} does not match its stored digest")]
    IntegrityViolation(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Vault not found: {0}")]
    VaultNotFound(String),

    #[error("Vault {0} is locked")]
    VaultLocked(String),

    #[error("Conflicting update on item {item_id}: expected version {expected}, found {found}")]
    Conflict {
        item_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Master password does not unlock this store")]
    InvalidPassword,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(#[source] CryptoError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

impl StoreError {
    /// Errors that indicate tampering or corruption rather than user error.
    /// Callers should surface these as security alerts.
    pub fn is_security_alert(&self) -> bool {
        matches!(
            self,
            StoreError::IntegrityViolation(_) | StoreError::Decryption(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_alert_classification() {
        assert!(StoreError::IntegrityViolation("x".into()).is_security_alert());
        assert!(StoreError::Decryption(CryptoError::AeadDecrypt).is_security_alert());
        assert!(!StoreError::ItemNotFound("x".into()).is_security_alert());
        assert!(!StoreError::Validation("name".into()).is_security_alert());
    }
}
