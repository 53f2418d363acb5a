//! Storage key layout. Every component shares one flat key space.

pub const AUDIT_LOG_KEY: &str = "audit_log";
pub const VAULT_REGISTRY_KEY: &str = "vaults";
pub const KDF_SALT_KEY: &str = "meta:kdf_salt";
pub const KEY_CHECK_KEY: &str = "meta:key_check";

pub fn item_key(item_id: &str) -> String {
    format!("item:{item_id}")
}

/// Media payloads are addressed by content digest, so a new payload never
/// overwrites the one the committed record still points at.
pub fn blob_key(item_id: &str, hash: &str) -> String {
    format!("blob:{item_id}:{hash}")
}

pub fn vault_key(vault_id: &str) -> String {
    format!("vault:{vault_id}")
}

/// Associated-data context of one sensitive field of one item.
pub fn field_context(item_id: &str, field: &str) -> String {
    format!("item:{item_id}:{field}")
}
