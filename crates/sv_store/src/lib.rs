//! sv_store - Encrypted item store for SecureVault
//!
//! # Storage strategy
//! Everything lives in a flat string key-value namespace behind
//! [`KeyValueStore`]:
//! - Item records are JSON. Sensitive variant fields (card numbers, secrets,
//!   note bodies) hold XChaCha20-Poly1305 ciphertext; names, tags and
//!   timestamps stay in plaintext so they can be listed without decrypting.
//! - Media payloads are stored beside the record and bound to it by a
//!   SHA-256 digest that is checked on every read.
//! - The audit log is a single encrypted blob capped at the newest events.
//! - The master key is derived from the user password via Argon2id and held
//!   in memory only while the store is open.
//!
//! # Backends
//! [`MemoryKv`] for tests and ephemeral use, [`SqliteKv`] for on-disk stores
//! (SQLx migrations in `migrations/` run on open).

pub mod audit;
pub mod config;
pub mod error;
pub mod item;
pub mod item_store;
pub mod keys;
pub mod kv;
pub mod sqlite;
pub mod unlock;
pub mod vault_index;

pub use audit::{AuditEvent, AuditEventType, AuditLog, EventSeverity};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use item::{Item, ItemKind, ItemPatch, ItemType, NewItem};
pub use item_store::ItemStore;
pub use kv::{KeyValueStore, MemoryKv};
pub use sqlite::SqliteKv;
pub use vault_index::{LockState, VaultIndex, VaultMetadata};
