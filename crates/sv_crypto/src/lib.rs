//! sv_crypto - SecureVault cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all key material on drop.
//! - Ciphertext always carries its own nonce, so every value is independently
//!   decryptable and tamper-evident.
//!
//! # Module layout
//! - `kdf`       Argon2id master-password key derivation
//! - `envelope`  XChaCha20-Poly1305 string envelope with context-bound AAD
//! - `integrity` SHA-256 content digests for media payloads
//! - `error`     unified error type

pub mod envelope;
pub mod error;
pub mod integrity;
pub mod kdf;

pub use envelope::{Envelope, XChaChaEnvelope};
pub use error::CryptoError;
pub use kdf::{KdfParams, MasterKey};
