//! Master-password key derivation (Argon2id).
//!
//! The derived 32-byte key encrypts every sensitive field and the audit log.
//! The salt is not secret and is stored next to the data it protects.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub time_cost: u32,
    /// Lanes.
    pub parallelism: u32,
}

impl Default for KdfParams {
    /// Tuned for interactive unlock on a phone-class device.
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            time_cost: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    fn to_argon2(self) -> Result<Params, CryptoError> {
        Params::new(
            self.memory_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
    }
}

/// 32-byte key derived from the master password. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Derive the master key from a password and salt.
pub fn derive_master_key(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<MasterKey, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::KeyDerivation("empty password".into()));
    }
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.to_argon2()?);
    let mut output = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password, salt, &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(MasterKey(output))
}

/// Generate a fresh random salt (call once per store; persist it).
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            memory_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn derivation_is_deterministic_per_salt() {
        let salt = [7u8; SALT_LEN];
        let a = derive_master_key(b"hunter2", &salt, &fast()).unwrap();
        let b = derive_master_key(b"hunter2", &salt, &fast()).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());

        let other = derive_master_key(b"hunter2", &generate_salt(), &fast()).unwrap();
        assert_ne!(a.as_bytes(), other.as_bytes());
    }

    #[test]
    fn empty_password_rejected() {
        assert!(derive_master_key(b"", &[0u8; SALT_LEN], &fast()).is_err());
    }

    #[test]
    fn invalid_params_rejected() {
        let params = KdfParams {
            memory_kib: 1,
            time_cost: 0,
            parallelism: 1,
        };
        assert!(matches!(
            derive_master_key(b"pw", &[0u8; SALT_LEN], &params),
            Err(CryptoError::KeyDerivation(_))
        ));
    }

    #[test]
    fn debug_redacts_key() {
        let key = MasterKey::from_bytes([9u8; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "MasterKey(<redacted>)");
    }
}
