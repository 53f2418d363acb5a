//! Master-password unlock.
//!
//! The Argon2id salt is stored in plaintext under `meta:kdf_salt`. On first
//! unlock a fixed marker is encrypted under `meta:key_check`; later unlocks
//! must decrypt it, so a wrong password is rejected up front instead of
//! surfacing as decryption failures on every item.

use sv_crypto::kdf::{generate_salt, SALT_LEN};
use sv_crypto::{Envelope, KdfParams, XChaChaEnvelope};

use crate::error::{StoreError, StoreResult};
use crate::keys::{KDF_SALT_KEY, KEY_CHECK_KEY};
use crate::kv::KeyValueStore;

const KEY_CHECK_MARKER: &[u8] = b"sv-key-check-v1";

/// Derive the store envelope from the master password, initialising the
/// salt and key check on first use.
pub async fn open_envelope(
    kv: &dyn KeyValueStore,
    password: &str,
    params: &KdfParams,
) -> StoreResult<XChaChaEnvelope> {
    let salt = match kv.get(KDF_SALT_KEY).await? {
        Some(hex_salt) => decode_salt(&hex_salt)?,
        None => {
            let salt = generate_salt();
            kv.set(KDF_SALT_KEY, &hex::encode(salt)).await?;
            tracing::info!("initialised new store salt");
            salt
        }
    };

    let envelope = XChaChaEnvelope::from_password(password.as_bytes(), &salt, params)
        .map_err(StoreError::KeyDerivation)?;

    match kv.get(KEY_CHECK_KEY).await? {
        Some(check) => {
            let marker = envelope
                .decrypt(&check, KEY_CHECK_KEY)
                .map_err(|_| StoreError::InvalidPassword)?;
            if marker.as_slice() != KEY_CHECK_MARKER {
                return Err(StoreError::InvalidPassword);
            }
        }
        None => {
            let check = envelope
                .encrypt(KEY_CHECK_MARKER, KEY_CHECK_KEY)
                .map_err(StoreError::Encryption)?;
            kv.set(KEY_CHECK_KEY, &check).await?;
        }
    }
    Ok(envelope)
}

fn decode_salt(hex_salt: &str) -> StoreResult<[u8; SALT_LEN]> {
    let bytes = hex::decode(hex_salt)
        .map_err(|e| StoreError::Storage(format!("stored salt is not hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| StoreError::Storage("stored salt has the wrong length".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    fn fast() -> KdfParams {
        KdfParams {
            memory_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[tokio::test]
    async fn same_password_reopens() {
        let kv = MemoryKv::new();
        let first = open_envelope(&kv, "correct horse", &fast()).await.unwrap();
        let ct = first.encrypt(b"value", "ctx").unwrap();

        let second = open_envelope(&kv, "correct horse", &fast()).await.unwrap();
        assert_eq!(second.decrypt(&ct, "ctx").unwrap().as_slice(), b"value");
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let kv = MemoryKv::new();
        open_envelope(&kv, "pw1", &fast()).await.unwrap();
        assert!(matches!(
            open_envelope(&kv, "pw2", &fast()).await,
            Err(StoreError::InvalidPassword)
        ));
    }

    #[tokio::test]
    async fn empty_password_fails_derivation() {
        let kv = MemoryKv::new();
        assert!(matches!(
            open_envelope(&kv, "", &fast()).await,
            Err(StoreError::KeyDerivation(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_salt_is_a_storage_error() {
        let kv = MemoryKv::new();
        kv.set(KDF_SALT_KEY, "zz").await.unwrap();
        assert!(matches!(
            open_envelope(&kv, "pw", &fast()).await,
            Err(StoreError::Storage(_))
        ));
    }
}
