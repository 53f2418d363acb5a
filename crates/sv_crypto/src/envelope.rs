//! Field envelope: the encrypt/decrypt boundary for sensitive values.
//!
//! Cipher: XChaCha20-Poly1305, 24-byte random nonce per call, 16-byte tag.
//! Encoded form is URL-safe base64 (no padding) of `nonce || ciphertext+tag`,
//! so it can sit as a plain string inside JSON records.
//!
//! Every call names a context (`item:{id}:{field}`, `audit_log`, ...). The
//! context is authenticated as associated data, so a ciphertext moved to a
//! different field, item or key fails to decrypt.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::{derive_master_key, KdfParams, MasterKey, SALT_LEN};

pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;

/// Prefix of every associated-data string; bumps with the record format.
const AAD_DOMAIN: &str = "sv-v1";

/// Symmetric, authenticated string envelope.
///
/// Implementations must use a fresh nonce per call, must bind `context`
/// into the authentication tag, and must fail rather than return altered
/// plaintext.
pub trait Envelope: Send + Sync {
    fn encrypt(&self, plaintext: &[u8], context: &str) -> Result<String, CryptoError>;
    fn decrypt(&self, ciphertext: &str, context: &str)
        -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    fn encrypt_str(&self, plaintext: &str, context: &str) -> Result<String, CryptoError> {
        self.encrypt(plaintext.as_bytes(), context)
    }

    fn decrypt_string(&self, ciphertext: &str, context: &str) -> Result<String, CryptoError> {
        let bytes = self.decrypt(ciphertext, context)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CryptoError::MalformedCiphertext("plaintext is not UTF-8".into()))
    }
}

/// XChaCha20-Poly1305 envelope keyed by the master key.
pub struct XChaChaEnvelope {
    key: MasterKey,
}

impl XChaChaEnvelope {
    pub fn new(key: MasterKey) -> Self {
        Self { key }
    }

    /// Derive the key from the master password (Argon2id) and build the envelope.
    pub fn from_password(
        password: &[u8],
        salt: &[u8; SALT_LEN],
        params: &KdfParams,
    ) -> Result<Self, CryptoError> {
        Ok(Self::new(derive_master_key(password, salt, params)?))
    }

    fn cipher(&self) -> Result<XChaCha20Poly1305, CryptoError> {
        XChaCha20Poly1305::new_from_slice(self.key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }
}

impl std::fmt::Debug for XChaChaEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XChaChaEnvelope").finish_non_exhaustive()
    }
}

fn associated_data(context: &str) -> Vec<u8> {
    format!("{AAD_DOMAIN}|{context}").into_bytes()
}

impl Envelope for XChaChaEnvelope {
    fn encrypt(&self, plaintext: &[u8], context: &str) -> Result<String, CryptoError> {
        let aad = associated_data(context);
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher()?
            .encrypt(&nonce, Payload { msg: plaintext, aad: &aad })
            .map_err(|_| CryptoError::AeadEncrypt)?;

        let mut framed = Vec::with_capacity(NONCE_LEN + sealed.len());
        framed.extend_from_slice(nonce.as_slice());
        framed.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(framed))
    }

    fn decrypt(
        &self,
        ciphertext: &str,
        context: &str,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let framed = URL_SAFE_NO_PAD.decode(ciphertext)?;
        if framed.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedCiphertext(format!(
                "{} bytes is shorter than nonce and tag",
                framed.len()
            )));
        }
        let (nonce, sealed) = framed.split_at(NONCE_LEN);
        let aad = associated_data(context);
        self.cipher()?
            .decrypt(XNonce::from_slice(nonce), Payload { msg: sealed, aad: &aad })
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::AeadDecrypt)
    }
}
