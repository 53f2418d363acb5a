//! SHA-256 content digests.
//!
//! Media payloads are not encrypted inline; instead each record stores the
//! hex digest of its payload and every read re-verifies it.

use sha2::{Digest, Sha256};

pub const DIGEST_LEN: usize = 32;

/// Hex-encoded SHA-256 of `content`.
pub fn digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// True when `expected` is the hex digest of `content`.
///
/// Malformed digests never verify.
pub fn verify(content: &[u8], expected: &str) -> bool {
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };
    if expected.len() != DIGEST_LEN {
        return false;
    }
    let computed = Sha256::digest(content);
    constant_time_eq(computed.as_slice(), &expected)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_detects_single_byte_change() {
        let mut payload = vec![0xABu8; 4096];
        let hash = digest(&payload);
        assert!(verify(&payload, &hash));
        payload[2048] ^= 0xFF;
        assert!(!verify(&payload, &hash));
    }

    #[test]
    fn malformed_digest_never_verifies() {
        assert!(!verify(b"abc", "not-hex"));
        assert!(!verify(b"abc", "ba7816bf"));
        assert!(!verify(b"abc", ""));
    }
}
