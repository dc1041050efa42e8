//! SHA-256 content digests over encrypted blobs

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

pub fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Lowercase hex digest, the form recorded on the ledger.
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(digest(bytes))
}

/// Constant-time comparison against a hex digest. Malformed hex never matches.
pub fn verify(bytes: &[u8], expected_hex: &str) -> bool {
    let Ok(expected) = hex::decode(expected_hex.trim()) else {
        return false;
    };
    if expected.len() != 32 {
        return false;
    }
    digest(bytes).as_slice().ct_eq(expected.as_slice()).into()
}
