//! Content encryption: AES-256-GCM with a fresh random IV per call

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use tcap_core::ErrorKind;
use zeroize::{Zeroize, Zeroizing};

use crate::{ERASE_RANDOM_PASS_LIMIT, IV_SIZE, KEY_SIZE, TAG_SIZE};

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("encryption failed")]
    EncryptionFailed,

    /// The tag did not verify: wrong key, or the blob was modified.
    #[error("authentication tag mismatch")]
    AuthTagMismatch,

    #[error("malformed encrypted blob: {len} bytes (expected at least {})", IV_SIZE + TAG_SIZE)]
    MalformedBlob { len: usize },
}

impl CipherError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CipherError::AuthTagMismatch => ErrorKind::Integrity,
            CipherError::EncryptionFailed | CipherError::MalformedBlob { .. } => {
                ErrorKind::Configuration
            }
        }
    }
}

/// A per-message 256-bit content key. Zeroized on drop.
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// None unless `bytes` is exactly [`KEY_SIZE`] long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Overwrite the key in place; the value is unusable afterwards.
    pub fn erase(&mut self) {
        secure_erase([self.bytes.as_mut_slice()]);
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypted media: a 12-byte IV followed by ciphertext with the GCM tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedBlob {
    pub iv: [u8; IV_SIZE],
    /// ciphertext || 16-byte tag
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    /// Wire layout: `[12-byte IV][ciphertext + tag]`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IV_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CipherError> {
        if data.len() < IV_SIZE + TAG_SIZE {
            return Err(CipherError::MalformedBlob { len: data.len() });
        }
        let (iv, ciphertext) = data.split_at(IV_SIZE);
        let mut iv_bytes = [0u8; IV_SIZE];
        iv_bytes.copy_from_slice(iv);
        Ok(Self {
            iv: iv_bytes,
            ciphertext: ciphertext.to_vec(),
        })
    }

    pub fn erase(&mut self) {
        secure_erase([self.iv.as_mut_slice(), self.ciphertext.as_mut_slice()]);
    }
}

/// Generate a random 256-bit content key.
pub fn generate_key() -> ContentKey {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    ContentKey::from_bytes(bytes)
}

pub fn encrypt(plaintext: &[u8], key: &ContentKey) -> Result<EncryptedBlob, CipherError> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CipherError::EncryptionFailed)?;

    Ok(EncryptedBlob { iv, ciphertext })
}

/// Decrypt and authenticate. No plaintext is returned unless the tag verifies.
pub fn decrypt(blob: &EncryptedBlob, key: &ContentKey) -> Result<Zeroizing<Vec<u8>>, CipherError> {
    if blob.ciphertext.len() < TAG_SIZE {
        return Err(CipherError::MalformedBlob {
            len: IV_SIZE + blob.ciphertext.len(),
        });
    }
    let cipher = Aes256Gcm::new(key.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(&blob.iv), blob.ciphertext.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| CipherError::AuthTagMismatch)
}

/// Best-effort wipe of sensitive buffers: random overwrite, then zero.
///
/// Buffers larger than [`ERASE_RANDOM_PASS_LIMIT`] are only zeroed. Never
/// fails; an RNG error is logged and the zero pass still runs.
pub fn secure_erase<'a>(buffers: impl IntoIterator<Item = &'a mut [u8]>) {
    for buf in buffers {
        if !buf.is_empty() && buf.len() <= ERASE_RANDOM_PASS_LIMIT {
            if let Err(e) = OsRng.try_fill_bytes(buf) {
                tracing::warn!(len = buf.len(), error = %e, "random overwrite failed, zeroing only");
            }
        }
        buf.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_key();
        let plaintext = b"ten bytes!";

        let blob = encrypt(plaintext, &key).unwrap();
        let decrypted = decrypt(&blob, &key).unwrap();

        assert_eq!(decrypted.as_slice(), plaintext);
    }

    #[test]
    fn test_fresh_iv_per_call() {
        let key = generate_key();
        let b1 = encrypt(b"same", &key).unwrap();
        let b2 = encrypt(b"same", &key).unwrap();
        assert_ne!(b1.iv, b2.iv, "IVs must not repeat");
        assert_ne!(b1.ciphertext, b2.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = encrypt(b"secret", &generate_key()).unwrap();
        let result = decrypt(&blob, &generate_key());
        assert!(matches!(result, Err(CipherError::AuthTagMismatch)));
    }

    #[test]
    fn test_wire_layout() {
        let key = generate_key();
        let blob = encrypt(b"hello", &key).unwrap();
        let bytes = blob.to_bytes();

        // iv (12) + plaintext (5) + tag (16)
        assert_eq!(bytes.len(), IV_SIZE + 5 + TAG_SIZE);
        assert_eq!(&bytes[..IV_SIZE], &blob.iv);

        let parsed = EncryptedBlob::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, blob);
    }

    #[test]
    fn test_truncated_blob_rejected() {
        let err = EncryptedBlob::from_bytes(&[0u8; IV_SIZE + TAG_SIZE - 1]).unwrap_err();
        assert!(matches!(err, CipherError::MalformedBlob { len: 27 }));
    }

    #[test]
    fn test_empty_plaintext() {
        let key = generate_key();
        let blob = encrypt(b"", &key).unwrap();
        assert_eq!(blob.ciphertext.len(), TAG_SIZE);
        assert!(decrypt(&blob, &key).unwrap().is_empty());
    }

    #[test]
    fn test_secure_erase_zeroes_small_and_large() {
        let mut small = vec![0xAAu8; 32];
        let mut large = vec![0xBBu8; ERASE_RANDOM_PASS_LIMIT + 1];
        secure_erase([small.as_mut_slice(), large.as_mut_slice()]);
        assert!(small.iter().all(|&b| b == 0));
        assert!(large.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_content_key_erase_and_from_slice() {
        let mut key = ContentKey::from_bytes([7u8; KEY_SIZE]);
        key.erase();
        assert_eq!(key.as_bytes(), &[0u8; KEY_SIZE]);

        assert!(ContentKey::from_slice(&[1u8; 31]).is_none());
        assert!(ContentKey::from_slice(&[1u8; 32]).is_some());
    }

    #[test]
    fn test_content_key_debug_redacted() {
        let key = ContentKey::from_bytes([9u8; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains('9'));
    }

    proptest! {
        #[test]
        fn roundtrip_any_plaintext(data in proptest::collection::vec(any::<u8>(), 0..=2048)) {
            let key = generate_key();
            let blob = encrypt(&data, &key).unwrap();
            let back = decrypt(&blob, &key).unwrap();
            prop_assert_eq!(back.as_slice(), data.as_slice());
        }

        #[test]
        fn single_byte_tamper_fails(
            data in proptest::collection::vec(any::<u8>(), 1..=256),
            pos in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let key = generate_key();
            let mut bytes = encrypt(&data, &key).unwrap().to_bytes();
            let i = pos.index(bytes.len());
            bytes[i] ^= flip;

            let tampered = EncryptedBlob::from_bytes(&bytes).unwrap();
            prop_assert!(matches!(decrypt(&tampered, &key), Err(CipherError::AuthTagMismatch)));
        }
    }
}
