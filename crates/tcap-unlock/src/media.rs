//! Decrypted media: type detection and the revocable plaintext handle

use std::sync::{Arc, RwLock};
use tcap_crypto::MediaMetadata;
use zeroize::Zeroizing;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess a container type from leading bytes.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => "video/mp4",
        [0x1A, 0x45, 0xDF, 0xA3, ..] => "video/webm",
        [b'I', b'D', b'3', ..] => "audio/mpeg",
        [0xFF, 0xFB | 0xF3 | 0xF2, ..] => "audio/mpeg",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => "audio/wav",
        [b'O', b'g', b'g', b'S', ..] => "audio/ogg",
        _ => OCTET_STREAM,
    }
}

/// Explicit metadata wins; otherwise sniff.
pub fn resolve_mime(metadata: Option<&MediaMetadata>, bytes: &[u8]) -> String {
    match metadata {
        Some(meta) if !meta.mime_type.trim().is_empty() => meta.mime_type.clone(),
        _ => sniff_mime(bytes).to_string(),
    }
}

/// Shared access to decrypted plaintext until someone calls [`release`].
///
/// Clones share the same buffer; releasing through any clone zeroes the
/// plaintext and makes every clone empty.
///
/// [`release`]: MediaHandle::release
#[derive(Clone)]
pub struct MediaHandle {
    inner: Arc<RwLock<Option<Zeroizing<Vec<u8>>>>>,
}

impl MediaHandle {
    pub fn new(plaintext: Zeroizing<Vec<u8>>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(plaintext))),
        }
    }

    /// Run `f` over the plaintext. None once released.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        guard.as_deref().map(|bytes| f(bytes.as_slice()))
    }

    pub fn len(&self) -> Option<usize> {
        self.with_bytes(|b| b.len())
    }

    /// Zero and drop the plaintext. Returns false if it was already released.
    pub fn release(&self) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.take().is_some()
    }

    pub fn is_released(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

impl std::fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaHandle")
            .field("len", &self.len())
            .finish()
    }
}

/// Result of a successful unlock.
#[derive(Debug, Clone)]
pub struct UnlockedMedia {
    pub mime_type: String,
    pub metadata: Option<MediaMetadata>,
    pub handle: MediaHandle,
}
