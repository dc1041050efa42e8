//! Key-blob envelope: the JSON stored at `keyBlobAddress`.
//!
//! ```json
//! { "wrappedKey": { "scheme": "...", "ephemeralPublicKey": "...", "nonce": "...", "ciphertext": "..." },
//!   "metadata": { "mimeType": "video/mp4", "fileName": "clip.mp4", "size": 1048576 } }
//! ```
//! Older writers stored the bare wrapped-key object; that decodes as
//! [`KeyBlob::V1`].

use serde::{Deserialize, Serialize};
use tcap_core::ErrorKind;

use crate::wrap::WrappedKey;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("key blob serialization: {0}")]
    Serialize(String),

    #[error("malformed key blob: {0}")]
    Malformed(String),
}

impl EnvelopeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

/// Media description carried next to the wrapped key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A key blob decoded at the wire boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyBlob {
    /// Wrapped key only; media type must be sniffed.
    V1 { wrapped: WrappedKey },
    /// Wrapped key plus explicit media metadata.
    V2 {
        wrapped: WrappedKey,
        metadata: MediaMetadata,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    wrapped_key: WrappedKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<MediaMetadata>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnyEnvelope {
    Envelope(Envelope),
    Legacy(WrappedKey),
}

impl KeyBlob {
    pub fn new(wrapped: WrappedKey, metadata: Option<MediaMetadata>) -> Self {
        match metadata {
            Some(metadata) => KeyBlob::V2 { wrapped, metadata },
            None => KeyBlob::V1 { wrapped },
        }
    }

    pub fn wrapped(&self) -> &WrappedKey {
        match self {
            KeyBlob::V1 { wrapped } | KeyBlob::V2 { wrapped, .. } => wrapped,
        }
    }

    pub fn metadata(&self) -> Option<&MediaMetadata> {
        match self {
            KeyBlob::V1 { .. } => None,
            KeyBlob::V2 { metadata, .. } => Some(metadata),
        }
    }

    /// Always writes the enveloped form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        let envelope = Envelope {
            wrapped_key: self.wrapped().clone(),
            metadata: self.metadata().cloned(),
        };
        serde_json::to_vec(&envelope).map_err(|e| EnvelopeError::Serialize(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        let parsed: AnyEnvelope = serde_json::from_slice(data).map_err(|e| {
            EnvelopeError::Malformed(format!("neither an envelope nor a wrapped key: {e}"))
        })?;
        Ok(match parsed {
            AnyEnvelope::Envelope(env) => KeyBlob::new(env.wrapped_key, env.metadata),
            AnyEnvelope::Legacy(wrapped) => KeyBlob::V1 { wrapped },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrapped() -> WrappedKey {
        WrappedKey {
            scheme: "x25519-hkdf-sha256-xchacha20poly1305".into(),
            ephemeral_public_key: "AAAA".into(),
            nonce: "BBBB".into(),
            ciphertext: "CCCC".into(),
        }
    }

    #[test]
    fn test_v2_roundtrip() {
        let blob = KeyBlob::new(
            wrapped(),
            Some(MediaMetadata {
                mime_type: "video/webm".into(),
                file_name: Some("hello.webm".into()),
                size: Some(42),
            }),
        );
        let bytes = blob.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["metadata"]["mimeType"], "video/webm");
        assert_eq!(json["wrappedKey"]["nonce"], "BBBB");

        assert_eq!(KeyBlob::from_bytes(&bytes).unwrap(), blob);
    }

    #[test]
    fn test_v1_has_no_metadata_field() {
        let blob = KeyBlob::new(wrapped(), None);
        let bytes = blob.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.get("metadata").is_none());

        let parsed = KeyBlob::from_bytes(&bytes).unwrap();
        assert!(matches!(parsed, KeyBlob::V1 { .. }));
        assert!(parsed.metadata().is_none());
    }

    #[test]
    fn test_legacy_bare_wrapped_key() {
        let bytes = serde_json::to_vec(&wrapped()).unwrap();
        let parsed = KeyBlob::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, KeyBlob::V1 { wrapped: wrapped() });
    }

    #[test]
    fn test_metadata_optional_fields() {
        let json = br#"{"wrappedKey":{"scheme":"s","ephemeralPublicKey":"e","nonce":"n","ciphertext":"c"},
                        "metadata":{"mimeType":"audio/ogg"}}"#;
        let parsed = KeyBlob::from_bytes(json).unwrap();
        let meta = parsed.metadata().unwrap();
        assert_eq!(meta.mime_type, "audio/ogg");
        assert!(meta.file_name.is_none());
        assert!(meta.size.is_none());
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            KeyBlob::from_bytes(b"not json"),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(KeyBlob::from_bytes(br#"{"metadata":{"mimeType":"x"}}"#).is_err());
    }
}
