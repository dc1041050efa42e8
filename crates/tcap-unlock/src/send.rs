//! Sender pipeline: encrypt, wrap, upload, record.

use std::sync::Arc;

use tcap_core::resilience::{resilient, with_timeout, AttemptError, ResilienceSettings};
use tcap_core::types::NewMessageRecord;
use tcap_crypto::{
    digest_hex, encrypt, generate_key, ContentKey, KeyBlob, KeyWrappingService, MediaMetadata,
    RecipientIdentity,
};
use tcap_storage::{BlobStore, ContentAddress, Ledger};
use tracing::info;
use zeroize::Zeroizing;

use crate::error::SendError;

/// A message ready to be time-locked.
pub struct OutgoingMessage {
    pub plaintext: Zeroizing<Vec<u8>>,
    /// Wallet encryption key of the recipient
    pub recipient: RecipientIdentity,
    /// Ledger account of the recipient
    pub recipient_account: String,
    pub sender: String,
    /// Unix ms; the unlock time is not checked against the clock
    pub unlock_at_ms: u64,
    /// When present the key blob is written with metadata (V2)
    pub metadata: Option<MediaMetadata>,
}

/// What the sender gets back after a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub id: u64,
    pub key_blob_address: ContentAddress,
    pub media_blob_address: ContentAddress,
    pub content_digest: String,
}

pub struct MessageSender {
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<dyn Ledger>,
    settings: ResilienceSettings,
}

impl MessageSender {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        ledger: Arc<dyn Ledger>,
        settings: ResilienceSettings,
    ) -> Self {
        Self {
            blobs,
            ledger,
            settings,
        }
    }

    /// Consumes the message; its plaintext is zeroed on return.
    pub async fn send(&self, message: OutgoingMessage) -> Result<SentMessage, SendError> {
        let mut key = generate_key();
        let result = self.send_with_key(&message, &key).await;
        key.erase();
        result
    }

    async fn send_with_key(
        &self,
        message: &OutgoingMessage,
        key: &ContentKey,
    ) -> Result<SentMessage, SendError> {
        let media = encrypt(&message.plaintext, key)
            .map_err(SendError::Encrypt)?
            .to_bytes();
        let wrapped = KeyWrappingService::wrap_content_key(key, &message.recipient)?;
        let key_blob = KeyBlob::new(wrapped, message.metadata.clone()).to_bytes()?;

        // Over the ciphertext exactly as stored
        let content_digest = digest_hex(&media);

        let key_blob_address = self.put("key blob", key_blob).await?;
        let media_blob_address = self.put("media blob", media).await?;

        let record = NewMessageRecord {
            key_blob_address: key_blob_address.to_string(),
            media_blob_address: media_blob_address.to_string(),
            content_digest: content_digest.clone(),
            unlock_timestamp: message.unlock_at_ms,
            sender: message.sender.clone(),
            recipient: message.recipient_account.clone(),
        };

        // Timeout only: a retried create could write the record twice
        let id = match with_timeout(
            "ledger create_record",
            self.settings.ledger_timeout,
            self.ledger.create_record(record),
        )
        .await
        {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return Err(SendError::Ledger(AttemptError::Failed(e))),
            Err(t) => return Err(SendError::Ledger(AttemptError::TimedOut(t))),
        };

        info!(
            id,
            key_blob = %key_blob_address,
            media_blob = %media_blob_address,
            unlock_at_ms = message.unlock_at_ms,
            "message sent"
        );

        Ok(SentMessage {
            id,
            key_blob_address,
            media_blob_address,
            content_digest,
        })
    }

    async fn put(&self, what: &'static str, bytes: Vec<u8>) -> Result<ContentAddress, SendError> {
        let blobs = &self.blobs;
        let bytes = &bytes;
        resilient(
            what,
            self.settings.blob_timeout,
            &self.settings.retry,
            || blobs.put(bytes.clone()),
        )
        .await
        .map_err(|source| SendError::Upload { what, source })
    }
}
