//! Recipient-side unlock pipeline.
//!
//! ```text
//! Idle → VerifyingTimestamp → FetchingKeyBlob → UnwrappingKey
//!      → FetchingMediaBlob → VerifyingIntegrity → Decrypting → Ready
//!                    (any non-terminal stage) → Failed
//! ```
//! The timestamp check runs before any collaborator is touched, and the
//! content digest is checked before the decryptor sees a byte. Blob fetches
//! and ledger reads go through the resilience layer; the wallet unwrap does
//! not, since a user who rejected the request should not be asked again.

use std::future::Future;
use std::sync::Arc;

use tcap_core::resilience::{resilient, ResilienceSettings};
use tcap_core::types::{Clock, MessageRecord, MessageStatus};
use tcap_crypto::{
    cipher, digest_hex, secure_erase, verify, ContentKey, EncryptedBlob, KeyBlob,
    KeyWrappingService, Wallet,
};
use tcap_storage::{BlobStore, Ledger};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{take_corrupt_blob, UnlockError};
use crate::media::{resolve_mime, MediaHandle, UnlockedMedia};
use crate::stage::{StageObserver, UnlockStage};

/// Emits transitions to the observer and remembers the current stage.
struct Progress<'a> {
    observer: &'a dyn StageObserver,
    stage: UnlockStage,
    message_id: u64,
}

impl<'a> Progress<'a> {
    fn new(observer: &'a dyn StageObserver, message_id: u64) -> Self {
        Self {
            observer,
            stage: UnlockStage::Idle,
            message_id,
        }
    }

    fn enter(&mut self, stage: UnlockStage) {
        debug_assert!(!self.stage.is_terminal(), "transition out of {}", self.stage);
        self.stage = stage;
        let percent = stage.percent();
        info!(message_id = self.message_id, stage = %stage, percent, "unlock stage");
        self.observer.on_stage_change(stage, percent);
    }

    fn fail(&mut self, err: &UnlockError) {
        let percent = self.stage.percent();
        warn!(
            message_id = self.message_id,
            stage = %self.stage,
            kind = ?err.kind(),
            error = %err,
            "unlock failed"
        );
        self.stage = UnlockStage::Failed;
        self.observer.on_stage_change(UnlockStage::Failed, percent);
    }
}

/// Race `fut` against cancellation. Dropping `fut` abandons the call.
async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    stage: UnlockStage,
    fut: F,
) -> Result<F::Output, UnlockError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UnlockError::Cancelled { stage }),
        out = fut => Ok(out),
    }
}

/// Drives a message from ledger record to playable plaintext.
///
/// Holds no per-unlock state; concurrent unlocks on one orchestrator are
/// independent.
pub struct UnlockOrchestrator {
    blobs: Arc<dyn BlobStore>,
    ledger: Arc<dyn Ledger>,
    keys: KeyWrappingService,
    clock: Arc<dyn Clock>,
    settings: ResilienceSettings,
}

impl UnlockOrchestrator {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        ledger: Arc<dyn Ledger>,
        wallet: Arc<dyn Wallet>,
        clock: Arc<dyn Clock>,
        settings: ResilienceSettings,
    ) -> Self {
        Self {
            blobs,
            ledger,
            keys: KeyWrappingService::new(wallet),
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ResilienceSettings {
        &self.settings
    }

    pub async fn unlock(
        &self,
        record: &MessageRecord,
        observer: &dyn StageObserver,
    ) -> Result<UnlockedMedia, UnlockError> {
        self.unlock_with_cancel(record, observer, &CancellationToken::new())
            .await
    }

    /// Like [`unlock`](Self::unlock), but every suspension point also waits
    /// on `cancel`. A cancelled run erases any key it already holds.
    pub async fn unlock_with_cancel(
        &self,
        record: &MessageRecord,
        observer: &dyn StageObserver,
        cancel: &CancellationToken,
    ) -> Result<UnlockedMedia, UnlockError> {
        let mut progress = Progress::new(observer, record.id);
        let result = self.run(record, &mut progress, cancel).await;
        if let Err(ref e) = result {
            progress.fail(e);
        }
        result
    }

    /// Look the record up on the ledger, then unlock it.
    pub async fn unlock_message(
        &self,
        id: u64,
        observer: &dyn StageObserver,
        cancel: &CancellationToken,
    ) -> Result<UnlockedMedia, UnlockError> {
        let record = match self.fetch_record(id, cancel).await {
            Ok(record) => record,
            Err(e) => {
                Progress::new(observer, id).fail(&e);
                return Err(e);
            }
        };
        self.unlock_with_cancel(&record, observer, cancel).await
    }

    /// Records addressed to `recipient`, soonest unlock first, with status.
    ///
    /// `viewed` reports whether the UI has already shown a message.
    pub async fn inbox(
        &self,
        recipient: &str,
        viewed: impl Fn(u64) -> bool,
    ) -> Result<Vec<(MessageRecord, MessageStatus)>, UnlockError> {
        let ledger = &self.ledger;
        let records = resilient(
            "ledger get_records_by_recipient",
            self.settings.ledger_timeout,
            &self.settings.retry,
            || ledger.get_records_by_recipient(recipient),
        )
        .await
        .map_err(UnlockError::RecordLookup)?;
        Ok(self.with_status(records, viewed))
    }

    /// Records sent by `sender`, soonest unlock first, with status.
    pub async fn outbox(
        &self,
        sender: &str,
        viewed: impl Fn(u64) -> bool,
    ) -> Result<Vec<(MessageRecord, MessageStatus)>, UnlockError> {
        let ledger = &self.ledger;
        let records = resilient(
            "ledger get_records_by_sender",
            self.settings.ledger_timeout,
            &self.settings.retry,
            || ledger.get_records_by_sender(sender),
        )
        .await
        .map_err(UnlockError::RecordLookup)?;
        Ok(self.with_status(records, viewed))
    }

    fn with_status(
        &self,
        mut records: Vec<MessageRecord>,
        viewed: impl Fn(u64) -> bool,
    ) -> Vec<(MessageRecord, MessageStatus)> {
        let now = self.clock.now_ms();
        records.sort_by_key(|r| (r.unlock_timestamp, r.id));
        records
            .into_iter()
            .map(|r| {
                let status = r.status(now, viewed(r.id));
                (r, status)
            })
            .collect()
    }

    async fn fetch_record(
        &self,
        id: u64,
        cancel: &CancellationToken,
    ) -> Result<MessageRecord, UnlockError> {
        let ledger = &self.ledger;
        let lookup = resilient(
            "ledger get_record",
            self.settings.ledger_timeout,
            &self.settings.retry,
            || ledger.get_record(id),
        );
        cancellable(cancel, UnlockStage::Idle, lookup)
            .await?
            .map_err(UnlockError::RecordLookup)
    }

    async fn fetch_blob(
        &self,
        stage: UnlockStage,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, UnlockError> {
        let label = match stage {
            UnlockStage::FetchingKeyBlob => "blob get (key)",
            _ => "blob get (media)",
        };
        let blobs = &self.blobs;
        let fetch = resilient(
            label,
            self.settings.blob_timeout,
            &self.settings.retry,
            || blobs.get(address),
        );
        cancellable(cancel, stage, fetch)
            .await?
            .map_err(|source| UnlockError::Fetch { stage, source })
    }

    async fn run(
        &self,
        record: &MessageRecord,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<UnlockedMedia, UnlockError> {
        progress.enter(UnlockStage::VerifyingTimestamp);
        let now = self.clock.now_ms();
        if !record.is_unlocked_at(now) {
            return Err(UnlockError::StillLocked {
                remaining_ms: record.remaining_ms(now),
                unlock_at_ms: record.unlock_timestamp,
            });
        }
        if cancel.is_cancelled() {
            return Err(UnlockError::Cancelled {
                stage: UnlockStage::VerifyingTimestamp,
            });
        }

        progress.enter(UnlockStage::FetchingKeyBlob);
        let key_blob_bytes = self
            .fetch_blob(UnlockStage::FetchingKeyBlob, &record.key_blob_address, cancel)
            .await?;
        let key_blob = KeyBlob::from_bytes(&key_blob_bytes)?;

        progress.enter(UnlockStage::UnwrappingKey);
        let unwrap = self.keys.unwrap_content_key(key_blob.wrapped());
        let mut key = cancellable(cancel, UnlockStage::UnwrappingKey, unwrap).await??;

        let result = self
            .open_media(record, &key_blob, &key, progress, cancel)
            .await;
        key.erase();
        result
    }

    /// Everything after the key is in hand. The caller erases the key.
    async fn open_media(
        &self,
        record: &MessageRecord,
        key_blob: &KeyBlob,
        key: &ContentKey,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<UnlockedMedia, UnlockError> {
        progress.enter(UnlockStage::FetchingMediaBlob);
        // Bytes that fail their content address still reach the integrity
        // stage, which rejects them.
        let (mut media, addressed) = match self
            .fetch_blob(UnlockStage::FetchingMediaBlob, &record.media_blob_address, cancel)
            .await
        {
            Ok(media) => (media, true),
            Err(UnlockError::Fetch { stage, source }) => match take_corrupt_blob(source) {
                Ok(received) => (received, false),
                Err(source) => return Err(UnlockError::Fetch { stage, source }),
            },
            Err(e) => return Err(e),
        };

        progress.enter(UnlockStage::VerifyingIntegrity);
        if !addressed || !verify(&media, &record.content_digest) {
            return Err(UnlockError::IntegrityViolation {
                expected: record.content_digest.clone(),
                actual: digest_hex(&media),
            });
        }
        debug!(message_id = record.id, len = media.len(), "content digest verified");

        progress.enter(UnlockStage::Decrypting);
        let parsed = EncryptedBlob::from_bytes(&media);
        secure_erase([media.as_mut_slice()]);
        let mut blob = parsed.map_err(UnlockError::Decryption)?;
        let plaintext = cipher::decrypt(&blob, key);
        blob.erase();
        let plaintext = plaintext.map_err(UnlockError::Decryption)?;

        let mime_type = resolve_mime(key_blob.metadata(), &plaintext);
        progress.enter(UnlockStage::Ready);

        Ok(UnlockedMedia {
            mime_type,
            metadata: key_blob.metadata().cloned(),
            handle: MediaHandle::new(plaintext),
        })
    }
}
