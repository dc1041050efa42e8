use tcap_core::{AttemptError, ErrorKind, NetworkError, RetryFailure};
use tcap_crypto::{CipherError, EnvelopeError, KeyWrappingError, VaultError};
use thiserror::Error;

use crate::stage::UnlockStage;

/// A collaborator call that went through timeout + retry and still failed.
pub type ResilientFailure = RetryFailure<AttemptError<NetworkError>>;

/// Bytes a blob store rejected for not hashing to their address.
pub(crate) fn corrupt_blob(failure: &ResilientFailure) -> Option<&[u8]> {
    match &failure.source {
        AttemptError::Failed(NetworkError::IntegrityMismatch { received, .. }) => {
            Some(received.as_slice())
        }
        _ => None,
    }
}

/// Owned form of [`corrupt_blob`]; any other failure is handed back.
pub(crate) fn take_corrupt_blob(failure: ResilientFailure) -> Result<Vec<u8>, ResilientFailure> {
    let RetryFailure {
        label,
        attempts,
        exhausted,
        source,
    } = failure;
    match source {
        AttemptError::Failed(NetworkError::IntegrityMismatch { received, .. }) => Ok(received),
        source => Err(RetryFailure {
            label,
            attempts,
            exhausted,
            source,
        }),
    }
}

#[derive(Debug, Error)]
pub enum UnlockError {
    #[error("still locked for another {remaining_ms}ms (unlocks at {unlock_at_ms})")]
    StillLocked { remaining_ms: u64, unlock_at_ms: u64 },

    #[error("ledger lookup failed: {0}")]
    RecordLookup(#[source] ResilientFailure),

    #[error("{stage}: {source}")]
    Fetch {
        stage: UnlockStage,
        source: ResilientFailure,
    },

    #[error("key unwrap failed: {0}")]
    KeyWrapping(#[from] KeyWrappingError),

    #[error(transparent)]
    MalformedKeyBlob(#[from] EnvelopeError),

    #[error("content digest mismatch: expected {expected}, got {actual}")]
    IntegrityViolation { expected: String, actual: String },

    #[error("decryption failed: {0}")]
    Decryption(#[source] CipherError),

    #[error("cancelled during {stage}")]
    Cancelled { stage: UnlockStage },
}

impl UnlockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UnlockError::StillLocked { .. } => ErrorKind::Timing,
            UnlockError::Fetch { source, .. } if corrupt_blob(source).is_some() => {
                ErrorKind::Integrity
            }
            UnlockError::RecordLookup(_) | UnlockError::Fetch { .. } => ErrorKind::Network,
            UnlockError::KeyWrapping(e) => e.kind(),
            UnlockError::MalformedKeyBlob(e) => e.kind(),
            UnlockError::IntegrityViolation { .. } => ErrorKind::Integrity,
            UnlockError::Decryption(e) => e.kind(),
            UnlockError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Stage the pipeline was in when this error occurred.
    pub fn stage(&self) -> UnlockStage {
        match self {
            UnlockError::StillLocked { .. } => UnlockStage::VerifyingTimestamp,
            UnlockError::RecordLookup(_) => UnlockStage::Idle,
            UnlockError::Fetch { stage, .. } | UnlockError::Cancelled { stage } => *stage,
            UnlockError::KeyWrapping(_) => UnlockStage::UnwrappingKey,
            UnlockError::MalformedKeyBlob(_) => UnlockStage::FetchingKeyBlob,
            UnlockError::IntegrityViolation { .. } => UnlockStage::VerifyingIntegrity,
            UnlockError::Decryption(_) => UnlockStage::Decrypting,
        }
    }

    /// Attempts made by the failing collaborator call, if it was retried.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            UnlockError::RecordLookup(f) | UnlockError::Fetch { source: f, .. } => Some(f.attempts),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("encrypting media: {0}")]
    Encrypt(#[source] CipherError),

    #[error("wrapping content key: {0}")]
    Wrap(#[from] KeyWrappingError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("uploading {what}: {source}")]
    Upload {
        what: &'static str,
        source: ResilientFailure,
    },

    /// Blobs are stored but no ledger record points at them.
    #[error("creating ledger record: {0}")]
    Ledger(#[source] AttemptError<NetworkError>),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::Encrypt(e) => e.kind(),
            SendError::Wrap(e) => e.kind(),
            SendError::Envelope(e) => e.kind(),
            SendError::Upload { .. } | SendError::Ledger(_) => ErrorKind::Network,
        }
    }
}

#[derive(Debug, Error)]
pub enum RedeemError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("storing redeem package: {0}")]
    Store(#[source] ResilientFailure),

    #[error("fetching redeem package: {0}")]
    Fetch(#[source] ResilientFailure),
}

impl RedeemError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RedeemError::Vault(e) => e.kind(),
            RedeemError::Store(_) | RedeemError::Fetch(_) => ErrorKind::Network,
        }
    }
}
