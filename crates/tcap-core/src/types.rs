use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A message entry as stored on the ledger. Consumed read-only.
///
/// All timestamps are Unix epoch milliseconds. `unlock_timestamp` and
/// `content_digest` are write-once on the ledger side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: u64,
    pub key_blob_address: String,
    pub media_blob_address: String,
    /// Lowercase hex SHA-256 of the encrypted media blob
    pub content_digest: String,
    pub unlock_timestamp: u64,
    pub sender: String,
    pub recipient: String,
    pub created_at: u64,
}

/// Fields the sender supplies when creating a ledger entry; the ledger
/// assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageRecord {
    pub key_blob_address: String,
    pub media_blob_address: String,
    pub content_digest: String,
    pub unlock_timestamp: u64,
    pub sender: String,
    pub recipient: String,
}

/// Derived view of a message. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Before the unlock timestamp
    Locked,
    /// Unlock time has passed, recipient has not opened it yet
    Unlockable,
    /// Opened at least once (the viewed flag is owned by the UI)
    Unlocked,
}

impl MessageStatus {
    pub fn derive(unlock_timestamp: u64, now_ms: u64, viewed: bool) -> Self {
        if now_ms < unlock_timestamp {
            MessageStatus::Locked
        } else if viewed {
            MessageStatus::Unlocked
        } else {
            MessageStatus::Unlockable
        }
    }
}

impl MessageRecord {
    pub fn status(&self, now_ms: u64, viewed: bool) -> MessageStatus {
        MessageStatus::derive(self.unlock_timestamp, now_ms, viewed)
    }

    /// Milliseconds until the record unlocks (0 once unlocked).
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.unlock_timestamp.saturating_sub(now_ms)
    }

    pub fn is_unlocked_at(&self, now_ms: u64) -> bool {
        now_ms >= self.unlock_timestamp
    }
}

/// Message pointers handed to a recipient without a wallet identity.
///
/// Sealed with a passphrase before it leaves the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemPackage {
    pub key_blob_address: String,
    pub media_blob_address: String,
    pub content_digest: String,
    pub unlock_timestamp: u64,
    pub sender: String,
    pub instructions: String,
    /// None means the package never expires
    pub expires_at: Option<u64>,
}

impl RedeemPackage {
    pub fn from_record(
        record: &MessageRecord,
        instructions: impl Into<String>,
        expires_at: Option<u64>,
    ) -> Self {
        Self {
            key_blob_address: record.key_blob_address.clone(),
            media_blob_address: record.media_blob_address.clone(),
            content_digest: record.content_digest.clone(),
            unlock_timestamp: record.unlock_timestamp,
            sender: record.sender.clone(),
            instructions: instructions.into(),
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        matches!(self.expires_at, Some(expires) if expires < now_ms)
    }
}

/// Wall-clock source, injected so time-gated logic is testable.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Reads `SystemTime::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        now_ms()
    }
}

/// A settable clock for tests and replays.
#[derive(Debug, Default)]
pub struct FixedClock(AtomicU64);

impl FixedClock {
    pub fn new(now_ms: u64) -> Self {
        Self(AtomicU64::new(now_ms))
    }

    pub fn set(&self, now_ms: u64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
