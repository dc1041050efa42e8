//! Message ledger collaborator

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tcap_core::types::{Clock, MessageRecord, NewMessageRecord, SystemClock};
use tcap_core::NetworkError;
use tokio::sync::RwLock;

/// Append-only store of message records. The pipelines never update or
/// delete a record.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_records_by_sender(&self, sender: &str) -> Result<Vec<MessageRecord>, NetworkError>;

    async fn get_records_by_recipient(
        &self,
        recipient: &str,
    ) -> Result<Vec<MessageRecord>, NetworkError>;

    async fn get_record(&self, id: u64) -> Result<MessageRecord, NetworkError>;

    /// Returns the id assigned to the new record.
    async fn create_record(&self, record: NewMessageRecord) -> Result<u64, NetworkError>;
}

/// In-process ledger. Ids start at 1 and increase.
pub struct MemoryLedger {
    records: RwLock<BTreeMap<u64, MessageRecord>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(record: &NewMessageRecord) -> Result<(), NetworkError> {
    let missing = [
        ("keyBlobAddress", record.key_blob_address.is_empty()),
        ("mediaBlobAddress", record.media_blob_address.is_empty()),
        ("contentDigest", record.content_digest.is_empty()),
        ("recipient", record.recipient.is_empty()),
    ];
    if let Some((field, _)) = missing.iter().find(|(_, empty)| *empty) {
        return Err(NetworkError::Status {
            status: 400,
            message: format!("{field} is required"),
        });
    }
    Ok(())
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_records_by_sender(&self, sender: &str) -> Result<Vec<MessageRecord>, NetworkError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.sender == sender)
            .cloned()
            .collect())
    }

    async fn get_records_by_recipient(
        &self,
        recipient: &str,
    ) -> Result<Vec<MessageRecord>, NetworkError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.recipient == recipient)
            .cloned()
            .collect())
    }

    async fn get_record(&self, id: u64) -> Result<MessageRecord, NetworkError> {
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound(format!("message {id}")))
    }

    async fn create_record(&self, record: NewMessageRecord) -> Result<u64, NetworkError> {
        validate(&record)?;

        let mut records = self.records.write().await;
        let id = records.keys().next_back().map_or(1, |last| last + 1);
        records.insert(
            id,
            MessageRecord {
                id,
                key_blob_address: record.key_blob_address,
                media_blob_address: record.media_blob_address,
                content_digest: record.content_digest,
                unlock_timestamp: record.unlock_timestamp,
                sender: record.sender,
                recipient: record.recipient,
                created_at: self.clock.now_ms(),
            },
        );
        tracing::debug!(id, "ledger record created");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcap_core::resilience::{classify_failure, RetryClass};
    use tcap_core::FixedClock;

    fn new_record(sender: &str, recipient: &str) -> NewMessageRecord {
        NewMessageRecord {
            key_blob_address: "k".repeat(64),
            media_blob_address: "m".repeat(64),
            content_digest: "d".repeat(64),
            unlock_timestamp: 5_000,
            sender: sender.into(),
            recipient: recipient.into(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let ledger = MemoryLedger::with_clock(Arc::new(FixedClock::new(1_234)));
        let id = ledger.create_record(new_record("alice", "bob")).await.unwrap();
        assert_eq!(id, 1);

        let record = ledger.get_record(id).await.unwrap();
        assert_eq!(record.created_at, 1_234);
        assert_eq!(record.unlock_timestamp, 5_000);
        assert_eq!(record.sender, "alice");
    }

    #[tokio::test]
    async fn test_ids_increase() {
        let ledger = MemoryLedger::new();
        let a = ledger.create_record(new_record("alice", "bob")).await.unwrap();
        let b = ledger.create_record(new_record("alice", "carol")).await.unwrap();
        assert!(b > a);
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn test_queries_by_party() {
        let ledger = MemoryLedger::new();
        ledger.create_record(new_record("alice", "bob")).await.unwrap();
        ledger.create_record(new_record("alice", "carol")).await.unwrap();
        ledger.create_record(new_record("dave", "bob")).await.unwrap();

        assert_eq!(ledger.get_records_by_sender("alice").await.unwrap().len(), 2);
        assert_eq!(ledger.get_records_by_recipient("bob").await.unwrap().len(), 2);
        assert!(ledger.get_records_by_sender("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record() {
        let ledger = MemoryLedger::new();
        let err = ledger.get_record(99).await.unwrap_err();
        assert!(matches!(err, NetworkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rejects_incomplete_record() {
        let ledger = MemoryLedger::new();
        let mut record = new_record("alice", "bob");
        record.content_digest.clear();

        let err = ledger.create_record(record).await.unwrap_err();
        assert_eq!(
            classify_failure(err.status(), &err.to_string()),
            RetryClass::Terminal
        );
        assert!(ledger.is_empty().await);
    }
}
