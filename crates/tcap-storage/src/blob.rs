//! Content-addressed blob store

use async_trait::async_trait;
use opendal::Operator;
use std::fmt;
use tcap_core::NetworkError;
use tracing::debug;

/// BLAKE3 hex digest of a blob's bytes; doubles as its storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentAddress(String);

impl ContentAddress {
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    pub fn parse(s: &str) -> Result<Self, NetworkError> {
        let s = s.trim();
        if s.len() != 64 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(NetworkError::Status {
                status: 400,
                message: format!("invalid content address: {s:?}"),
            });
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `bytes` hash to this address.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        blake3::hash(bytes).to_hex().as_str() == self.0
    }
}

impl fmt::Display for ContentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ContentAddress> for String {
    fn from(addr: ContentAddress) -> Self {
        addr.0
    }
}

/// Blob transport. Only `get` and `put` are used by the pipelines.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, address: &str) -> Result<Vec<u8>, NetworkError>;

    async fn put(&self, bytes: Vec<u8>) -> Result<ContentAddress, NetworkError>;
}

/// [`BlobStore`] over any OpenDAL operator (memory, S3, ...).
///
/// Objects live at `{prefix}/blobs/{address}`. Reads are checked against the
/// address; a mismatch is [`NetworkError::IntegrityMismatch`].
#[derive(Clone, Debug)]
pub struct OperatorBlobStore {
    op: Operator,
    prefix: String,
}

impl OperatorBlobStore {
    pub fn new(op: Operator, prefix: impl Into<String>) -> Self {
        Self {
            op,
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// Process-local store on the OpenDAL memory service.
    pub fn memory() -> anyhow::Result<Self> {
        let op = Operator::new(opendal::services::Memory::default())?.finish();
        Ok(Self::new(op, ""))
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    fn key_for(&self, address: &ContentAddress) -> String {
        if self.prefix.is_empty() {
            format!("blobs/{address}")
        } else {
            format!("{}/blobs/{address}", self.prefix)
        }
    }
}

#[async_trait]
impl BlobStore for OperatorBlobStore {
    async fn get(&self, address: &str) -> Result<Vec<u8>, NetworkError> {
        let address = ContentAddress::parse(address)?;
        let key = self.key_for(&address);

        let data = self
            .op
            .read(&key)
            .await
            .map_err(|e| map_opendal_error(&key, e))?
            .to_bytes()
            .to_vec();

        if !address.matches(&data) {
            return Err(NetworkError::IntegrityMismatch {
                address: address.into(),
                received: data,
            });
        }
        debug!(%address, len = data.len(), "fetched blob");
        Ok(data)
    }

    async fn put(&self, bytes: Vec<u8>) -> Result<ContentAddress, NetworkError> {
        let address = ContentAddress::of(&bytes);
        let key = self.key_for(&address);

        // Same bytes, same address: skip the upload
        if self.op.exists(&key).await.unwrap_or(false) {
            debug!(%address, "blob already stored");
            return Ok(address);
        }

        let len = bytes.len();
        self.op
            .write(&key, bytes)
            .await
            .map_err(|e| map_opendal_error(&key, e))?;
        debug!(%address, len, "stored blob");
        Ok(address)
    }
}

pub(crate) fn map_opendal_error(key: &str, e: opendal::Error) -> NetworkError {
    match e.kind() {
        opendal::ErrorKind::NotFound => NetworkError::NotFound(key.to_string()),
        opendal::ErrorKind::RateLimited => NetworkError::Status {
            status: 429,
            message: e.to_string(),
        },
        opendal::ErrorKind::PermissionDenied => NetworkError::Status {
            status: 403,
            message: e.to_string(),
        },
        _ => NetworkError::Transport(format!("{key}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = OperatorBlobStore::memory().unwrap();
        let addr = store.put(b"hello blob".to_vec()).await.unwrap();

        assert_eq!(addr, ContentAddress::of(b"hello blob"));
        assert_eq!(store.get(addr.as_str()).await.unwrap(), b"hello blob");
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let store = OperatorBlobStore::memory().unwrap();
        let a1 = store.put(vec![1, 2, 3]).await.unwrap();
        let a2 = store.put(vec![1, 2, 3]).await.unwrap();
        assert_eq!(a1, a2);
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let store = OperatorBlobStore::memory().unwrap();
        let addr = ContentAddress::of(b"never stored");
        let err = store.get(addr.as_str()).await.unwrap_err();
        assert!(matches!(err, NetworkError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_tampered_blob_rejected() {
        let store = OperatorBlobStore::memory().unwrap();
        let addr = store.put(b"original".to_vec()).await.unwrap();

        store
            .operator()
            .write(&format!("blobs/{addr}"), b"swapped".to_vec())
            .await
            .unwrap();

        let err = store.get(addr.as_str()).await.unwrap_err();
        match err {
            NetworkError::IntegrityMismatch { address, received } => {
                assert_eq!(address, addr.as_str());
                assert_eq!(received, b"swapped");
            }
            other => panic!("expected IntegrityMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_prefix_layout() {
        let op = Operator::new(opendal::services::Memory::default())
            .unwrap()
            .finish();
        let store = OperatorBlobStore::new(op.clone(), "capsules/");
        let addr = store.put(b"x".to_vec()).await.unwrap();
        assert!(op.exists(&format!("capsules/blobs/{addr}")).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_address_is_terminal() {
        let store = OperatorBlobStore::memory().unwrap();
        let err = store.get("../etc/passwd").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_parse_normalizes_case() {
        let addr = ContentAddress::of(b"abc");
        let upper = addr.as_str().to_uppercase();
        assert_eq!(ContentAddress::parse(&upper).unwrap(), addr);
    }
}
