//! tcap-storage: blob store and ledger collaborators
//!
//! Both traits report failures as [`tcap_core::NetworkError`] so callers can
//! classify them for retry.

pub mod blob;
pub mod ledger;
pub mod operator;

pub use blob::{BlobStore, ContentAddress, OperatorBlobStore};
pub use ledger::{Ledger, MemoryLedger};
pub use operator::{build_operator, S3Credentials};
