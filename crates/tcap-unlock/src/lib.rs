//! tcap-unlock: the time-locked message pipelines
//!
//! - [`MessageSender`]: encrypt → wrap → digest → upload → ledger record
//! - [`UnlockOrchestrator`]: timestamp gate → fetch → unwrap → verify → decrypt
//! - [`RedeemService`]: passphrase-sealed pointers for wallet-less recipients
//!
//! Collaborators (blob store, ledger, wallet, clock) are injected as trait
//! objects.

pub mod error;
pub mod media;
pub mod orchestrator;
pub mod redeem;
pub mod send;
pub mod stage;

pub use error::{RedeemError, ResilientFailure, SendError, UnlockError};
pub use media::{resolve_mime, sniff_mime, MediaHandle, UnlockedMedia};
pub use orchestrator::UnlockOrchestrator;
pub use redeem::RedeemService;
pub use send::{MessageSender, OutgoingMessage, SentMessage};
pub use stage::{NoopObserver, StageEvent, StageObserver, UnlockStage};
