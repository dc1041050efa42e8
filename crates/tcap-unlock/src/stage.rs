//! Unlock stages and progress observers

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;

/// Forward-only unlock states. `Failed` may follow any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnlockStage {
    Idle,
    VerifyingTimestamp,
    FetchingKeyBlob,
    UnwrappingKey,
    FetchingMediaBlob,
    VerifyingIntegrity,
    Decrypting,
    Ready,
    Failed,
}

impl UnlockStage {
    /// Progress shown to the user on entering this stage.
    pub fn percent(self) -> u8 {
        match self {
            UnlockStage::Idle | UnlockStage::Failed => 0,
            UnlockStage::VerifyingTimestamp => 5,
            UnlockStage::FetchingKeyBlob => 15,
            UnlockStage::UnwrappingKey => 30,
            UnlockStage::FetchingMediaBlob => 50,
            UnlockStage::VerifyingIntegrity => 75,
            UnlockStage::Decrypting => 90,
            UnlockStage::Ready => 100,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UnlockStage::Ready | UnlockStage::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnlockStage::Idle => "idle",
            UnlockStage::VerifyingTimestamp => "verifying_timestamp",
            UnlockStage::FetchingKeyBlob => "fetching_key_blob",
            UnlockStage::UnwrappingKey => "unwrapping_key",
            UnlockStage::FetchingMediaBlob => "fetching_media_blob",
            UnlockStage::VerifyingIntegrity => "verifying_integrity",
            UnlockStage::Decrypting => "decrypting",
            UnlockStage::Ready => "ready",
            UnlockStage::Failed => "failed",
        }
    }
}

impl fmt::Display for UnlockStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageEvent {
    pub stage: UnlockStage,
    pub percent: u8,
}

/// Receives stage transitions. Purely informational; the pipeline does not
/// look at what the observer does.
pub trait StageObserver: Send + Sync {
    fn on_stage_change(&self, stage: UnlockStage, percent: u8);
}

impl<F> StageObserver for F
where
    F: Fn(UnlockStage, u8) + Send + Sync,
{
    fn on_stage_change(&self, stage: UnlockStage, percent: u8) {
        self(stage, percent)
    }
}

impl StageObserver for mpsc::UnboundedSender<StageEvent> {
    fn on_stage_change(&self, stage: UnlockStage, percent: u8) {
        // A dropped receiver just means nobody is watching
        let _ = self.send(StageEvent { stage, percent });
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StageObserver for NoopObserver {
    fn on_stage_change(&self, _stage: UnlockStage, _percent: u8) {}
}
