use thiserror::Error;

/// Coarse failure taxonomy shared by every pipeline.
///
/// Callers (UI layers) branch on the kind to pick user guidance; the
/// concrete error carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Still locked, or an expired redeem package. Never retried.
    Timing,
    /// Blob store / ledger transport. Retried internally per policy.
    Network,
    /// Digest or authentication tag mismatch. Always terminal.
    Integrity,
    /// Wallet-mediated unwrap failures.
    KeyWrapping,
    /// Short passphrase, malformed wire layout, bad settings.
    Configuration,
    /// Caller cancelled an in-flight pipeline.
    Cancelled,
}

/// Failure reported by a network-bound collaborator (blob store, ledger).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The store returned bytes that do not hash to the requested address.
    /// `received` holds them so the caller can report the mismatch.
    #[error("blob {address} failed content-address verification")]
    IntegrityMismatch { address: String, received: Vec<u8> },
}

impl NetworkError {
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            NetworkError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}
