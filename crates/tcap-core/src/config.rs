use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Minimum passphrase length accepted when sealing redeem packages.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Top-level configuration (loaded from timecapsule.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TcapConfig {
    pub resilience: ResilienceConfig,
    pub vault: VaultConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// Timeout and retry settings for blob-store and ledger calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Total attempts including the first (default: 3)
    pub max_attempts: u32,
    /// Delay before the second attempt (default: 1000)
    pub initial_delay_ms: u64,
    /// Exponential growth factor (default: 2.0)
    pub multiplier: f64,
    /// Upper bound on a single delay (default: 10000)
    pub max_delay_ms: u64,
    /// Symmetric random spread as a fraction of the delay (default: 0.1)
    pub jitter_factor: f64,
    /// Per-attempt budget for blob-store reads and writes
    pub blob_timeout_ms: u64,
    /// Per-attempt budget for ledger calls
    pub ledger_timeout_ms: u64,
}

/// Redeem-package sealing parameters
///
/// The PBKDF2 round count is part of the package wire contract and is not
/// configurable; unknown keys such as `pbkdf2_iterations` are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Minimum passphrase length in characters (default: 8)
    pub min_passphrase_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendKind {
    Memory,
    S3,
}

/// Content-addressed blob store backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    pub bucket: String,
    /// Key prefix inside the bucket
    pub root: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 10_000,
            jitter_factor: 0.1,
            blob_timeout_ms: 30_000,
            ledger_timeout_ms: 15_000,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            min_passphrase_len: MIN_PASSPHRASE_LEN,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Memory,
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "timecapsule".into(),
            root: "/".into(),
            enforce_tls: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl TcapConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: TcapConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file; a missing file yields defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        Self::from_toml_str(&content)
            .map_err(|e| anyhow::anyhow!("loading config {}: {e}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.resilience;
        if r.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "resilience.max_attempts must be at least 1".into(),
            ));
        }
        if !(r.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "resilience.multiplier must be >= 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&r.jitter_factor) {
            return Err(ConfigError::Invalid(
                "resilience.jitter_factor must be within [0, 1]".into(),
            ));
        }
        if r.initial_delay_ms > r.max_delay_ms {
            return Err(ConfigError::Invalid(
                "resilience.initial_delay_ms exceeds max_delay_ms".into(),
            ));
        }
        if self.vault.min_passphrase_len < MIN_PASSPHRASE_LEN {
            return Err(ConfigError::Invalid(format!(
                "vault.min_passphrase_len must be at least {MIN_PASSPHRASE_LEN}"
            )));
        }
        Ok(())
    }
}
