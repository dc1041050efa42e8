//! Passphrase-sealed redeem packages for recipients without a wallet.
//!
//! Wire layout: `[16-byte salt][12-byte IV][ciphertext + tag]`. The
//! plaintext is the JSON-encoded [`RedeemPackage`]. Opening reports a single
//! generic error for every decrypt-side failure so callers cannot tell a
//! wrong passphrase from damaged bytes.

use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use tcap_core::config::{VaultConfig, MIN_PASSPHRASE_LEN};
use tcap_core::types::{now_ms, RedeemPackage};
use tcap_core::ErrorKind;
use zeroize::Zeroizing;

use crate::cipher::{self, ContentKey, EncryptedBlob};
use crate::{IV_SIZE, KEY_SIZE, SALT_SIZE, TAG_SIZE};

/// PBKDF2-HMAC-SHA256 rounds. Fixed: the wire layout carries no round count.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("passphrase must be at least {min} characters")]
    PassphraseTooShort { min: usize },

    /// Wrong passphrase, truncated or corrupted bytes, or undecodable contents.
    #[error("could not open redeem package")]
    OpenFailed,

    #[error("redeem package expired at {expires_at}")]
    Expired { expires_at: u64 },

    #[error("sealing failed: {0}")]
    SealFailed(String),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::Expired { .. } => ErrorKind::Timing,
            VaultError::OpenFailed => ErrorKind::Integrity,
            VaultError::PassphraseTooShort { .. } | VaultError::SealFailed(_) => {
                ErrorKind::Configuration
            }
        }
    }
}

/// Sealing policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultParams {
    pub min_passphrase_len: usize,
}

impl Default for VaultParams {
    fn default() -> Self {
        Self {
            min_passphrase_len: MIN_PASSPHRASE_LEN,
        }
    }
}

impl From<&VaultConfig> for VaultParams {
    fn from(cfg: &VaultConfig) -> Self {
        Self {
            min_passphrase_len: cfg.min_passphrase_len.max(MIN_PASSPHRASE_LEN),
        }
    }
}

/// A sealed package in its three wire parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPackage {
    pub salt: [u8; SALT_SIZE],
    pub iv: [u8; IV_SIZE],
    pub ciphertext: Vec<u8>,
}

impl SealedPackage {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SALT_SIZE + IV_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Too-short input is reported as [`VaultError::OpenFailed`].
    pub fn from_bytes(data: &[u8]) -> Result<Self, VaultError> {
        if data.len() < SALT_SIZE + IV_SIZE + TAG_SIZE {
            return Err(VaultError::OpenFailed);
        }
        let (salt, rest) = data.split_at(SALT_SIZE);
        let (iv, ciphertext) = rest.split_at(IV_SIZE);

        let mut salt_bytes = [0u8; SALT_SIZE];
        salt_bytes.copy_from_slice(salt);
        let mut iv_bytes = [0u8; IV_SIZE];
        iv_bytes.copy_from_slice(iv);

        Ok(Self {
            salt: salt_bytes,
            iv: iv_bytes,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PassphraseVault {
    params: VaultParams,
}

impl PassphraseVault {
    pub fn new(params: VaultParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &VaultParams {
        &self.params
    }

    /// PBKDF2-HMAC-SHA256 over the passphrase, [`DEFAULT_PBKDF2_ITERATIONS`] rounds.
    pub fn derive(&self, passphrase: &SecretString, salt: &[u8; SALT_SIZE]) -> ContentKey {
        let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            passphrase.expose_secret().as_bytes(),
            salt,
            DEFAULT_PBKDF2_ITERATIONS,
            okm.as_mut_slice(),
        );
        ContentKey::from_bytes(*okm)
    }

    /// Encrypt `package` under a key stretched from `passphrase`.
    ///
    /// Short passphrases are rejected before any key derivation runs.
    pub fn seal(
        &self,
        package: &RedeemPackage,
        passphrase: &SecretString,
    ) -> Result<SealedPackage, VaultError> {
        let min = self.params.min_passphrase_len;
        if passphrase.expose_secret().chars().count() < min {
            return Err(VaultError::PassphraseTooShort { min });
        }

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let key = self.derive(passphrase, &salt);

        let plaintext = Zeroizing::new(
            serde_json::to_vec(package).map_err(|e| VaultError::SealFailed(e.to_string()))?,
        );
        let blob = cipher::encrypt(&plaintext, &key)
            .map_err(|e| VaultError::SealFailed(e.to_string()))?;

        tracing::debug!(
            iterations = DEFAULT_PBKDF2_ITERATIONS,
            len = blob.ciphertext.len(),
            "sealed redeem package"
        );

        Ok(SealedPackage {
            salt,
            iv: blob.iv,
            ciphertext: blob.ciphertext,
        })
    }

    /// Open against the system clock.
    pub fn open(
        &self,
        sealed: &SealedPackage,
        passphrase: &SecretString,
    ) -> Result<RedeemPackage, VaultError> {
        self.open_at(sealed, passphrase, now_ms())
    }

    /// Decrypt, then check expiry against `now_ms`.
    pub fn open_at(
        &self,
        sealed: &SealedPackage,
        passphrase: &SecretString,
        now_ms: u64,
    ) -> Result<RedeemPackage, VaultError> {
        let key = self.derive(passphrase, &sealed.salt);
        let blob = EncryptedBlob {
            iv: sealed.iv,
            ciphertext: sealed.ciphertext.clone(),
        };
        let plaintext = cipher::decrypt(&blob, &key).map_err(|_| VaultError::OpenFailed)?;
        let package: RedeemPackage =
            serde_json::from_slice(&plaintext).map_err(|_| VaultError::OpenFailed)?;

        if package.is_expired_at(now_ms) {
            if let Some(expires_at) = package.expires_at {
                return Err(VaultError::Expired { expires_at });
            }
        }
        Ok(package)
    }

    pub fn open_bytes(
        &self,
        data: &[u8],
        passphrase: &SecretString,
        now_ms: u64,
    ) -> Result<RedeemPackage, VaultError> {
        let sealed = SealedPackage::from_bytes(data)?;
        self.open_at(&sealed, passphrase, now_ms)
    }
}
