//! tcap-crypto: client-side encryption for timecapsule messages
//!
//! Layout of a sent message:
//! ```text
//! ContentKey (256-bit, random per message)
//!   ├── media: AES-256-GCM, wire = iv(12) || ciphertext+tag
//!   │     └── SHA-256 over the wire bytes → contentDigest on the ledger
//!   └── key blob: JSON envelope { wrappedKey, metadata? }
//!         └── wrappedKey: X25519 ephemeral ECDH → HKDF-SHA256 → XChaCha20-Poly1305
//!
//! Redeem package (wallet-less path):
//!   passphrase → PBKDF2-HMAC-SHA256 (100k rounds, 16-byte salt)
//!     └── AES-256-GCM over the package JSON, wire = salt(16) || iv(12) || ciphertext
//! ```

pub mod cipher;
pub mod envelope;
pub mod integrity;
pub mod vault;
pub mod wrap;

pub use cipher::{decrypt, encrypt, generate_key, secure_erase, CipherError, ContentKey, EncryptedBlob};
pub use envelope::{EnvelopeError, KeyBlob, MediaMetadata};
pub use integrity::{digest, digest_hex, verify};
pub use vault::{PassphraseVault, SealedPackage, VaultError, VaultParams, DEFAULT_PBKDF2_ITERATIONS};
pub use wrap::{
    open_wrapped_key, KeyWrappingError, KeyWrappingService, LocalWallet, RecipientIdentity, Wallet,
    WalletError, WrappedKey, WRAP_SCHEME_X25519,
};

/// Size of a content key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// AES-GCM IV length. Part of the stored blob layout; never changes.
pub const IV_SIZE: usize = 12;

/// Size of a GCM / Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// PBKDF2 salt length in a sealed redeem package
pub const SALT_SIZE: usize = 16;

/// Buffers above this size are zeroed without the random overwrite pass.
pub const ERASE_RANDOM_PASS_LIMIT: usize = 65536;
