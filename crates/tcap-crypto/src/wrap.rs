//! Content-key wrapping for a recipient identity.
//!
//! Scheme `x25519-hkdf-sha256-xchacha20poly1305`:
//! ```text
//! eph_sk, eph_pk  = fresh X25519 keypair
//! shared          = X25519(eph_sk, recipient_pk)
//! wrapping_key    = HKDF-SHA256(ikm=shared, salt=eph_pk || recipient_pk, info="tcap-keywrap-v1")
//! ciphertext      = XChaCha20-Poly1305(wrapping_key, random 24-byte nonce, content_key)
//! ```
//! Wrapping needs only the recipient's public key. Unwrapping happens on the
//! wallet side; this crate never sees the recipient's secret key except in
//! [`LocalWallet`], the in-process reference wallet.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tcap_core::ErrorKind;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::cipher::ContentKey;
use crate::KEY_SIZE;

pub const WRAP_SCHEME_X25519: &str = "x25519-hkdf-sha256-xchacha20poly1305";

const WRAP_INFO: &[u8] = b"tcap-keywrap-v1";
const WRAP_NONCE_SIZE: usize = 24;

/// Failure reported by the wallet collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalletError {
    #[error("wallet unavailable: {0}")]
    Unavailable(String),

    #[error("user rejected the request")]
    Rejected,

    #[error("wallet did not respond in time")]
    Timeout,

    /// The wallet holds no key able to open this wrapped key.
    #[error("wallet could not decrypt: {0}")]
    DecryptionFailed(String),

    /// The wrapped key itself is unreadable (bad encoding or field sizes).
    #[error("wallet could not parse the wrapped key: {0}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum KeyWrappingError {
    #[error("wrapped key is not addressed to this wallet")]
    WrongRecipient,

    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),

    #[error("user rejected the unwrap request")]
    UserRejected,

    #[error("wallet timed out")]
    WalletTimeout,

    #[error("unsupported wrap scheme: {0}")]
    UnsupportedScheme(String),

    #[error("malformed wrapped key: {0}")]
    MalformedWrappedKey(String),

    #[error("key wrapping failed: {0}")]
    WrapFailed(String),
}

impl KeyWrappingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyWrappingError::UnsupportedScheme(_)
            | KeyWrappingError::MalformedWrappedKey(_)
            | KeyWrappingError::WrapFailed(_) => ErrorKind::Configuration,
            _ => ErrorKind::KeyWrapping,
        }
    }
}

impl From<WalletError> for KeyWrappingError {
    fn from(e: WalletError) -> Self {
        match e {
            WalletError::Unavailable(msg) => KeyWrappingError::WalletUnavailable(msg),
            WalletError::Rejected => KeyWrappingError::UserRejected,
            WalletError::Timeout => KeyWrappingError::WalletTimeout,
            WalletError::DecryptionFailed(_) => KeyWrappingError::WrongRecipient,
            WalletError::Malformed(msg) => KeyWrappingError::MalformedWrappedKey(msg),
        }
    }
}

/// Public encryption key of a recipient, as published by their wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipientIdentity {
    public_key: [u8; 32],
}

impl RecipientIdentity {
    pub fn from_public_key(public_key: [u8; 32]) -> Self {
        Self { public_key }
    }

    pub fn from_base64(s: &str) -> Result<Self, KeyWrappingError> {
        let public_key = decode_fixed::<32>(s, "recipient public key")?;
        Ok(Self { public_key })
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.public_key)
    }
}

/// A content key encrypted for one recipient (base64 fields on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKey {
    pub scheme: String,
    pub ephemeral_public_key: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// The identity-holding collaborator. Calls may wait on a human.
#[async_trait]
pub trait Wallet: Send + Sync {
    async fn encryption_public_key(&self) -> Result<RecipientIdentity, WalletError>;

    /// Recover the raw content-key bytes. Implementations must not apply
    /// their own retry: a rejected approval is final.
    async fn decrypt_wrapped_key(
        &self,
        wrapped: &WrappedKey,
    ) -> Result<Zeroizing<Vec<u8>>, WalletError>;
}

/// Wraps content keys for recipients and unwraps them through a wallet.
#[derive(Clone)]
pub struct KeyWrappingService {
    wallet: Arc<dyn Wallet>,
}

impl KeyWrappingService {
    pub fn new(wallet: Arc<dyn Wallet>) -> Self {
        Self { wallet }
    }

    /// Encrypt `key` so only the holder of `recipient`'s secret can open it.
    pub fn wrap_content_key(
        key: &ContentKey,
        recipient: &RecipientIdentity,
    ) -> Result<WrappedKey, KeyWrappingError> {
        let recipient_pk = PublicKey::from(recipient.public_key);
        let eph_secret = EphemeralSecret::random_from_rng(OsRng);
        let eph_pk = PublicKey::from(&eph_secret);

        let shared = eph_secret.diffie_hellman(&recipient_pk);
        if !shared.was_contributory() {
            return Err(KeyWrappingError::WrapFailed(
                "recipient public key is a low-order point".into(),
            ));
        }

        let wrapping_key =
            derive_wrapping_key(shared.as_bytes(), eph_pk.as_bytes(), &recipient.public_key)?;
        let cipher = XChaCha20Poly1305::new((&*wrapping_key).into());

        let mut nonce = [0u8; WRAP_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), key.as_bytes().as_ref())
            .map_err(|e| KeyWrappingError::WrapFailed(e.to_string()))?;

        Ok(WrappedKey {
            scheme: WRAP_SCHEME_X25519.to_string(),
            ephemeral_public_key: STANDARD.encode(eph_pk.as_bytes()),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        })
    }

    /// Ask the wallet to open `wrapped`. Never retried here.
    pub async fn unwrap_content_key(
        &self,
        wrapped: &WrappedKey,
    ) -> Result<ContentKey, KeyWrappingError> {
        if wrapped.scheme != WRAP_SCHEME_X25519 {
            return Err(KeyWrappingError::UnsupportedScheme(wrapped.scheme.clone()));
        }

        let mut raw = self.wallet.decrypt_wrapped_key(wrapped).await?;
        let key = ContentKey::from_slice(&raw);
        raw.zeroize();
        key.ok_or(KeyWrappingError::WrongRecipient)
    }

    pub async fn recipient_identity(&self) -> Result<RecipientIdentity, KeyWrappingError> {
        Ok(self.wallet.encryption_public_key().await?)
    }
}

/// Wallet-side primitive: open a wrapped key with the recipient's secret.
pub fn open_wrapped_key(
    secret: &StaticSecret,
    wrapped: &WrappedKey,
) -> Result<Zeroizing<Vec<u8>>, KeyWrappingError> {
    if wrapped.scheme != WRAP_SCHEME_X25519 {
        return Err(KeyWrappingError::UnsupportedScheme(wrapped.scheme.clone()));
    }
    let eph_pk = decode_fixed::<32>(&wrapped.ephemeral_public_key, "ephemeral public key")?;
    let nonce = decode_fixed::<WRAP_NONCE_SIZE>(&wrapped.nonce, "nonce")?;
    let ciphertext = STANDARD
        .decode(&wrapped.ciphertext)
        .map_err(|e| KeyWrappingError::MalformedWrappedKey(format!("ciphertext: {e}")))?;

    let recipient_pk = PublicKey::from(secret);
    let shared = secret.diffie_hellman(&PublicKey::from(eph_pk));
    if !shared.was_contributory() {
        return Err(KeyWrappingError::WrongRecipient);
    }

    let wrapping_key = derive_wrapping_key(shared.as_bytes(), &eph_pk, recipient_pk.as_bytes())?;
    let cipher = XChaCha20Poly1305::new((&*wrapping_key).into());

    cipher
        .decrypt(XNonce::from_slice(&nonce), ciphertext.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| KeyWrappingError::WrongRecipient)
}

fn derive_wrapping_key(
    shared: &[u8; 32],
    eph_pk: &[u8; 32],
    recipient_pk: &[u8; 32],
) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeyWrappingError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(eph_pk);
    salt[32..].copy_from_slice(recipient_pk);

    let hkdf = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(WRAP_INFO, okm.as_mut_slice())
        .map_err(|e| KeyWrappingError::WrapFailed(format!("HKDF expand failed: {e}")))?;
    Ok(okm)
}

fn decode_fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], KeyWrappingError> {
    let bytes = STANDARD
        .decode(s)
        .map_err(|e| KeyWrappingError::MalformedWrappedKey(format!("{what}: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        KeyWrappingError::MalformedWrappedKey(format!(
            "{what}: {} bytes (expected {N})",
            bytes.len()
        ))
    })
}

/// In-process wallet holding an X25519 secret.
pub struct LocalWallet {
    secret: StaticSecret,
}

impl LocalWallet {
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self {
            secret: StaticSecret::from(bytes),
        }
    }

    pub fn identity(&self) -> RecipientIdentity {
        RecipientIdentity::from_public_key(PublicKey::from(&self.secret).to_bytes())
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("public_key", &self.identity().to_base64())
            .finish()
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    async fn encryption_public_key(&self) -> Result<RecipientIdentity, WalletError> {
        Ok(self.identity())
    }

    async fn decrypt_wrapped_key(
        &self,
        wrapped: &WrappedKey,
    ) -> Result<Zeroizing<Vec<u8>>, WalletError> {
        open_wrapped_key(&self.secret, wrapped).map_err(|e| match e {
            KeyWrappingError::WrongRecipient => {
                WalletError::DecryptionFailed("no matching key".into())
            }
            KeyWrappingError::MalformedWrappedKey(msg) => WalletError::Malformed(msg),
            KeyWrappingError::UnsupportedScheme(scheme) => {
                WalletError::Malformed(format!("unsupported scheme {scheme}"))
            }
            other => WalletError::DecryptionFailed(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::generate_key;

    struct ScriptedWallet(WalletError);

    #[async_trait]
    impl Wallet for ScriptedWallet {
        async fn encryption_public_key(&self) -> Result<RecipientIdentity, WalletError> {
            Err(self.0.clone())
        }

        async fn decrypt_wrapped_key(
            &self,
            _wrapped: &WrappedKey,
        ) -> Result<Zeroizing<Vec<u8>>, WalletError> {
            Err(self.0.clone())
        }
    }

    /// Returns whatever bytes it was given, regardless of input.
    struct ShortKeyWallet;

    #[async_trait]
    impl Wallet for ShortKeyWallet {
        async fn encryption_public_key(&self) -> Result<RecipientIdentity, WalletError> {
            Ok(RecipientIdentity::from_public_key([9u8; 32]))
        }

        async fn decrypt_wrapped_key(
            &self,
            _wrapped: &WrappedKey,
        ) -> Result<Zeroizing<Vec<u8>>, WalletError> {
            Ok(Zeroizing::new(vec![1u8; 16]))
        }
    }

    #[tokio::test]
    async fn test_wrap_unwrap_roundtrip() {
        let wallet = Arc::new(LocalWallet::generate());
        let service = KeyWrappingService::new(wallet.clone());
        let key = generate_key();

        let wrapped = KeyWrappingService::wrap_content_key(&key, &wallet.identity()).unwrap();
        assert_eq!(wrapped.scheme, WRAP_SCHEME_X25519);

        let unwrapped = service.unwrap_content_key(&wrapped).await.unwrap();
        assert_eq!(unwrapped.as_bytes(), key.as_bytes());
    }

    #[tokio::test]
    async fn test_wrong_recipient() {
        let alice = LocalWallet::generate();
        let mallory = Arc::new(LocalWallet::generate());
        let key = generate_key();

        let wrapped = KeyWrappingService::wrap_content_key(&key, &alice.identity()).unwrap();
        let result = KeyWrappingService::new(mallory)
            .unwrap_content_key(&wrapped)
            .await;

        assert!(matches!(result, Err(KeyWrappingError::WrongRecipient)));
    }

    #[tokio::test]
    async fn test_wallet_errors_map_to_kinds() {
        let wrapped =
            KeyWrappingService::wrap_content_key(&generate_key(), &LocalWallet::generate().identity())
                .unwrap();

        let cases = [
            (WalletError::Rejected, "UserRejected"),
            (WalletError::Timeout, "WalletTimeout"),
            (WalletError::Unavailable("locked".into()), "WalletUnavailable"),
        ];
        for (wallet_err, expected) in cases {
            let service = KeyWrappingService::new(Arc::new(ScriptedWallet(wallet_err)));
            let err = service.unwrap_content_key(&wrapped).await.unwrap_err();
            assert!(format!("{err:?}").starts_with(expected), "{err:?}");
            assert_eq!(err.kind(), ErrorKind::KeyWrapping);
        }
    }

    #[tokio::test]
    async fn test_short_key_is_wrong_recipient() {
        let wrapped =
            KeyWrappingService::wrap_content_key(&generate_key(), &LocalWallet::generate().identity())
                .unwrap();
        let service = KeyWrappingService::new(Arc::new(ShortKeyWallet));
        let result = service.unwrap_content_key(&wrapped).await;
        assert!(matches!(result, Err(KeyWrappingError::WrongRecipient)));
    }

    #[tokio::test]
    async fn test_unsupported_scheme_skips_wallet() {
        let mut wrapped =
            KeyWrappingService::wrap_content_key(&generate_key(), &LocalWallet::generate().identity())
                .unwrap();
        wrapped.scheme = "rsa-oaep".into();

        // A rejecting wallet would surface UserRejected if it were consulted.
        let service = KeyWrappingService::new(Arc::new(ScriptedWallet(WalletError::Rejected)));
        let result = service.unwrap_content_key(&wrapped).await;
        assert!(matches!(result, Err(KeyWrappingError::UnsupportedScheme(s)) if s == "rsa-oaep"));
    }

    #[test]
    fn test_malformed_fields() {
        let wallet = LocalWallet::from_secret_bytes([5u8; 32]);
        let secret = StaticSecret::from([5u8; 32]);
        let mut wrapped =
            KeyWrappingService::wrap_content_key(&generate_key(), &wallet.identity()).unwrap();
        wrapped.nonce = STANDARD.encode([0u8; 12]);

        let err = open_wrapped_key(&secret, &wrapped).unwrap_err();
        assert!(matches!(err, KeyWrappingError::MalformedWrappedKey(_)));
    }

    #[tokio::test]
    async fn test_local_wallet_reports_malformed_key() {
        let wallet = Arc::new(LocalWallet::generate());
        let mut wrapped =
            KeyWrappingService::wrap_content_key(&generate_key(), &wallet.identity()).unwrap();
        wrapped.ephemeral_public_key = "not base64!".into();

        let err = KeyWrappingService::new(wallet)
            .unwrap_content_key(&wrapped)
            .await
            .unwrap_err();
        assert!(matches!(err, KeyWrappingError::MalformedWrappedKey(_)), "{err:?}");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_tampered_ciphertext() {
        let secret = StaticSecret::from([3u8; 32]);
        let identity = RecipientIdentity::from_public_key(PublicKey::from(&secret).to_bytes());
        let mut wrapped = KeyWrappingService::wrap_content_key(&generate_key(), &identity).unwrap();

        let mut ct = STANDARD.decode(&wrapped.ciphertext).unwrap();
        ct[0] ^= 0x01;
        wrapped.ciphertext = STANDARD.encode(ct);

        assert!(matches!(
            open_wrapped_key(&secret, &wrapped),
            Err(KeyWrappingError::WrongRecipient)
        ));
    }

    #[test]
    fn test_wrapped_key_wire_names() {
        let wrapped =
            KeyWrappingService::wrap_content_key(&generate_key(), &LocalWallet::generate().identity())
                .unwrap();
        let json = serde_json::to_value(&wrapped).unwrap();
        assert!(json.get("ephemeralPublicKey").is_some());
        assert!(json.get("nonce").is_some());
    }

    #[test]
    fn test_recipient_identity_base64() {
        let identity = LocalWallet::generate().identity();
        let parsed = RecipientIdentity::from_base64(&identity.to_base64()).unwrap();
        assert_eq!(parsed, identity);
        assert!(RecipientIdentity::from_base64("AAAA").is_err());
    }
}
