//! Passphrase-sealed redeem packages in the blob store.
//!
//! PBKDF2 runs on the calling task; with the default 100k rounds expect a
//! short CPU burst per `create` / `redeem`.

use std::sync::Arc;

use secrecy::SecretString;
use tcap_core::resilience::{resilient, ResilienceSettings};
use tcap_core::types::{Clock, RedeemPackage};
use tcap_crypto::{PassphraseVault, VaultError};
use tcap_storage::{BlobStore, ContentAddress};

use crate::error::{corrupt_blob, RedeemError};

pub struct RedeemService {
    blobs: Arc<dyn BlobStore>,
    vault: PassphraseVault,
    clock: Arc<dyn Clock>,
    settings: ResilienceSettings,
}

impl RedeemService {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        vault: PassphraseVault,
        clock: Arc<dyn Clock>,
        settings: ResilienceSettings,
    ) -> Self {
        Self {
            blobs,
            vault,
            clock,
            settings,
        }
    }

    /// Seal `package` and store it; the address is what the sender shares.
    pub async fn create(
        &self,
        package: &RedeemPackage,
        passphrase: &SecretString,
    ) -> Result<ContentAddress, RedeemError> {
        let sealed = self.vault.seal(package, passphrase)?.to_bytes();
        let blobs = &self.blobs;
        let sealed = &sealed;
        let address = resilient(
            "blob put (redeem package)",
            self.settings.blob_timeout,
            &self.settings.retry,
            || blobs.put(sealed.clone()),
        )
        .await
        .map_err(RedeemError::Store)?;

        tracing::info!(%address, "redeem package stored");
        Ok(address)
    }

    /// Fetch and open a package. Expiry is checked against the injected clock.
    ///
    /// A package the store returns damaged fails like a wrong passphrase.
    pub async fn redeem(
        &self,
        address: &str,
        passphrase: &SecretString,
    ) -> Result<RedeemPackage, RedeemError> {
        let blobs = &self.blobs;
        let data = match resilient(
            "blob get (redeem package)",
            self.settings.blob_timeout,
            &self.settings.retry,
            || blobs.get(address),
        )
        .await
        {
            Ok(data) => data,
            Err(failure) if corrupt_blob(&failure).is_some() => {
                tracing::warn!(%address, "redeem package failed content-address verification");
                return Err(VaultError::OpenFailed.into());
            }
            Err(failure) => return Err(RedeemError::Fetch(failure)),
        };

        Ok(self
            .vault
            .open_bytes(&data, passphrase, self.clock.now_ms())?)
    }
}
