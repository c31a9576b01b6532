//! Seal/unseal lifecycle for `KeyVault`.
//!
//! The process starts sealed. Proof of knowledge of a 24-word master phrase
//! gates every cryptographic operation:
//!
//! 1. **Generate**: mint a random 24-word BIP39 phrase, persist a double
//!    SHA-512 fingerprint of its canonical form, return phrase + fingerprint
//!    once. One-shot — fails if a configuration already exists.
//!
//! 2. **Unseal**: validate the phrase against the fingerprint, derive the
//!    unsealer KEK via PBKDF2-HMAC-SHA512, cache it in memory. Unsealing an
//!    already-unsealed vault is an idempotent no-op.
//!
//! 3. **Seal**: validate the phrase, then drop the cached KEK (zeroized).
//!
//! # Security model
//!
//! - The phrase is never persisted — only its fingerprint.
//! - The KEK exists only in process memory, inside a zeroize-on-drop
//!   container, and wraps nothing but vault master keys.
//! - State transitions serialize on one `RwLock`; operations that passed the
//!   seal check clone the KEK and hold no lock during cryptographic work.

use std::sync::Arc;

use chrono::Utc;
use keyvault_store::{UnsealerConfigRecord, VaultStore};
use tokio::sync::RwLock;
use tracing::info;
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptionKey, DEFAULT_PBKDF_ITERATIONS};
use crate::error::SealError;
use crate::hdwallet;

/// Result of a successful seal generation. Shown once, never stored.
pub struct GeneratedSeal {
    /// The 24-word unseal phrase.
    pub phrase: Zeroizing<String>,
    /// Hex fingerprint of the canonical phrase: `SHA512(SHA512(phrase))`.
    pub validation_hash: String,
}

impl std::fmt::Debug for GeneratedSeal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedSeal")
            .field("phrase", &"[REDACTED]")
            .field("validation_hash", &self.validation_hash)
            .finish()
    }
}

/// Manages the sealed/unsealed state and the in-memory unsealer KEK.
pub struct SealManager {
    store: Arc<dyn VaultStore>,
    kek: RwLock<Option<EncryptionKey>>,
    pbkdf_iterations: u32,
}

impl SealManager {
    /// Create a sealed manager with the default PBKDF2 iteration count.
    #[must_use]
    pub fn new(store: Arc<dyn VaultStore>) -> Self {
        Self::with_iterations(store, DEFAULT_PBKDF_ITERATIONS)
    }

    /// Create a sealed manager with an explicit PBKDF2 iteration count
    /// (`VAULT_PBKDF_ITERATIONS`).
    #[must_use]
    pub fn with_iterations(store: Arc<dyn VaultStore>, pbkdf_iterations: u32) -> Self {
        Self {
            store,
            kek: RwLock::new(None),
            pbkdf_iterations: pbkdf_iterations.max(1),
        }
    }

    /// Generate the unsealer configuration.
    ///
    /// Returns the phrase and its fingerprint exactly once; neither is
    /// recoverable afterwards. The vault remains sealed.
    ///
    /// # Errors
    ///
    /// - [`SealError::AlreadyInitialized`] if a configuration exists.
    /// - [`SealError::Store`] if persistence fails.
    pub async fn generate_seal(&self) -> Result<GeneratedSeal, SealError> {
        if self.store.get_unsealer_config().await?.is_some() {
            return Err(SealError::AlreadyInitialized);
        }

        let mnemonic = hdwallet::generate_mnemonic()?;
        let phrase = Zeroizing::new(mnemonic.to_string());
        let canonical = Zeroizing::new(crypto::normalize_phrase(&phrase));
        let validation_hash = crypto::phrase_fingerprint(&canonical);

        self.store
            .put_unsealer_config(&UnsealerConfigRecord {
                validation_hash: validation_hash.clone(),
                created_at: Utc::now(),
            })
            .await?;

        info!("unsealer configuration generated");

        Ok(GeneratedSeal {
            phrase,
            validation_hash,
        })
    }

    /// Unseal with the master phrase.
    ///
    /// Idempotent: unsealing an already-unsealed vault succeeds without
    /// touching the cached KEK.
    ///
    /// # Errors
    ///
    /// - [`SealError::NotInitialized`] if no configuration exists.
    /// - [`SealError::Unauthorized`] on fingerprint mismatch.
    /// - [`SealError::Store`] if persistence fails.
    pub async fn unseal(&self, phrase: &str) -> Result<(), SealError> {
        {
            let kek = self.kek.read().await;
            if kek.is_some() {
                return Ok(());
            }
        }

        let canonical = Zeroizing::new(crypto::normalize_phrase(phrase));
        self.validate_phrase(&canonical).await?;

        let derived = crypto::derive_unsealer_kek(&canonical, self.pbkdf_iterations);
        let mut kek = self.kek.write().await;
        *kek = Some(derived);

        info!("vault unsealed");
        Ok(())
    }

    /// Seal the vault, discarding the cached KEK.
    ///
    /// Requires the same proof of knowledge as unseal: a caller who cannot
    /// produce the phrase cannot deny service by sealing.
    ///
    /// # Errors
    ///
    /// - [`SealError::NotInitialized`] if no configuration exists.
    /// - [`SealError::Unauthorized`] on fingerprint mismatch.
    /// - [`SealError::Store`] if persistence fails.
    pub async fn seal(&self, phrase: &str) -> Result<(), SealError> {
        let canonical = Zeroizing::new(crypto::normalize_phrase(phrase));
        self.validate_phrase(&canonical).await?;

        let mut kek = self.kek.write().await;
        *kek = None;

        info!("vault sealed");
        Ok(())
    }

    /// Whether the vault is currently sealed.
    pub async fn is_sealed(&self) -> bool {
        self.kek.read().await.is_none()
    }

    /// Clone the unsealer KEK for the duration of one operation.
    ///
    /// # Errors
    ///
    /// Returns [`SealError::Sealed`] when no KEK is cached.
    pub async fn unsealer_key(&self) -> Result<EncryptionKey, SealError> {
        let kek = self.kek.read().await;
        kek.clone().ok_or(SealError::Sealed)
    }

    async fn validate_phrase(&self, canonical: &str) -> Result<(), SealError> {
        let config = self
            .store
            .get_unsealer_config()
            .await?
            .ok_or(SealError::NotInitialized)?;

        if crypto::phrase_fingerprint(canonical) != config.validation_hash {
            return Err(SealError::Unauthorized);
        }
        Ok(())
    }
}

impl std::fmt::Debug for SealManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealManager")
            .field("pbkdf_iterations", &self.pbkdf_iterations)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use keyvault_store::MemoryStore;

    use super::*;

    /// Low iteration count keeps the suite fast; production uses the default.
    const TEST_ITERATIONS: u32 = 64;

    fn make_manager() -> SealManager {
        SealManager::with_iterations(Arc::new(MemoryStore::new()), TEST_ITERATIONS)
    }

    // ── generate ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn generate_returns_phrase_and_fingerprint() {
        let manager = make_manager();
        let seal = manager.generate_seal().await.unwrap();
        assert_eq!(seal.phrase.split_whitespace().count(), 24);
        assert_eq!(seal.validation_hash.len(), 128);
        assert_eq!(
            seal.validation_hash,
            crypto::phrase_fingerprint(&crypto::normalize_phrase(&seal.phrase))
        );
    }

    #[tokio::test]
    async fn second_generate_fails() {
        let manager = make_manager();
        manager.generate_seal().await.unwrap();
        let err = manager.generate_seal().await.unwrap_err();
        assert!(matches!(err, SealError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn generate_leaves_vault_sealed() {
        let manager = make_manager();
        manager.generate_seal().await.unwrap();
        assert!(manager.is_sealed().await);
    }

    // ── unseal ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn unseal_with_correct_phrase() {
        let manager = make_manager();
        let seal = manager.generate_seal().await.unwrap();
        manager.unseal(&seal.phrase).await.unwrap();
        assert!(!manager.is_sealed().await);
        assert!(manager.unsealer_key().await.is_ok());
    }

    #[tokio::test]
    async fn unseal_is_idempotent() {
        let manager = make_manager();
        let seal = manager.generate_seal().await.unwrap();
        manager.unseal(&seal.phrase).await.unwrap();
        manager.unseal(&seal.phrase).await.unwrap();
        assert!(!manager.is_sealed().await);
    }

    #[tokio::test]
    async fn unseal_with_wrong_phrase_fails() {
        let manager = make_manager();
        let seal = manager.generate_seal().await.unwrap();
        let wrong = seal.phrase.replacen(' ', " x", 1);
        let err = manager.unseal(&wrong).await.unwrap_err();
        assert!(matches!(err, SealError::Unauthorized));
        assert!(manager.is_sealed().await);
    }

    #[tokio::test]
    async fn unseal_before_generate_fails() {
        let manager = make_manager();
        let err = manager.unseal("some phrase").await.unwrap_err();
        assert!(matches!(err, SealError::NotInitialized));
    }

    #[tokio::test]
    async fn unseal_normalizes_phrase() {
        let manager = make_manager();
        let seal = manager.generate_seal().await.unwrap();
        let shouted = format!("  {}  ", seal.phrase.to_uppercase());
        manager.unseal(&shouted).await.unwrap();
        assert!(!manager.is_sealed().await);
    }

    // ── seal ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn seal_discards_kek() {
        let manager = make_manager();
        let seal = manager.generate_seal().await.unwrap();
        manager.unseal(&seal.phrase).await.unwrap();

        manager.seal(&seal.phrase).await.unwrap();
        assert!(manager.is_sealed().await);
        assert!(matches!(
            manager.unsealer_key().await,
            Err(SealError::Sealed)
        ));
    }

    #[tokio::test]
    async fn seal_with_wrong_phrase_fails_and_stays_unsealed() {
        let manager = make_manager();
        let seal = manager.generate_seal().await.unwrap();
        manager.unseal(&seal.phrase).await.unwrap();

        let err = manager.seal("wrong phrase entirely").await.unwrap_err();
        assert!(matches!(err, SealError::Unauthorized));
        assert!(!manager.is_sealed().await);
    }

    #[tokio::test]
    async fn reseal_and_reunseal_cycle() {
        let manager = make_manager();
        let seal = manager.generate_seal().await.unwrap();

        manager.unseal(&seal.phrase).await.unwrap();
        let kek_before = manager.unsealer_key().await.unwrap();

        manager.seal(&seal.phrase).await.unwrap();
        manager.unseal(&seal.phrase).await.unwrap();
        let kek_after = manager.unsealer_key().await.unwrap();

        // The KEK is a pure function of the phrase, so wrapped master keys
        // survive a seal cycle.
        assert_eq!(kek_before.as_bytes(), kek_after.as_bytes());
    }

    // ── misc ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unsealer_key_while_sealed_errors() {
        let manager = make_manager();
        assert!(matches!(
            manager.unsealer_key().await,
            Err(SealError::Sealed)
        ));
    }

    #[test]
    fn debug_does_not_leak() {
        let manager = make_manager();
        let debug = format!("{manager:?}");
        assert!(debug.contains("SealManager"));
        assert!(!debug.contains("kek"));
    }
}
