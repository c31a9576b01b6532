//! The key engine: vault and key lifecycle, algorithm dispatch, envelope
//! encryption, and input validation.
//!
//! Every operation starts with the seal check — a sealed vault fails fast
//! with [`EngineError::Sealed`] before any store or crypto work. Operations
//! that passed the check hold a clone of the unsealer KEK; no lock is held
//! while cryptographic work runs.
//!
//! # Envelope chain
//!
//! - The vault master key's 32-byte secret is wrapped by the unsealer KEK.
//! - Every other secret column is wrapped by the master key plaintext, which
//!   is unwrapped once per operation and never cached.
//!
//! A single unseal therefore unlocks every vault, yet no child secret is
//! ever encrypted directly under the KEK.

use std::sync::Arc;

use chrono::Utc;
use keyvault_store::{KeyRecord, VaultRecord, VaultStore};
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptionKey, NONCE_LEN};
use crate::error::EngineError;
use crate::hdwallet::{self, HdChild, HdWallet};
use crate::key::{
    CreateKeyRequest, CreateVaultRequest, CreatedKey, DeriveKeyRequest, EphemeralMaterial,
    HdWalletOptions, Key, KeyFilter, SignatureOptions, SignatureResponse, Vault, MASTER_KEY_NAME,
};
use crate::seal::SealManager;
use crate::signer::{self, RsaAlgorithm};
use crate::spec::{self, KeySpec, KeyType};

/// The cryptographic core's single entry point. One per process, shared
/// across workers; all state lives in the store and the seal manager.
pub struct KeyEngine {
    store: Arc<dyn VaultStore>,
    seal: Arc<SealManager>,
}

impl KeyEngine {
    /// Create an engine over the given store and seal manager.
    #[must_use]
    pub fn new(store: Arc<dyn VaultStore>, seal: Arc<SealManager>) -> Self {
        Self { store, seal }
    }

    /// The seal manager driving this engine.
    #[must_use]
    pub fn seal_manager(&self) -> &Arc<SealManager> {
        &self.seal
    }

    // ── Vault lifecycle ──────────────────────────────────────────────

    /// Create a vault and synthesize its `master0` key.
    ///
    /// # Errors
    ///
    /// [`EngineError::Sealed`] when sealed; [`EngineError::Internal`] on
    /// store or crypto failure.
    pub async fn create_vault(
        &self,
        scope: &str,
        req: CreateVaultRequest,
    ) -> Result<Vault, EngineError> {
        let kek = self.seal.unsealer_key().await?;

        let vault_id = Uuid::new_v4();
        let master_key_id = Uuid::new_v4();
        let now = Utc::now();

        let master_secret = EncryptionKey::generate();
        let wrapped = crypto::aes_encrypt(&kek, master_secret.as_bytes())
            .map_err(|e| EngineError::Internal {
                reason: format!("master key wrap failed: {e}"),
            })?;

        let vault = VaultRecord {
            id: vault_id,
            owner_scope: scope.to_owned(),
            name: req.name,
            description: req.description,
            master_key_id,
            created_at: now,
        };
        self.store.insert_vault(&vault).await?;

        let master = KeyRecord {
            id: master_key_id,
            vault_id,
            kind: KeySpec::Aes256Gcm.key_type().canonical().to_owned(),
            usage: KeySpec::Aes256Gcm.usage().canonical().to_owned(),
            spec: KeySpec::Aes256Gcm.canonical().to_owned(),
            name: MASTER_KEY_NAME.to_owned(),
            description: "vault master key".to_owned(),
            public_key: None,
            address: None,
            derivation_path: None,
            private_key_ciphertext: Some(wrapped),
            seed_ciphertext: None,
            mnemonic_ciphertext: None,
            autosign_counter: 0,
            created_at: now,
        };
        self.store.insert_key(&master).await?;

        info!(target: "audit", scope, vault = %vault_id, "vault created");
        Ok(Vault::from(vault))
    }

    /// List vaults owned by the caller's scope.
    ///
    /// # Errors
    ///
    /// [`EngineError::Sealed`] when sealed.
    pub async fn list_vaults(&self, scope: &str) -> Result<Vec<Vault>, EngineError> {
        self.require_unsealed().await?;
        let vaults = self.store.list_vaults(scope).await?;
        Ok(vaults.into_iter().map(Vault::from).collect())
    }

    /// Delete a vault and every key it owns.
    ///
    /// # Errors
    ///
    /// [`EngineError::Sealed`], [`EngineError::NotFound`].
    pub async fn delete_vault(&self, scope: &str, vault_id: Uuid) -> Result<(), EngineError> {
        self.require_unsealed().await?;
        let vault = self.resolve_vault(scope, vault_id).await?;
        self.store.delete_vault(vault.id).await?;
        info!(target: "audit", scope, vault = %vault_id, "vault deleted");
        Ok(())
    }

    // ── Key lifecycle ────────────────────────────────────────────────

    /// Create a key in a vault.
    ///
    /// The `(type, usage, spec)` triple is validated against the supported
    /// set; the spec is matched case-insensitively and stored canonical.
    /// Ephemeral keys return their material inline and persist nothing.
    ///
    /// # Errors
    ///
    /// [`EngineError::Sealed`], [`EngineError::NotFound`],
    /// [`EngineError::InvalidParameter`], [`EngineError::InvalidSeed`].
    pub async fn create_key(
        &self,
        scope: &str,
        vault_id: Uuid,
        req: CreateKeyRequest,
    ) -> Result<CreatedKey, EngineError> {
        let kek = self.seal.unsealer_key().await?;
        let vault = self.resolve_vault(scope, vault_id).await?;
        let key_spec = spec::validate_triple(&req.kind, &req.usage, &req.spec)?;

        if req.mnemonic.is_some() && key_spec != KeySpec::Bip39 {
            return Err(EngineError::InvalidParameter {
                reason: format!("a mnemonic can only seed a BIP39 key, not {key_spec}"),
            });
        }

        let material = generate_material(key_spec, req.mnemonic.as_deref())?;
        let key_id = Uuid::new_v4();
        let now = Utc::now();

        let mut record = KeyRecord {
            id: key_id,
            vault_id: vault.id,
            kind: key_spec.key_type().canonical().to_owned(),
            usage: key_spec.usage().canonical().to_owned(),
            spec: key_spec.canonical().to_owned(),
            name: req.name,
            description: req.description,
            public_key: material.public_key.clone(),
            address: material.address.clone(),
            derivation_path: None,
            private_key_ciphertext: None,
            seed_ciphertext: None,
            mnemonic_ciphertext: None,
            autosign_counter: 0,
            created_at: now,
        };

        let ephemeral = if req.ephemeral {
            Some(material.into_ephemeral(key_spec)?)
        } else {
            let master = self.master_key(&vault, &kek).await?;
            record.private_key_ciphertext = material
                .private_key
                .as_ref()
                .map(|secret| wrap_secret(&master, secret))
                .transpose()?;
            record.seed_ciphertext = material
                .seed
                .as_ref()
                .map(|secret| wrap_secret(&master, secret))
                .transpose()?;
            record.mnemonic_ciphertext = material
                .mnemonic
                .as_ref()
                .map(|phrase| wrap_secret(&master, phrase.as_bytes()))
                .transpose()?;
            self.store.insert_key(&record).await?;
            None
        };

        info!(
            target: "audit",
            scope,
            vault = %vault_id,
            key = %key_id,
            spec = %key_spec,
            ephemeral = req.ephemeral,
            "key created"
        );

        Ok(CreatedKey {
            key: Key::from_record(&record)?,
            material: ephemeral,
        })
    }

    /// Derive a child key from a ChaCha20 or BIP39 parent.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnsupportedDerivation`] for any other parent spec,
    /// plus the usual seal/scope/validation failures.
    pub async fn derive_key(
        &self,
        scope: &str,
        vault_id: Uuid,
        parent_id: Uuid,
        req: DeriveKeyRequest,
    ) -> Result<CreatedKey, EngineError> {
        let kek = self.seal.unsealer_key().await?;
        let vault = self.resolve_vault(scope, vault_id).await?;
        let parent = self.load_key(&vault, parent_id).await?;
        let parent_spec = stored_spec(&parent)?;
        let master = self.master_key(&vault, &kek).await?;

        let name = req.name.unwrap_or_else(|| parent.name.clone());
        let description = req.description.unwrap_or_else(|| parent.description.clone());
        let key_id = Uuid::new_v4();
        let now = Utc::now();

        let record = match parent_spec {
            KeySpec::ChaCha20 => {
                let context = req.context.unwrap_or_default();
                if context.len() > crypto::MAX_DERIVATION_CONTEXT_LEN {
                    return Err(EngineError::InvalidParameter {
                        reason: format!(
                            "derivation context must be at most {} bytes, got {}",
                            crypto::MAX_DERIVATION_CONTEXT_LEN,
                            context.len()
                        ),
                    });
                }
                let seed = unwrap_secret(&master, parent.seed_ciphertext.as_deref(), "seed")?;
                let parent_key = EncryptionKey::try_from_slice(&seed).map_err(|e| {
                    EngineError::Internal {
                        reason: format!("stored ChaCha20 seed: {e}"),
                    }
                })?;
                let subkey =
                    crypto::hchacha_subkey(&parent_key, context.as_bytes(), req.nonce.unwrap_or(0))
                        .map_err(|e| EngineError::Internal {
                            reason: format!("subkey derivation: {e}"),
                        })?;

                KeyRecord {
                    id: key_id,
                    vault_id: vault.id,
                    kind: KeySpec::ChaCha20.key_type().canonical().to_owned(),
                    usage: KeySpec::ChaCha20.usage().canonical().to_owned(),
                    spec: KeySpec::ChaCha20.canonical().to_owned(),
                    name,
                    description,
                    public_key: None,
                    address: None,
                    derivation_path: None,
                    private_key_ciphertext: None,
                    seed_ciphertext: Some(wrap_secret(&master, subkey.as_bytes())?),
                    mnemonic_ciphertext: None,
                    autosign_counter: 0,
                    created_at: now,
                }
            }
            KeySpec::Bip39 => {
                let wallet = self.load_wallet(&master, &parent)?;
                let path = resolve_hd_path(req.hdwallet.as_ref())?;
                let child = derive_child(&wallet, &path)?;

                // The parent mnemonic is the system of record — the child's
                // private key is re-derived on demand, never persisted.
                KeyRecord {
                    id: key_id,
                    vault_id: vault.id,
                    kind: KeySpec::Secp256k1.key_type().canonical().to_owned(),
                    usage: KeySpec::Secp256k1.usage().canonical().to_owned(),
                    spec: KeySpec::Secp256k1.canonical().to_owned(),
                    name,
                    description,
                    public_key: Some(child.public_key_hex),
                    address: Some(child.address),
                    derivation_path: Some(child.path),
                    private_key_ciphertext: None,
                    seed_ciphertext: None,
                    mnemonic_ciphertext: None,
                    autosign_counter: 0,
                    created_at: now,
                }
            }
            other => {
                return Err(EngineError::UnsupportedDerivation {
                    spec: other.canonical().to_owned(),
                })
            }
        };

        self.store.insert_key(&record).await?;

        info!(
            target: "audit",
            scope,
            vault = %vault_id,
            parent = %parent_id,
            key = %key_id,
            "key derived"
        );

        Ok(CreatedKey {
            key: Key::from_record(&record)?,
            material: None,
        })
    }

    /// Hard-delete a key.
    ///
    /// # Errors
    ///
    /// [`EngineError::NotFound`] for an absent key;
    /// [`EngineError::InvalidParameter`] for the master key, which can only
    /// go with its vault.
    pub async fn delete_key(
        &self,
        scope: &str,
        vault_id: Uuid,
        key_id: Uuid,
    ) -> Result<(), EngineError> {
        self.require_unsealed().await?;
        let vault = self.resolve_vault(scope, vault_id).await?;
        let key = self.load_key(&vault, key_id).await?;

        if key.id == vault.master_key_id {
            return Err(EngineError::InvalidParameter {
                reason: "the vault master key cannot be deleted".to_owned(),
            });
        }

        self.store.delete_key(vault.id, key.id).await?;
        info!(target: "audit", scope, vault = %vault_id, key = %key_id, "key deleted");
        Ok(())
    }

    /// List keys in a vault, optionally filtered by type and/or spec.
    ///
    /// Filter values are canonicalized before comparison; a value matching
    /// no canonical form yields an empty list. The master key is subject to
    /// the same filter as every other key, so an unfiltered listing counts
    /// `children + 1`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Sealed`], [`EngineError::NotFound`].
    pub async fn list_keys(
        &self,
        scope: &str,
        vault_id: Uuid,
        filter: KeyFilter,
    ) -> Result<Vec<Key>, EngineError> {
        self.require_unsealed().await?;
        let vault = self.resolve_vault(scope, vault_id).await?;

        let kind_filter = match filter.kind.as_deref() {
            None => None,
            Some(raw) => match KeyType::parse(raw) {
                Some(kind) => Some(kind),
                None => return Ok(Vec::new()),
            },
        };
        let spec_filter = match filter.spec.as_deref() {
            None => None,
            Some(raw) => match KeySpec::parse(raw) {
                Some(spec) => Some(spec),
                None => return Ok(Vec::new()),
            },
        };

        let records = self.store.list_keys(vault.id).await?;
        let mut keys = Vec::with_capacity(records.len());
        for record in &records {
            let key = Key::from_record(record)?;
            if kind_filter.is_some_and(|kind| key.kind != kind) {
                continue;
            }
            if spec_filter.is_some_and(|spec| key.spec != spec) {
                continue;
            }
            keys.push(key);
        }
        Ok(keys)
    }

    // ── Sign / verify ────────────────────────────────────────────────

    /// Sign a hex-encoded message with a stored key.
    ///
    /// secp256k1 (and HD children, which are secp256k1) require a pre-hashed
    /// 32-byte digest. BIP39 parents never sign directly: with
    /// `opts.hdwallet` the selected child signs; without, the per-key
    /// autosign counter picks the next child and the response carries the
    /// address and path used.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidMessageLength`] for a non-digest secp256k1
    /// input, [`EngineError::InvalidParameter`] for a missing RSA algorithm,
    /// plus the usual seal/scope failures.
    pub async fn sign_message(
        &self,
        scope: &str,
        vault_id: Uuid,
        key_id: Uuid,
        message_hex: &str,
        opts: SignatureOptions,
    ) -> Result<SignatureResponse, EngineError> {
        let kek = self.seal.unsealer_key().await?;
        let vault = self.resolve_vault(scope, vault_id).await?;
        let key = self.load_key(&vault, key_id).await?;
        let key_spec = stored_spec(&key)?;
        let message = decode_hex("message", message_hex)?;
        let master = self.master_key(&vault, &kek).await?;

        let response = match key_spec {
            KeySpec::Aes256Gcm | KeySpec::ChaCha20 => {
                return Err(EngineError::InvalidParameter {
                    reason: format!("{key_spec} keys cannot sign"),
                })
            }
            KeySpec::Ed25519 => {
                let seed = unwrap_secret(&master, key.seed_ciphertext.as_deref(), "seed")?;
                plain_signature(signer::ed25519_sign(&seed, &message)?)
            }
            KeySpec::Ed25519Nkey => {
                let seed = unwrap_secret(&master, key.seed_ciphertext.as_deref(), "seed")?;
                plain_signature(signer::nkey_sign(&seed, &message)?)
            }
            KeySpec::C25519 => {
                let private =
                    unwrap_secret(&master, key.private_key_ciphertext.as_deref(), "private key")?;
                plain_signature(signer::c25519_sign(&private, &message)?)
            }
            KeySpec::Secp256k1 => {
                let digest = require_digest(&message)?;
                let private =
                    unwrap_secret(&master, key.private_key_ciphertext.as_deref(), "private key")?;
                plain_signature(signer::secp256k1_sign(&private, &digest)?)
            }
            KeySpec::BabyJubJub => {
                let private =
                    unwrap_secret(&master, key.private_key_ciphertext.as_deref(), "private key")?;
                plain_signature(signer::babyjubjub_sign(&private, &message)?)
            }
            KeySpec::Rsa2048 | KeySpec::Rsa3072 | KeySpec::Rsa4096 => {
                let algorithm = require_rsa_algorithm(&opts)?;
                let private =
                    unwrap_secret(&master, key.private_key_ciphertext.as_deref(), "private key")?;
                plain_signature(signer::rsa_sign(&private, algorithm, &message)?)
            }
            KeySpec::Bip39 => {
                let digest = require_digest(&message)?;
                let wallet = self.load_wallet(&master, &key)?;

                let child = if opts.hdwallet.is_some() {
                    let path = resolve_hd_path(opts.hdwallet.as_ref())?;
                    derive_child(&wallet, &path)?
                } else {
                    let index = self.reserve_autosign_index(&vault, key.id).await?;
                    derive_child(&wallet, &hdwallet::autosign_path(index))?
                };

                let signature = child.sign_digest(&digest).map_err(EngineError::from)?;
                SignatureResponse {
                    signature: hex::encode(signature),
                    address: Some(child.address),
                    derivation_path: Some(child.path),
                }
            }
        };

        info!(
            target: "audit",
            scope,
            vault = %vault_id,
            key = %key_id,
            spec = %key_spec,
            "message signed"
        );
        Ok(response)
    }

    /// Verify a signature made by a stored key. Mirrors [`sign_message`]'s
    /// dispatch; for BIP39 parents `opts.hdwallet` selects the child whose
    /// public key is checked (defaulting to the first account child).
    ///
    /// A well-formed but mismatched signature is `Ok(false)`, not an error.
    ///
    /// # Errors
    ///
    /// Same validation failures as [`sign_message`].
    ///
    /// [`sign_message`]: KeyEngine::sign_message
    pub async fn verify_signature(
        &self,
        scope: &str,
        vault_id: Uuid,
        key_id: Uuid,
        message_hex: &str,
        signature_hex: &str,
        opts: SignatureOptions,
    ) -> Result<bool, EngineError> {
        let kek = self.seal.unsealer_key().await?;
        let vault = self.resolve_vault(scope, vault_id).await?;
        let key = self.load_key(&vault, key_id).await?;
        let key_spec = stored_spec(&key)?;
        let message = decode_hex("message", message_hex)?;
        let signature = decode_hex("signature", signature_hex)?;

        match key_spec {
            KeySpec::Aes256Gcm | KeySpec::ChaCha20 => Err(EngineError::InvalidParameter {
                reason: format!("{key_spec} keys cannot verify signatures"),
            }),
            KeySpec::Ed25519 => {
                let public = stored_public_bytes(&key)?;
                verify_internal(signer::ed25519_verify(&public, &message, &signature))
            }
            KeySpec::Ed25519Nkey => {
                let public = stored_public(&key)?;
                verify_internal(signer::nkey_verify(public, &message, &signature))
            }
            KeySpec::C25519 => {
                let master = self.master_key(&vault, &kek).await?;
                let private =
                    unwrap_secret(&master, key.private_key_ciphertext.as_deref(), "private key")?;
                verify_internal(signer::c25519_verify_with_private(
                    &private, &message, &signature,
                ))
            }
            KeySpec::Secp256k1 => {
                let digest = require_digest(&message)?;
                let public = stored_public_bytes(&key)?;
                verify_internal(signer::secp256k1_verify(&public, &digest, &signature))
            }
            KeySpec::BabyJubJub => {
                let public = stored_public_bytes(&key)?;
                verify_internal(signer::babyjubjub_verify(&public, &message, &signature))
            }
            KeySpec::Rsa2048 | KeySpec::Rsa3072 | KeySpec::Rsa4096 => {
                let algorithm = require_rsa_algorithm(&opts)?;
                let public = stored_public(&key)?;
                verify_internal(signer::rsa_verify(public, algorithm, &message, &signature))
            }
            KeySpec::Bip39 => {
                let digest = require_digest(&message)?;
                let master = self.master_key(&vault, &kek).await?;
                let wallet = self.load_wallet(&master, &key)?;
                let path = resolve_hd_path(opts.hdwallet.as_ref())?;
                let child = derive_child(&wallet, &path)?;
                child
                    .verify_digest(&digest, &signature)
                    .map_err(EngineError::from)
            }
        }
    }

    /// Verify a signature without referencing any stored key.
    ///
    /// Requires `spec`, `message_hex`, `signature_hex`, and `public_key`
    /// (hex for the elliptic curves, NKey text for Ed25519-NKey, SPKI PEM
    /// for RSA); RSA additionally requires `opts.algorithm`. Missing or
    /// unknown inputs are [`EngineError::InvalidParameter`]; a genuine but
    /// mismatched signature is `Ok(false)`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Sealed`], [`EngineError::InvalidParameter`].
    pub async fn verify_detached_signature(
        &self,
        spec_input: &str,
        message_hex: &str,
        signature_hex: &str,
        public_key: &str,
        opts: SignatureOptions,
    ) -> Result<bool, EngineError> {
        self.require_unsealed().await?;

        let spec_input = require_field("spec", spec_input)?;
        let message_hex = require_field("message", message_hex)?;
        let signature_hex = require_field("signature", signature_hex)?;
        let public_key = require_field("public_key", public_key)?;

        let key_spec = KeySpec::parse(spec_input).ok_or_else(|| EngineError::InvalidParameter {
            reason: format!("unknown key spec '{spec_input}'"),
        })?;
        let message = decode_hex("message", message_hex)?;
        let signature = decode_hex("signature", signature_hex)?;

        match key_spec {
            KeySpec::Ed25519 => {
                let public = decode_hex("public_key", public_key)?;
                verify_detached(signer::ed25519_verify(&public, &message, &signature))
            }
            KeySpec::Ed25519Nkey => {
                verify_detached(signer::nkey_verify(public_key, &message, &signature))
            }
            KeySpec::C25519 => {
                // Detached C25519 verification takes the Edwards-form public
                // key; the Montgomery form cannot check a signature.
                let public = decode_hex("public_key", public_key)?;
                verify_detached(signer::ed25519_verify(&public, &message, &signature))
            }
            KeySpec::Secp256k1 => {
                let digest = require_digest(&message)?;
                let public = decode_hex("public_key", public_key)?;
                verify_detached(signer::secp256k1_verify(&public, &digest, &signature))
            }
            KeySpec::BabyJubJub => {
                let public = decode_hex("public_key", public_key)?;
                verify_detached(signer::babyjubjub_verify(&public, &message, &signature))
            }
            KeySpec::Rsa2048 | KeySpec::Rsa3072 | KeySpec::Rsa4096 => {
                let algorithm = require_rsa_algorithm(&opts)?;
                verify_detached(signer::rsa_verify(public_key, algorithm, &message, &signature))
            }
            KeySpec::Bip39 | KeySpec::Aes256Gcm | KeySpec::ChaCha20 => {
                Err(EngineError::InvalidParameter {
                    reason: format!("{key_spec} does not support detached verification"),
                })
            }
        }
    }

    // ── Encrypt / decrypt ────────────────────────────────────────────

    /// Encrypt UTF-8 data with a symmetric key. Returns hex of
    /// `nonce || ciphertext [|| tag]`.
    ///
    /// The nonce is a hex string of at most 12 bytes (odd-length input gets
    /// a leading zero, short input is left-padded with zeros) or absent for
    /// a random nonce.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidParameter`] for an asymmetric key or a bad
    /// nonce, plus the usual seal/scope failures.
    pub async fn encrypt(
        &self,
        scope: &str,
        vault_id: Uuid,
        key_id: Uuid,
        data: &str,
        nonce: Option<&str>,
    ) -> Result<String, EngineError> {
        let kek = self.seal.unsealer_key().await?;
        let vault = self.resolve_vault(scope, vault_id).await?;
        let key = self.load_key(&vault, key_id).await?;
        let key_spec = stored_spec(&key)?;
        let master = self.master_key(&vault, &kek).await?;

        let nonce = match nonce {
            Some(raw) => parse_nonce(raw)?,
            None => crypto::random_nonce(),
        };

        let ciphertext = match key_spec {
            KeySpec::Aes256Gcm => {
                let secret =
                    unwrap_secret(&master, key.private_key_ciphertext.as_deref(), "private key")?;
                let data_key = data_key_from(&secret)?;
                crypto::aes_encrypt_with_nonce(&data_key, &nonce, data.as_bytes()).map_err(|e| {
                    EngineError::Internal {
                        reason: format!("encryption failed: {e}"),
                    }
                })?
            }
            KeySpec::ChaCha20 => {
                let secret = unwrap_secret(&master, key.seed_ciphertext.as_deref(), "seed")?;
                let data_key = data_key_from(&secret)?;
                crypto::chacha_encrypt(&data_key, &nonce, data.as_bytes())
            }
            other => {
                return Err(EngineError::InvalidParameter {
                    reason: format!("{other} keys cannot encrypt"),
                })
            }
        };

        info!(target: "audit", scope, vault = %vault_id, key = %key_id, "data encrypted");
        Ok(hex::encode(ciphertext))
    }

    /// Decrypt hex ciphertext produced by [`encrypt`]. Returns the UTF-8
    /// plaintext.
    ///
    /// # Errors
    ///
    /// [`EngineError::DecryptionFailed`] on tag mismatch, truncation, or
    /// non-UTF-8 plaintext.
    ///
    /// [`encrypt`]: KeyEngine::encrypt
    pub async fn decrypt(
        &self,
        scope: &str,
        vault_id: Uuid,
        key_id: Uuid,
        data_hex: &str,
    ) -> Result<String, EngineError> {
        let kek = self.seal.unsealer_key().await?;
        let vault = self.resolve_vault(scope, vault_id).await?;
        let key = self.load_key(&vault, key_id).await?;
        let key_spec = stored_spec(&key)?;
        let master = self.master_key(&vault, &kek).await?;
        let ciphertext = decode_hex("data", data_hex)?;

        let plaintext = match key_spec {
            KeySpec::Aes256Gcm => {
                let secret =
                    unwrap_secret(&master, key.private_key_ciphertext.as_deref(), "private key")?;
                let data_key = data_key_from(&secret)?;
                Zeroizing::new(
                    crypto::aes_decrypt(&data_key, &ciphertext)
                        .map_err(|_| EngineError::DecryptionFailed)?,
                )
            }
            KeySpec::ChaCha20 => {
                let secret = unwrap_secret(&master, key.seed_ciphertext.as_deref(), "seed")?;
                let data_key = data_key_from(&secret)?;
                Zeroizing::new(
                    crypto::chacha_decrypt(&data_key, &ciphertext)
                        .map_err(|_| EngineError::DecryptionFailed)?,
                )
            }
            other => {
                return Err(EngineError::InvalidParameter {
                    reason: format!("{other} keys cannot decrypt"),
                })
            }
        };

        String::from_utf8(plaintext.to_vec()).map_err(|_| EngineError::DecryptionFailed)
    }

    // ── Internal helpers ─────────────────────────────────────────────

    async fn require_unsealed(&self) -> Result<(), EngineError> {
        if self.seal.is_sealed().await {
            return Err(EngineError::Sealed);
        }
        Ok(())
    }

    /// Resolve a vault for the caller's scope. A scope mismatch is reported
    /// as absence — the API never confirms another tenant's vault exists.
    async fn resolve_vault(&self, scope: &str, vault_id: Uuid) -> Result<VaultRecord, EngineError> {
        let vault = self.store.get_vault(vault_id).await?;
        match vault {
            Some(vault) if vault.owner_scope == scope => Ok(vault),
            _ => Err(EngineError::NotFound {
                resource: format!("vault {vault_id}"),
            }),
        }
    }

    async fn load_key(
        &self,
        vault: &VaultRecord,
        key_id: Uuid,
    ) -> Result<KeyRecord, EngineError> {
        self.store
            .get_key(vault.id, key_id)
            .await?
            .ok_or_else(|| EngineError::NotFound {
                resource: format!("key {key_id}"),
            })
    }

    /// Unwrap the vault's master key with the unsealer KEK. Derived per
    /// operation, never cached.
    async fn master_key(
        &self,
        vault: &VaultRecord,
        kek: &EncryptionKey,
    ) -> Result<EncryptionKey, EngineError> {
        let record = self
            .store
            .get_key(vault.id, vault.master_key_id)
            .await?
            .ok_or_else(|| EngineError::Internal {
                reason: format!("vault {} has no master key row", vault.id),
            })?;
        let wrapped =
            record
                .private_key_ciphertext
                .as_deref()
                .ok_or_else(|| EngineError::Internal {
                    reason: format!("vault {} master key has no ciphertext", vault.id),
                })?;
        let plaintext = Zeroizing::new(crypto::aes_decrypt(kek, wrapped).map_err(|e| {
            EngineError::Internal {
                reason: format!("master key unwrap failed: {e}"),
            }
        })?);
        EncryptionKey::try_from_slice(&plaintext).map_err(|e| EngineError::Internal {
            reason: format!("master key plaintext: {e}"),
        })
    }

    fn load_wallet(
        &self,
        master: &EncryptionKey,
        key: &KeyRecord,
    ) -> Result<HdWallet, EngineError> {
        let phrase_bytes = unwrap_secret(master, key.mnemonic_ciphertext.as_deref(), "mnemonic")?;
        let phrase = Zeroizing::new(
            String::from_utf8(phrase_bytes.to_vec()).map_err(|_| EngineError::Internal {
                reason: format!("key {} mnemonic is not UTF-8", key.id),
            })?,
        );
        HdWallet::from_phrase(&phrase).map_err(|e| EngineError::Internal {
            reason: format!("stored mnemonic for key {}: {e}", key.id),
        })
    }

    /// Reserve the next autosign index with a single-row CAS; two concurrent
    /// signers always get distinct, increasing indices.
    async fn reserve_autosign_index(
        &self,
        vault: &VaultRecord,
        key_id: Uuid,
    ) -> Result<u32, EngineError> {
        loop {
            let record = self
                .store
                .get_key(vault.id, key_id)
                .await?
                .ok_or_else(|| EngineError::NotFound {
                    resource: format!("key {key_id}"),
                })?;
            let current = record.autosign_counter;
            let next = current.checked_add(1).ok_or_else(|| EngineError::Internal {
                reason: format!("autosign counter exhausted for key {key_id}"),
            })?;
            if self
                .store
                .cas_autosign_counter(vault.id, key_id, current, next)
                .await?
            {
                return Ok(current);
            }
        }
    }
}

impl std::fmt::Debug for KeyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEngine").finish_non_exhaustive()
    }
}

// ── Free helpers ─────────────────────────────────────────────────────

/// Freshly generated key material before wrapping. Secret buffers zeroize.
struct Material {
    public_key: Option<String>,
    address: Option<String>,
    private_key: Option<Zeroizing<Vec<u8>>>,
    seed: Option<Zeroizing<Vec<u8>>>,
    mnemonic: Option<Zeroizing<String>>,
}

impl Material {
    fn into_ephemeral(self, spec: KeySpec) -> Result<EphemeralMaterial, EngineError> {
        let seed = match (spec, &self.seed) {
            // NKeys hand out their seed in the NATS text encoding.
            (KeySpec::Ed25519Nkey, Some(seed)) => Some(Zeroizing::new(
                signer::nkey_seed_string(seed).map_err(|e| EngineError::Internal {
                    reason: e.to_string(),
                })?,
            )),
            (_, Some(seed)) => Some(Zeroizing::new(hex::encode(seed.as_slice()))),
            (_, None) => None,
        };
        Ok(EphemeralMaterial {
            private_key: self
                .private_key
                .as_ref()
                .map(|secret| Zeroizing::new(hex::encode(secret.as_slice()))),
            seed,
            mnemonic: self.mnemonic,
        })
    }
}

fn generate_material(spec: KeySpec, mnemonic: Option<&str>) -> Result<Material, EngineError> {
    let mut material = Material {
        public_key: None,
        address: None,
        private_key: None,
        seed: None,
        mnemonic: None,
    };

    match spec {
        KeySpec::Aes256Gcm => {
            let key = EncryptionKey::generate();
            material.private_key = Some(Zeroizing::new(key.as_bytes().to_vec()));
        }
        KeySpec::ChaCha20 => {
            let key = EncryptionKey::generate();
            material.seed = Some(Zeroizing::new(key.as_bytes().to_vec()));
        }
        KeySpec::Ed25519 => {
            let (seed, public) = signer::ed25519_generate();
            material.seed = Some(Zeroizing::new(seed.to_vec()));
            material.public_key = Some(hex::encode(public));
        }
        KeySpec::Ed25519Nkey => {
            let (seed, public) = signer::nkey_generate().map_err(internal)?;
            material.seed = Some(Zeroizing::new(seed.to_vec()));
            material.public_key = Some(public);
        }
        KeySpec::C25519 => {
            let (private, public) = signer::c25519_generate();
            material.private_key = Some(Zeroizing::new(private.to_vec()));
            material.public_key = Some(hex::encode(public));
        }
        KeySpec::Secp256k1 => {
            let (private, public) = signer::secp256k1_generate();
            material.address = Some(signer::evm_address(&public).map_err(internal)?);
            material.private_key = Some(Zeroizing::new(private.to_vec()));
            material.public_key = Some(hex::encode(public));
        }
        KeySpec::BabyJubJub => {
            let (private, public) = signer::babyjubjub_generate().map_err(internal)?;
            material.private_key = Some(Zeroizing::new(private.to_vec()));
            material.public_key = Some(hex::encode(public));
        }
        KeySpec::Bip39 => {
            let wallet = match mnemonic {
                Some(phrase) => HdWallet::from_phrase(phrase).map_err(|e| {
                    EngineError::InvalidSeed {
                        reason: e.to_string(),
                    }
                })?,
                None => HdWallet::generate().map_err(internal)?,
            };
            material.public_key = Some(wallet.master_xpub().map_err(internal)?);
            material.seed = Some(Zeroizing::new(wallet.seed().to_vec()));
            material.mnemonic = Some(wallet.phrase());
        }
        KeySpec::Rsa2048 | KeySpec::Rsa3072 | KeySpec::Rsa4096 => {
            let bits = spec.rsa_bits().unwrap_or(2048);
            let (der, pem) = signer::rsa_generate(bits).map_err(internal)?;
            material.private_key = Some(Zeroizing::new(der.to_vec()));
            material.public_key = Some(pem);
        }
    }

    Ok(material)
}

fn internal(err: crate::error::CryptoError) -> EngineError {
    EngineError::Internal {
        reason: err.to_string(),
    }
}

fn stored_spec(record: &KeyRecord) -> Result<KeySpec, EngineError> {
    KeySpec::parse(&record.spec).ok_or_else(|| EngineError::Internal {
        reason: format!("stored key {} has unknown spec '{}'", record.id, record.spec),
    })
}

fn stored_public(record: &KeyRecord) -> Result<&str, EngineError> {
    record
        .public_key
        .as_deref()
        .ok_or_else(|| EngineError::Internal {
            reason: format!("key {} has no public key", record.id),
        })
}

fn stored_public_bytes(record: &KeyRecord) -> Result<Vec<u8>, EngineError> {
    let public = stored_public(record)?;
    hex::decode(public).map_err(|_| EngineError::Internal {
        reason: format!("key {} public key is not hex", record.id),
    })
}

fn wrap_secret(master: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, EngineError> {
    crypto::aes_encrypt(master, plaintext).map_err(|e| EngineError::Internal {
        reason: format!("secret wrap failed: {e}"),
    })
}

fn unwrap_secret(
    master: &EncryptionKey,
    ciphertext: Option<&[u8]>,
    what: &str,
) -> Result<Zeroizing<Vec<u8>>, EngineError> {
    let ciphertext = ciphertext.ok_or_else(|| EngineError::Internal {
        reason: format!("key has no {what} ciphertext"),
    })?;
    crypto::aes_decrypt(master, ciphertext)
        .map(Zeroizing::new)
        .map_err(|e| EngineError::Internal {
            reason: format!("{what} unwrap failed: {e}"),
        })
}

fn data_key_from(secret: &[u8]) -> Result<EncryptionKey, EngineError> {
    EncryptionKey::try_from_slice(secret).map_err(|e| EngineError::Internal {
        reason: format!("stored data key: {e}"),
    })
}

fn decode_hex(field: &str, input: &str) -> Result<Vec<u8>, EngineError> {
    hex::decode(input).map_err(|_| EngineError::InvalidParameter {
        reason: format!("{field} must be hex-encoded"),
    })
}

fn require_field<'a>(name: &str, value: &'a str) -> Result<&'a str, EngineError> {
    if value.is_empty() {
        return Err(EngineError::InvalidParameter {
            reason: format!("{name} is required"),
        });
    }
    Ok(value)
}

fn require_digest(message: &[u8]) -> Result<[u8; 32], EngineError> {
    message
        .try_into()
        .map_err(|_| EngineError::InvalidMessageLength {
            actual: message.len(),
        })
}

fn require_rsa_algorithm(opts: &SignatureOptions) -> Result<RsaAlgorithm, EngineError> {
    let raw = opts
        .algorithm
        .as_deref()
        .ok_or_else(|| EngineError::InvalidParameter {
            reason: "RSA operations require an algorithm (RS256..PS512)".to_owned(),
        })?;
    RsaAlgorithm::parse(raw).ok_or_else(|| EngineError::InvalidParameter {
        reason: format!("unknown RSA algorithm '{raw}'"),
    })
}

/// Resolve the HD path from caller options. Precedence: explicit path, then
/// `coin` + `index`, then `coin_abbr` + `index`; everything defaults to the
/// first Ethereum account child. Unknown coin *numbers* derive anyway —
/// derivation is coin-agnostic — but an unknown abbreviation has no number
/// to derive with and rejects.
fn resolve_hd_path(opts: Option<&HdWalletOptions>) -> Result<String, EngineError> {
    let Some(opts) = opts else {
        return Ok(hdwallet::account_path(hdwallet::ETH_COIN_TYPE, 0));
    };

    if let Some(path) = opts.hd_derivation_path.as_deref() {
        return Ok(path.to_owned());
    }

    let coin = match (opts.coin, opts.coin_abbr.as_deref()) {
        (Some(coin), _) => coin,
        (None, Some(abbr)) => {
            hdwallet::slip44_coin(abbr).ok_or_else(|| EngineError::InvalidParameter {
                reason: format!("unknown coin abbreviation '{abbr}'"),
            })?
        }
        (None, None) => hdwallet::ETH_COIN_TYPE,
    };

    Ok(hdwallet::account_path(coin, opts.index.unwrap_or(0)))
}

fn derive_child(wallet: &HdWallet, path: &str) -> Result<HdChild, EngineError> {
    wallet
        .derive_child(path)
        .map_err(|e| EngineError::InvalidParameter {
            reason: format!("hd derivation: {e}"),
        })
}

fn plain_signature(signature: Vec<u8>) -> SignatureResponse {
    SignatureResponse {
        signature: hex::encode(signature),
        address: None,
        derivation_path: None,
    }
}

/// Stored-key verification: a bad stored public key is an internal fault.
fn verify_internal(
    result: Result<bool, crate::error::CryptoError>,
) -> Result<bool, EngineError> {
    result.map_err(|e| EngineError::Internal {
        reason: format!("stored public key: {e}"),
    })
}

/// Detached verification: a bad caller-supplied public key is the caller's
/// problem.
fn verify_detached(
    result: Result<bool, crate::error::CryptoError>,
) -> Result<bool, EngineError> {
    result.map_err(|e| EngineError::InvalidParameter {
        reason: e.to_string(),
    })
}

/// Parse a caller-supplied nonce: hex, at most 12 bytes once decoded. An
/// odd-length string gets a leading zero; short values are left-padded so
/// `"1"` becomes the nonce `0x00..01`.
fn parse_nonce(input: &str) -> Result<[u8; NONCE_LEN], EngineError> {
    let mut normalized = input.to_owned();
    if normalized.len() % 2 == 1 {
        normalized.insert(0, '0');
    }
    let bytes = hex::decode(&normalized).map_err(|_| EngineError::InvalidParameter {
        reason: "nonce must be hex-encoded".to_owned(),
    })?;
    if bytes.len() > NONCE_LEN {
        return Err(EngineError::InvalidParameter {
            reason: format!("nonce must be at most {NONCE_LEN} bytes, got {}", bytes.len()),
        });
    }

    let mut nonce = [0u8; NONCE_LEN];
    nonce[NONCE_LEN - bytes.len()..].copy_from_slice(&bytes);
    Ok(nonce)
}
