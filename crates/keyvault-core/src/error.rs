//! Error types for `keyvault-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. No variant ever includes key material — only identifiers and
//! operation descriptions.

use keyvault_store::StoreError;

/// Errors from cryptographic primitives.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AEAD decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// Ciphertext is too short to contain a valid nonce prefix.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },

    /// Key material could not be parsed for the requested algorithm.
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial { reason: String },

    /// A signing operation failed.
    #[error("signing failed: {reason}")]
    Signing { reason: String },

    /// Key generation failed.
    #[error("key generation failed: {reason}")]
    KeyGeneration { reason: String },

    /// Subkey derivation failed.
    #[error("key derivation failed: {reason}")]
    Derivation { reason: String },

    /// A mnemonic failed BIP39 checksum validation or is malformed.
    #[error("invalid mnemonic: {reason}")]
    InvalidMnemonic { reason: String },
}

/// Errors from the seal/unseal lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    /// An unsealer configuration already exists — `generate_seal` is one-shot.
    #[error("unsealer configuration already exists")]
    AlreadyInitialized,

    /// No unsealer configuration exists yet.
    #[error("vault is not initialized")]
    NotInitialized,

    /// The vault is sealed and the requested operation needs the unsealer key.
    #[error("vault is sealed")]
    Sealed,

    /// The supplied phrase does not match the persisted fingerprint.
    #[error("unauthorized seal material")]
    Unauthorized,

    /// A cryptographic operation failed during seal/unseal.
    #[error("seal crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The store failed.
    #[error("seal store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the key engine. This is the error surface callers see; the
/// variants realize the core's error taxonomy. Signature-verification
/// mismatch is never an error — it is `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The vault is sealed — only seal/unseal operations are possible.
    #[error("vault is sealed")]
    Sealed,

    /// Seal/unseal phrase fingerprint mismatch.
    #[error("unauthorized seal material")]
    UnauthorizedSealMaterial,

    /// The vault or key is not visible to the caller's scope.
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// A required field is missing, a spec is unknown, or a value is malformed.
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    /// secp256k1 signing requires a pre-hashed 32-byte digest.
    #[error("invalid message length: expected a 32-byte digest, got {actual} bytes")]
    InvalidMessageLength { actual: usize },

    /// BIP39 checksum failure or malformed mnemonic.
    #[error("invalid seed: {reason}")]
    InvalidSeed { reason: String },

    /// Derivation requested on a parent spec that does not support it.
    #[error("derivation not supported for {spec} keys")]
    UnsupportedDerivation { spec: String },

    /// AEAD tag mismatch, wrong key, or truncated ciphertext.
    #[error("decryption failed")]
    DecryptionFailed,

    /// RNG failure, persistence failure, or invariant violation.
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl From<SealError> for EngineError {
    fn from(err: SealError) -> Self {
        match err {
            SealError::Sealed => Self::Sealed,
            SealError::Unauthorized => Self::UnauthorizedSealMaterial,
            other => Self::Internal {
                reason: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        // Persistence failures are internal; the engine pre-validates
        // existence itself, so a surfaced store error is never a 404.
        Self::Internal {
            reason: err.to_string(),
        }
    }
}

impl From<CryptoError> for EngineError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decryption { .. } | CryptoError::CiphertextTooShort { .. } => {
                Self::DecryptionFailed
            }
            CryptoError::InvalidMnemonic { reason } => Self::InvalidSeed { reason },
            CryptoError::InvalidKeyMaterial { reason } => Self::InvalidParameter { reason },
            other => Self::Internal {
                reason: other.to_string(),
            },
        }
    }
}
