//! Symmetric primitives for `KeyVault`.
//!
//! Provides AES-256-GCM authenticated encryption, raw ChaCha20 stream
//! encryption, HChaCha20 subkey derivation, the PBKDF2 unsealer-KEK
//! derivation, and zeroize-on-drop key containers. All key material is
//! cleared from memory when dropped.
//!
//! # Security model
//!
//! - Every AES encryption uses a 96-bit nonce — fresh from `OsRng` unless the
//!   caller pins one. Ciphertext format: `nonce (12) || ciphertext || tag (16)`.
//! - ChaCha20 output is `nonce (12) || keystream-xor-plaintext` with no
//!   authentication tag: confidentiality only. Callers that need integrity
//!   use AES-256-GCM.
//! - The unsealer KEK comes from PBKDF2-HMAC-SHA512 over the normalized
//!   phrase with a fixed domain-separation salt.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chacha20::cipher::consts::U10;
use chacha20::cipher::generic_array::GenericArray;
use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use unicode_normalization::UnicodeNormalization;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;

/// Nonce length shared by AES-256-GCM and IETF ChaCha20 (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM authentication tag length.
const TAG_LEN: usize = 16;

/// Minimum AES ciphertext length: nonce + tag.
const MIN_AEAD_CIPHERTEXT_LEN: usize = NONCE_LEN + TAG_LEN;

/// Domain-separation salt for the unsealer KEK derivation.
const UNSEALER_KEK_SALT: &[u8] = b"keyvault-unsealer-kek-v1";

/// Default PBKDF2-HMAC-SHA512 iteration count for the unsealer KEK.
/// Overridable at runtime via `VAULT_PBKDF_ITERATIONS`.
pub const DEFAULT_PBKDF_ITERATIONS: u32 = 210_000;

/// A 256-bit key that is zeroized on drop.
///
/// Used for the unsealer KEK, vault master keys, AES keys, and ChaCha20
/// seeds. The inner bytes never appear in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// Use with care — the caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a key from an unwrapped secret buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyMaterial`] when the buffer is not
    /// exactly 32 bytes.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyMaterial {
                reason: format!("expected 32 bytes, got {}", bytes.len()),
            })?;
        Ok(Self(array))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Fill a buffer with OS CSPRNG randomness.
pub fn random_bytes(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Generate a fresh 12-byte nonce.
#[must_use]
pub fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// ── AES-256-GCM ──────────────────────────────────────────────────────

/// Encrypt plaintext with AES-256-GCM under a fresh random nonce.
///
/// Returns `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn aes_encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    aes_encrypt_with_nonce(key, &random_nonce(), plaintext)
}

/// Encrypt plaintext with AES-256-GCM under a caller-pinned nonce.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn aes_encrypt_with_nonce(
    key: &EncryptionKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut combined = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
    combined.extend_from_slice(nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Decrypt ciphertext produced by [`aes_encrypt`].
///
/// # Errors
///
/// Returns [`CryptoError::CiphertextTooShort`] if the input cannot contain a
/// nonce and tag, or [`CryptoError::Decryption`] if authentication fails
/// (wrong key, corrupted data, or tampered tag).
pub fn aes_decrypt(key: &EncryptionKey, combined: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if combined.len() < MIN_AEAD_CIPHERTEXT_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: MIN_AEAD_CIPHERTEXT_LEN,
            actual: combined.len(),
        });
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}

// ── ChaCha20 (raw stream cipher) ─────────────────────────────────────

/// Encrypt plaintext with IETF ChaCha20 keyed by a 32-byte seed.
///
/// Returns `nonce (12 bytes) || keystream-xor-plaintext`. There is no
/// authentication tag — the output provides confidentiality only.
#[must_use]
pub fn chacha_encrypt(key: &EncryptionKey, nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Vec<u8> {
    let mut cipher = ChaCha20::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(nonce),
    );
    let mut body = plaintext.to_vec();
    cipher.apply_keystream(&mut body);

    let mut combined = Vec::with_capacity(NONCE_LEN.saturating_add(body.len()));
    combined.extend_from_slice(nonce);
    combined.extend_from_slice(&body);
    combined
}

/// Decrypt ciphertext produced by [`chacha_encrypt`].
///
/// # Errors
///
/// Returns [`CryptoError::CiphertextTooShort`] if the input is shorter than
/// the nonce prefix. A wrong key is undetectable here — the caller gets
/// garbage plaintext, which is the price of a tagless stream cipher.
pub fn chacha_decrypt(key: &EncryptionKey, combined: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if combined.len() < NONCE_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: NONCE_LEN,
            actual: combined.len(),
        });
    }

    let (nonce_bytes, body) = combined.split_at(NONCE_LEN);
    let mut cipher = ChaCha20::new(
        GenericArray::from_slice(key.as_bytes()),
        GenericArray::from_slice(nonce_bytes),
    );
    let mut plaintext = body.to_vec();
    cipher.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

/// Maximum derivation context length for [`hchacha_subkey`].
pub const MAX_DERIVATION_CONTEXT_LEN: usize = 32;

/// Derive a ChaCha20 subkey from a parent seed via HChaCha20.
///
/// The 16-byte HChaCha20 input block is the little-endian `nonce` followed by
/// the first 12 bytes of `context`, zero-padded.
///
/// # Errors
///
/// Returns [`CryptoError::Derivation`] if the context exceeds 32 bytes.
pub fn hchacha_subkey(
    parent: &EncryptionKey,
    context: &[u8],
    nonce: u32,
) -> Result<EncryptionKey, CryptoError> {
    if context.len() > MAX_DERIVATION_CONTEXT_LEN {
        return Err(CryptoError::Derivation {
            reason: format!(
                "context must be at most {MAX_DERIVATION_CONTEXT_LEN} bytes, got {}",
                context.len()
            ),
        });
    }

    let mut input = [0u8; 16];
    input[..4].copy_from_slice(&nonce.to_le_bytes());
    let take = context.len().min(12);
    input[4..4 + take].copy_from_slice(&context[..take]);

    let subkey = chacha20::hchacha::<U10>(
        GenericArray::from_slice(parent.as_bytes()),
        GenericArray::from_slice(&input),
    );
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&subkey);
    Ok(EncryptionKey::from_bytes(bytes))
}

// ── Seal phrase handling ─────────────────────────────────────────────

/// Canonicalize an unseal phrase: NFKD, lowercase, single-space-joined.
#[must_use]
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .nfkd()
        .collect::<String>()
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fingerprint of a canonical phrase: SHA-512 applied twice, hex-encoded.
#[must_use]
pub fn phrase_fingerprint(canonical_phrase: &str) -> String {
    let first = Sha512::digest(canonical_phrase.as_bytes());
    let second = Sha512::digest(first);
    hex::encode(second)
}

/// Derive the 32-byte unsealer KEK from a canonical phrase.
///
/// PBKDF2-HMAC-SHA512 with the fixed domain-separation salt
/// `keyvault-unsealer-kek-v1` and the configured iteration count.
#[must_use]
pub fn derive_unsealer_kek(canonical_phrase: &str, iterations: u32) -> EncryptionKey {
    let mut out = Zeroizing::new([0u8; 32]);
    pbkdf2::pbkdf2_hmac::<Sha512>(
        canonical_phrase.as_bytes(),
        UNSEALER_KEK_SALT,
        iterations,
        &mut *out,
    );
    EncryptionKey::from_bytes(*out)
}
