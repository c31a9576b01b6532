//! Hierarchical-deterministic wallet support: BIP39 mnemonics, BIP32
//! extended-key derivation, and EVM address synthesis.
//!
//! The wallet's system of record is the mnemonic. Children are re-derived on
//! demand — child private keys are never persisted. Derivation is
//! coin-agnostic: an unknown SLIP-44 coin number still derives along
//! `m/44'/coin'/0'/0/index` and gets an Ethereum-shaped address.

use bip32::{DerivationPath, Prefix, XPrv};
use bip39::{Language, Mnemonic};
use zeroize::Zeroizing;

use crate::crypto;
use crate::error::CryptoError;
use crate::signer;

/// SLIP-44 coin type for Ethereum.
pub const ETH_COIN_TYPE: u32 = 60;

/// BIP39 mnemonic word count used for generated wallets and seal phrases
/// (24 words = 256 bits of entropy).
pub const MNEMONIC_WORD_COUNT: usize = 24;

/// Look up a SLIP-44 coin number by ticker abbreviation.
///
/// Ethereum is the only coin the core resolves by name; numeric coin types
/// pass through untranslated.
#[must_use]
pub fn slip44_coin(abbr: &str) -> Option<u32> {
    match abbr.to_ascii_uppercase().as_str() {
        "ETH" => Some(ETH_COIN_TYPE),
        _ => None,
    }
}

/// BIP44 account path for `(coin, index)`: `m/44'/coin'/0'/0/index`.
#[must_use]
pub fn account_path(coin: u32, index: u32) -> String {
    format!("m/44'/{coin}'/0'/0/{index}")
}

/// The path autosign uses at a given counter value.
#[must_use]
pub fn autosign_path(index: u32) -> String {
    account_path(ETH_COIN_TYPE, index)
}

/// Generate a fresh 24-word English mnemonic from 256 bits of OS entropy.
///
/// # Errors
///
/// Returns [`CryptoError::KeyGeneration`] if entropy encoding fails.
pub fn generate_mnemonic() -> Result<Mnemonic, CryptoError> {
    let mut entropy = Zeroizing::new([0u8; 32]);
    crypto::random_bytes(&mut *entropy);
    Mnemonic::from_entropy_in(Language::English, entropy.as_slice()).map_err(|e| {
        CryptoError::KeyGeneration {
            reason: format!("mnemonic generation: {e}"),
        }
    })
}

/// A hierarchical-deterministic wallet rooted at a validated mnemonic.
pub struct HdWallet {
    mnemonic: Mnemonic,
}

impl HdWallet {
    /// Create a wallet with a freshly generated 24-word mnemonic.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyGeneration`] if entropy encoding fails.
    pub fn generate() -> Result<Self, CryptoError> {
        Ok(Self {
            mnemonic: generate_mnemonic()?,
        })
    }

    /// Import a wallet from a caller-supplied phrase.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidMnemonic`] when the phrase fails the
    /// BIP39 checksum or is otherwise malformed.
    pub fn from_phrase(phrase: &str) -> Result<Self, CryptoError> {
        let normalized = crypto::normalize_phrase(phrase);
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|e| CryptoError::InvalidMnemonic {
                reason: e.to_string(),
            })?;
        Ok(Self { mnemonic })
    }

    /// The mnemonic phrase, space-joined.
    #[must_use]
    pub fn phrase(&self) -> Zeroizing<String> {
        Zeroizing::new(self.mnemonic.to_string())
    }

    /// The 64-byte BIP39 seed (empty passphrase).
    #[must_use]
    pub fn seed(&self) -> Zeroizing<[u8; 64]> {
        Zeroizing::new(self.mnemonic.to_seed(""))
    }

    /// The BIP32 master extended public key (`xpub...`).
    ///
    /// This is the stored public key of a BIP39 vault key: deterministic for
    /// a given mnemonic, safe to expose.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyGeneration`] if the seed is rejected.
    pub fn master_xpub(&self) -> Result<String, CryptoError> {
        let seed = self.seed();
        let root = XPrv::new(seed.as_slice()).map_err(|e| CryptoError::KeyGeneration {
            reason: format!("bip32 master: {e}"),
        })?;
        Ok(root.public_key().to_string(Prefix::XPUB))
    }

    /// Derive the secp256k1 child at the given path (e.g. `m/44'/60'/2'/0/0`).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Derivation`] for an unparsable path or a failed
    /// child derivation.
    pub fn derive_child(&self, path: &str) -> Result<HdChild, CryptoError> {
        let parsed: DerivationPath = path.parse().map_err(|_| CryptoError::Derivation {
            reason: format!("invalid derivation path '{path}'"),
        })?;
        let seed = self.seed();
        let xprv = XPrv::derive_from_path(seed.as_slice(), &parsed).map_err(|e| {
            CryptoError::Derivation {
                reason: format!("derivation along '{path}' failed: {e}"),
            }
        })?;

        let verifying = *xprv.public_key().public_key();
        let uncompressed = verifying.to_encoded_point(false);
        let address = signer::evm_address(uncompressed.as_bytes())?;
        let public_key_hex = hex::encode(verifying.to_encoded_point(true).as_bytes());

        Ok(HdChild {
            path: path.to_owned(),
            signing: xprv.private_key().clone(),
            public_key_hex,
            address,
        })
    }
}

impl std::fmt::Debug for HdWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdWallet")
            .field("mnemonic", &"[REDACTED]")
            .finish()
    }
}

/// A derived secp256k1 child: signing key, public key, EVM address, and the
/// path it came from. Lives only for the duration of one operation.
pub struct HdChild {
    /// The derivation path used, verbatim.
    pub path: String,
    /// Compressed SEC1 public key, hex.
    pub public_key_hex: String,
    /// EVM address (`0x` + 40 hex chars).
    pub address: String,
    signing: k256::ecdsa::SigningKey,
}

impl HdChild {
    /// Sign a pre-hashed 32-byte digest with the child key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Signing`] if the digest is rejected.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
        let mut private = Zeroizing::new([0u8; 32]);
        private.copy_from_slice(&self.signing.to_bytes());
        signer::secp256k1_sign(private.as_slice(), digest)
    }

    /// Verify a signature made by this child over a 32-byte digest.
    ///
    /// # Errors
    ///
    /// Propagates [`CryptoError::InvalidKeyMaterial`] (cannot happen for a
    /// freshly derived key).
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &[u8]) -> Result<bool, CryptoError> {
        let public = self.signing.verifying_key().to_encoded_point(true);
        signer::secp256k1_verify(public.as_bytes(), digest, signature)
    }
}

impl std::fmt::Debug for HdChild {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdChild")
            .field("path", &self.path)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
