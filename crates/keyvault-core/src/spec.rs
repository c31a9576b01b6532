//! Key specification vocabulary: types, usages, and algorithm specs.
//!
//! Callers spell specs however they like (`"aes-256-GCM"`, `"SECP256k1"`,
//! `"Bip39"`); the engine matches case-insensitively and always stores and
//! emits the canonical form.

use std::fmt;

use serde::Serialize;

use crate::error::EngineError;

/// Whether a key is symmetric or asymmetric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Symmetric,
    Asymmetric,
}

impl KeyType {
    /// Parse a caller-supplied type string, case-insensitively.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "symmetric" => Some(Self::Symmetric),
            "asymmetric" => Some(Self::Asymmetric),
            _ => None,
        }
    }

    /// The canonical wire form.
    #[must_use]
    pub const fn canonical(self) -> &'static str {
        match self {
            Self::Symmetric => "symmetric",
            Self::Asymmetric => "asymmetric",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

/// What a key may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyUsage {
    #[serde(rename = "encrypt/decrypt")]
    EncryptDecrypt,
    #[serde(rename = "sign/verify")]
    SignVerify,
}

impl KeyUsage {
    /// Parse a caller-supplied usage string, case-insensitively.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "encrypt/decrypt" => Some(Self::EncryptDecrypt),
            "sign/verify" => Some(Self::SignVerify),
            _ => None,
        }
    }

    /// The canonical wire form.
    #[must_use]
    pub const fn canonical(self) -> &'static str {
        match self {
            Self::EncryptDecrypt => "encrypt/decrypt",
            Self::SignVerify => "sign/verify",
        }
    }
}

impl fmt::Display for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

/// The supported key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeySpec {
    #[serde(rename = "AES-256-GCM")]
    Aes256Gcm,
    #[serde(rename = "ChaCha20")]
    ChaCha20,
    #[serde(rename = "Ed25519")]
    Ed25519,
    #[serde(rename = "Ed25519-NKey")]
    Ed25519Nkey,
    #[serde(rename = "C25519")]
    C25519,
    #[serde(rename = "secp256k1")]
    Secp256k1,
    #[serde(rename = "babyJubJub")]
    BabyJubJub,
    #[serde(rename = "BIP39")]
    Bip39,
    #[serde(rename = "RSA-2048")]
    Rsa2048,
    #[serde(rename = "RSA-3072")]
    Rsa3072,
    #[serde(rename = "RSA-4096")]
    Rsa4096,
}

impl KeySpec {
    /// All supported specs.
    pub const ALL: [Self; 11] = [
        Self::Aes256Gcm,
        Self::ChaCha20,
        Self::Ed25519,
        Self::Ed25519Nkey,
        Self::C25519,
        Self::Secp256k1,
        Self::BabyJubJub,
        Self::Bip39,
        Self::Rsa2048,
        Self::Rsa3072,
        Self::Rsa4096,
    ];

    /// Parse a caller-supplied spec string, case-insensitively.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|spec| spec.canonical().eq_ignore_ascii_case(input))
    }

    /// The canonical wire form, emitted exactly as written here.
    #[must_use]
    pub const fn canonical(self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::ChaCha20 => "ChaCha20",
            Self::Ed25519 => "Ed25519",
            Self::Ed25519Nkey => "Ed25519-NKey",
            Self::C25519 => "C25519",
            Self::Secp256k1 => "secp256k1",
            Self::BabyJubJub => "babyJubJub",
            Self::Bip39 => "BIP39",
            Self::Rsa2048 => "RSA-2048",
            Self::Rsa3072 => "RSA-3072",
            Self::Rsa4096 => "RSA-4096",
        }
    }

    /// The key type this spec requires.
    #[must_use]
    pub const fn key_type(self) -> KeyType {
        match self {
            Self::Aes256Gcm | Self::ChaCha20 => KeyType::Symmetric,
            _ => KeyType::Asymmetric,
        }
    }

    /// The usage this spec requires.
    #[must_use]
    pub const fn usage(self) -> KeyUsage {
        match self {
            Self::Aes256Gcm | Self::ChaCha20 => KeyUsage::EncryptDecrypt,
            _ => KeyUsage::SignVerify,
        }
    }

    /// RSA modulus size in bits, for the RSA specs.
    #[must_use]
    pub const fn rsa_bits(self) -> Option<usize> {
        match self {
            Self::Rsa2048 => Some(2048),
            Self::Rsa3072 => Some(3072),
            Self::Rsa4096 => Some(4096),
            _ => None,
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical())
    }
}

/// Validate a caller-supplied `(type, usage, spec)` triple and return the
/// parsed spec.
///
/// # Errors
///
/// Returns [`EngineError::InvalidParameter`] when the spec is unknown or the
/// type/usage do not match what the spec requires.
pub fn validate_triple(kind: &str, usage: &str, spec: &str) -> Result<KeySpec, EngineError> {
    let parsed_spec = KeySpec::parse(spec).ok_or_else(|| EngineError::InvalidParameter {
        reason: format!("unknown key spec '{spec}'"),
    })?;
    let parsed_kind = KeyType::parse(kind).ok_or_else(|| EngineError::InvalidParameter {
        reason: format!("unknown key type '{kind}'"),
    })?;
    let parsed_usage = KeyUsage::parse(usage).ok_or_else(|| EngineError::InvalidParameter {
        reason: format!("unknown key usage '{usage}'"),
    })?;

    if parsed_kind != parsed_spec.key_type() {
        return Err(EngineError::InvalidParameter {
            reason: format!(
                "spec {parsed_spec} requires type '{}', got '{parsed_kind}'",
                parsed_spec.key_type()
            ),
        });
    }
    if parsed_usage != parsed_spec.usage() {
        return Err(EngineError::InvalidParameter {
            reason: format!(
                "spec {parsed_spec} requires usage '{}', got '{parsed_usage}'",
                parsed_spec.usage()
            ),
        });
    }

    Ok(parsed_spec)
}
