//! Domain model for vaults and keys, plus the request/option types the
//! engine validates.
//!
//! [`Key`] is the caller-visible view of a key row: the ciphertext columns
//! stay behind in the store record, so nothing secret can leak through a
//! listing. Option bags deserialize with `deny_unknown_fields` — a caller
//! passing a field the engine does not know gets `InvalidParameter` instead
//! of silent acceptance.

use chrono::{DateTime, Utc};
use keyvault_store::{KeyRecord, VaultRecord};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::EngineError;
use crate::spec::{KeySpec, KeyType, KeyUsage};

/// Name reserved for the vault master key. One per vault, created with the
/// vault, wrapped by the unsealer KEK.
pub const MASTER_KEY_NAME: &str = "master0";

/// A tenant-scoped vault.
#[derive(Debug, Clone, Serialize)]
pub struct Vault {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<VaultRecord> for Vault {
    fn from(record: VaultRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            description: record.description,
            created_at: record.created_at,
        }
    }
}

/// The caller-visible view of a key. Secret columns never appear here.
#[derive(Debug, Clone, Serialize)]
pub struct Key {
    pub id: Uuid,
    pub vault_id: Uuid,
    #[serde(rename = "type")]
    pub kind: KeyType,
    pub usage: KeyUsage,
    pub spec: KeySpec,
    pub name: String,
    pub description: String,
    pub public_key: Option<String>,
    pub address: Option<String>,
    pub derivation_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Key {
    /// Build the domain view from a store record.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Internal`] if the stored type/usage/spec
    /// strings are not canonical — that would mean the row was written by
    /// something other than this engine.
    pub fn from_record(record: &KeyRecord) -> Result<Self, EngineError> {
        let spec = KeySpec::parse(&record.spec).ok_or_else(|| EngineError::Internal {
            reason: format!("stored key {} has unknown spec '{}'", record.id, record.spec),
        })?;
        let kind = KeyType::parse(&record.kind).ok_or_else(|| EngineError::Internal {
            reason: format!("stored key {} has unknown type '{}'", record.id, record.kind),
        })?;
        let usage = KeyUsage::parse(&record.usage).ok_or_else(|| EngineError::Internal {
            reason: format!("stored key {} has unknown usage '{}'", record.id, record.usage),
        })?;

        Ok(Self {
            id: record.id,
            vault_id: record.vault_id,
            kind,
            usage,
            spec,
            name: record.name.clone(),
            description: record.description.clone(),
            public_key: record.public_key.clone(),
            address: record.address.clone(),
            derivation_path: record.derivation_path.clone(),
            created_at: record.created_at,
        })
    }
}

/// Plaintext material handed back exactly once for an ephemeral key.
///
/// Nothing in here is persisted anywhere. Deliberately not serializable —
/// the façade decides field by field what crosses the wire.
#[derive(Debug)]
pub struct EphemeralMaterial {
    /// Hex private key (or PKCS#8 DER hex for RSA).
    pub private_key: Option<Zeroizing<String>>,
    /// Hex seed (NKey text encoding for Ed25519-NKey).
    pub seed: Option<Zeroizing<String>>,
    /// BIP39 phrase.
    pub mnemonic: Option<Zeroizing<String>>,
}

/// A created or derived key, with inline material when ephemeral.
#[derive(Debug)]
pub struct CreatedKey {
    pub key: Key,
    pub material: Option<EphemeralMaterial>,
}

/// Request to create a vault.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateVaultRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Request to create a key. Type, usage, and spec are matched
/// case-insensitively and stored canonical.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateKeyRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub usage: String,
    pub spec: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// BIP39 only: import this mnemonic instead of generating one.
    #[serde(default)]
    pub mnemonic: Option<String>,
    /// When true, secrets are returned inline once and never persisted.
    #[serde(default)]
    pub ephemeral: bool,
}

/// Request to derive a child key.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeriveKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// ChaCha20 parents: derivation context, at most 32 bytes.
    #[serde(default)]
    pub context: Option<String>,
    /// ChaCha20 parents: 32-bit derivation nonce, default 0.
    #[serde(default)]
    pub nonce: Option<u32>,
    /// BIP39 parents: child selection, same shape as signing options.
    #[serde(default)]
    pub hdwallet: Option<HdWalletOptions>,
}

/// Options accepted by sign and verify.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignatureOptions {
    /// RSA only: `RS256|RS384|RS512|PS256|PS384|PS512`.
    #[serde(default)]
    pub algorithm: Option<String>,
    /// BIP39 only: which HD child signs or verifies.
    #[serde(default)]
    pub hdwallet: Option<HdWalletOptions>,
}

impl SignatureOptions {
    /// Parse an options bag from loosely-typed JSON; unknown fields reject.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidParameter`] on any shape mismatch.
    pub fn from_value(value: serde_json::Value) -> Result<Self, EngineError> {
        serde_json::from_value(value).map_err(|e| EngineError::InvalidParameter {
            reason: format!("invalid options: {e}"),
        })
    }
}

/// HD child selection. Precedence: explicit path, then `coin` + `index`,
/// then `coin_abbr` + `index`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HdWalletOptions {
    #[serde(default)]
    pub hd_derivation_path: Option<String>,
    #[serde(default)]
    pub coin: Option<u32>,
    #[serde(default)]
    pub coin_abbr: Option<String>,
    #[serde(default)]
    pub index: Option<u32>,
}

/// A signature plus the HD child it came from, when one was used.
#[derive(Debug, Serialize)]
pub struct SignatureResponse {
    /// Hex signature.
    pub signature: String,
    /// EVM address of the HD child used; `None` for non-HD keys.
    pub address: Option<String>,
    /// Derivation path of the HD child used; `None` for non-HD keys.
    pub derivation_path: Option<String>,
}

/// Listing filter. Values are canonicalized before comparison; a value that
/// matches no canonical form yields an empty intersection rather than an
/// error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyFilter {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub spec: Option<String>,
}
