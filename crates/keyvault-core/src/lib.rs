//! Cryptographic core for `KeyVault`.
//!
//! A multi-tenant key vault: the seal/unseal state machine, the
//! key-encryption-key chain protecting stored secrets, a multi-algorithm key
//! lifecycle (create / derive / sign / verify / encrypt / decrypt / list),
//! and the BIP39/BIP32 hierarchical-deterministic wallet layer.
//!
//! This crate depends on `keyvault-store` for persistence and knows nothing
//! about HTTP, authentication token issuance, or message-bus plumbing —
//! those collaborators talk to the core solely through [`KeyEngine`] and
//! [`SealManager`].

pub mod crypto;
pub mod engine;
pub mod error;
pub mod hdwallet;
pub mod key;
pub mod seal;
pub mod signer;
pub mod spec;

pub use engine::KeyEngine;
pub use error::{CryptoError, EngineError, SealError};
pub use key::{
    CreateKeyRequest, CreateVaultRequest, CreatedKey, DeriveKeyRequest, EphemeralMaterial,
    HdWalletOptions, Key, KeyFilter, SignatureOptions, SignatureResponse, Vault,
};
pub use seal::{GeneratedSeal, SealManager};
pub use spec::{KeySpec, KeyType, KeyUsage};
