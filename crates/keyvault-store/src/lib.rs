//! Persistence contract for `KeyVault`.
//!
//! This crate defines the [`VaultStore`] trait — a record-oriented storage
//! interface that knows nothing about sealing, envelope encryption, or key
//! algorithms. Every secret column it carries is an opaque byte array that
//! the core has already encrypted; the store never sees plaintext.
//!
//! One implementation is provided here:
//!
//! - [`MemoryStore`] — in-memory, for tests and development
//!
//! Relational backends implement the same trait out of tree.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The single process-wide unsealer configuration row.
///
/// Created exactly once and immutable thereafter. `validation_hash` is a
/// hex-encoded fingerprint of the canonical unseal phrase; the phrase itself
/// is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsealerConfigRecord {
    /// Hex fingerprint of the unseal phrase.
    pub validation_hash: String,
    /// When the configuration was created.
    pub created_at: DateTime<Utc>,
}

/// A tenant-scoped vault row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultRecord {
    pub id: Uuid,
    /// Opaque tenant identifier supplied by the caller. The core compares it
    /// for equality on every resolution; the store does not interpret it.
    pub owner_scope: String,
    pub name: String,
    pub description: String,
    /// Id of the vault's master key row.
    pub master_key_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A key row. Type, usage, and spec are stored as the canonical strings the
/// core produces; ciphertext columns are opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: Uuid,
    pub vault_id: Uuid,
    pub kind: String,
    pub usage: String,
    pub spec: String,
    pub name: String,
    pub description: String,
    pub public_key: Option<String>,
    pub address: Option<String>,
    pub derivation_path: Option<String>,
    pub private_key_ciphertext: Option<Vec<u8>>,
    pub seed_ciphertext: Option<Vec<u8>>,
    pub mnemonic_ciphertext: Option<Vec<u8>>,
    /// Next hierarchical-deterministic index for autosign. Advanced only via
    /// [`VaultStore::cas_autosign_counter`].
    pub autosign_counter: u32,
    pub created_at: DateTime<Utc>,
}

/// A pluggable record store for vaults, keys, and the unsealer configuration.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait VaultStore: Send + Sync + 'static {
    /// Read the unsealer configuration, if one has been created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the backend fails.
    async fn get_unsealer_config(&self) -> Result<Option<UnsealerConfigRecord>, StoreError>;

    /// Persist the unsealer configuration. At most one row may ever exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if a configuration already exists,
    /// or [`StoreError::Write`] if the backend fails.
    async fn put_unsealer_config(&self, config: &UnsealerConfigRecord) -> Result<(), StoreError>;

    /// Insert a vault row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the id is already taken, or
    /// [`StoreError::Write`] if the backend fails.
    async fn insert_vault(&self, vault: &VaultRecord) -> Result<(), StoreError>;

    /// Fetch a vault by id. Scope checks are the core's responsibility.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the backend fails.
    async fn get_vault(&self, id: Uuid) -> Result<Option<VaultRecord>, StoreError>;

    /// List vault rows owned by the given scope.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the backend fails.
    async fn list_vaults(&self, owner_scope: &str) -> Result<Vec<VaultRecord>, StoreError>;

    /// Delete a vault and every key it owns. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Delete`] if the backend fails.
    async fn delete_vault(&self, id: Uuid) -> Result<(), StoreError>;

    /// Insert a key row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] if the id is already taken, or
    /// [`StoreError::Write`] if the backend fails.
    async fn insert_key(&self, key: &KeyRecord) -> Result<(), StoreError>;

    /// Fetch a key by `(vault_id, id)`. A key never migrates between vaults,
    /// so a vault mismatch is indistinguishable from absence.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the backend fails.
    async fn get_key(&self, vault_id: Uuid, id: Uuid) -> Result<Option<KeyRecord>, StoreError>;

    /// List all key rows belonging to a vault, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] if the backend fails.
    async fn list_keys(&self, vault_id: Uuid) -> Result<Vec<KeyRecord>, StoreError>;

    /// Hard-delete a key row. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Delete`] if the backend fails.
    async fn delete_key(&self, vault_id: Uuid, id: Uuid) -> Result<(), StoreError>;

    /// Atomically advance a key's autosign counter from `expected` to `next`.
    ///
    /// Returns `true` if the swap was applied, `false` if the stored value no
    /// longer equals `expected` (the caller should reload and retry).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] if the key does not exist, or
    /// [`StoreError::Write`] if the backend fails.
    async fn cas_autosign_counter(
        &self,
        vault_id: Uuid,
        id: Uuid,
        expected: u32,
        next: u32,
    ) -> Result<bool, StoreError>;
}
