//! In-memory store for tests and development.
//!
//! All records live in `BTreeMap`s behind a single `RwLock`. Nothing is
//! persistent — data is lost when the process exits. The autosign
//! compare-and-swap runs under the write lock, which gives it the same
//! single-row atomicity a relational backend provides.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{KeyRecord, StoreError, UnsealerConfigRecord, VaultRecord, VaultStore};

#[derive(Debug, Default)]
struct Tables {
    unsealer_config: Option<UnsealerConfigRecord>,
    vaults: BTreeMap<Uuid, VaultRecord>,
    /// Keys ordered by an insertion sequence so listings are stable.
    keys: BTreeMap<(Uuid, u64), KeyRecord>,
    next_seq: u64,
}

/// An in-memory [`VaultStore`].
///
/// Thread-safe and cheap to clone — clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl VaultStore for MemoryStore {
    async fn get_unsealer_config(&self) -> Result<Option<UnsealerConfigRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.unsealer_config.clone())
    }

    async fn put_unsealer_config(&self, config: &UnsealerConfigRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.unsealer_config.is_some() {
            return Err(StoreError::Conflict {
                what: "unsealer configuration".to_owned(),
            });
        }
        tables.unsealer_config = Some(config.clone());
        Ok(())
    }

    async fn insert_vault(&self, vault: &VaultRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.vaults.contains_key(&vault.id) {
            return Err(StoreError::Conflict {
                what: format!("vault {}", vault.id),
            });
        }
        tables.vaults.insert(vault.id, vault.clone());
        Ok(())
    }

    async fn get_vault(&self, id: Uuid) -> Result<Option<VaultRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.vaults.get(&id).cloned())
    }

    async fn list_vaults(&self, owner_scope: &str) -> Result<Vec<VaultRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .vaults
            .values()
            .filter(|v| v.owner_scope == owner_scope)
            .cloned()
            .collect())
    }

    async fn delete_vault(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.vaults.remove(&id);
        tables.keys.retain(|(vault_id, _), _| *vault_id != id);
        Ok(())
    }

    async fn insert_key(&self, key: &KeyRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.keys.values().any(|k| k.id == key.id) {
            return Err(StoreError::Conflict {
                what: format!("key {}", key.id),
            });
        }
        let seq = tables.next_seq;
        tables.next_seq = seq.saturating_add(1);
        tables.keys.insert((key.vault_id, seq), key.clone());
        Ok(())
    }

    async fn get_key(&self, vault_id: Uuid, id: Uuid) -> Result<Option<KeyRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .keys
            .values()
            .find(|k| k.vault_id == vault_id && k.id == id)
            .cloned())
    }

    async fn list_keys(&self, vault_id: Uuid) -> Result<Vec<KeyRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .keys
            .range((vault_id, 0)..=(vault_id, u64::MAX))
            .map(|(_, k)| k.clone())
            .collect())
    }

    async fn delete_key(&self, vault_id: Uuid, id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables
            .keys
            .retain(|_, k| !(k.vault_id == vault_id && k.id == id));
        Ok(())
    }

    async fn cas_autosign_counter(
        &self,
        vault_id: Uuid,
        id: Uuid,
        expected: u32,
        next: u32,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let key = tables
            .keys
            .values_mut()
            .find(|k| k.vault_id == vault_id && k.id == id)
            .ok_or_else(|| StoreError::Missing {
                what: format!("key {id}"),
            })?;
        if key.autosign_counter != expected {
            return Ok(false);
        }
        key.autosign_counter = next;
        Ok(true)
    }
}
