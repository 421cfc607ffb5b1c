//! Persisted session state
//!
//! The session key and the delegation chain live under two distinct keys of a
//! string key/value store and are always read and written as a pair.

use crate::{
    crypto::Ed25519KeyIdentity,
    delegation::DelegationChain,
    error::Result,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Storage key of the session key record
pub const KEY_STORAGE_KEY: &str = "identity";
/// Storage key of the serialized delegation chain
pub const KEY_STORAGE_DELEGATION: &str = "delegation";
/// Storage key of the key-wrapping vector, cleared with the session
pub const KEY_VECTOR: &str = "iv";

/// Durable key → string store
#[async_trait]
pub trait AuthStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl AuthStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Remove every session record
pub async fn delete_session(storage: &dyn AuthStorage) -> Result<()> {
    storage.remove(KEY_STORAGE_KEY).await?;
    storage.remove(KEY_STORAGE_DELEGATION).await?;
    storage.remove(KEY_VECTOR).await?;
    Ok(())
}

/// Copy a session from a legacy store into the current one.
///
/// Only runs when the current store has no key and the legacy store holds both
/// records. The legacy records are removed after the copy. Returns whether a
/// migration happened.
pub async fn migrate_legacy(current: &dyn AuthStorage, legacy: &dyn AuthStorage) -> Result<bool> {
    if current.get(KEY_STORAGE_KEY).await?.is_some() {
        return Ok(false);
    }

    let legacy_chain = legacy.get(KEY_STORAGE_DELEGATION).await?;
    let legacy_key = legacy.get(KEY_STORAGE_KEY).await?;
    let (Some(chain), Some(key)) = (legacy_chain, legacy_key) else {
        return Ok(false);
    };

    info!("Discovered a session in the legacy store, migrating");
    current.set(KEY_STORAGE_DELEGATION, chain).await?;
    current.set(KEY_STORAGE_KEY, key).await?;

    legacy.remove(KEY_STORAGE_DELEGATION).await?;
    legacy.remove(KEY_STORAGE_KEY).await?;

    Ok(true)
}

/// Raw session records as found in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub key: String,
    pub chain: Option<String>,
}

impl StoredSession {
    /// Decode the key; decode the chain if present
    pub fn decode(&self) -> Result<(Ed25519KeyIdentity, Option<DelegationChain>)> {
        let key = Ed25519KeyIdentity::from_json(&self.key)?;
        let chain = self
            .chain
            .as_deref()
            .map(DelegationChain::from_json)
            .transpose()?;
        Ok((key, chain))
    }
}

/// Pairs the session key with its chain on top of an [`AuthStorage`]
pub struct SessionStore<'a> {
    storage: &'a dyn AuthStorage,
}

impl<'a> SessionStore<'a> {
    pub fn new(storage: &'a dyn AuthStorage) -> Self {
        Self { storage }
    }

    /// Read the key and chain records. A chain without a key is discarded.
    pub async fn load(&self) -> Result<Option<StoredSession>> {
        let key = self.storage.get(KEY_STORAGE_KEY).await?;
        let chain = self.storage.get(KEY_STORAGE_DELEGATION).await?;

        match (key, chain) {
            (Some(key), chain) => Ok(Some(StoredSession { key, chain })),
            (None, Some(_)) => {
                warn!("Found a delegation chain without its session key, discarding");
                self.clear().await?;
                Ok(None)
            }
            (None, None) => Ok(None),
        }
    }

    /// Write key and chain together. Without a chain any stale chain is removed.
    pub async fn save(
        &self,
        key: &Ed25519KeyIdentity,
        chain: Option<&DelegationChain>,
    ) -> Result<()> {
        self.storage.set(KEY_STORAGE_KEY, key.to_json()?).await?;
        match chain {
            Some(chain) => {
                self.storage
                    .set(KEY_STORAGE_DELEGATION, chain.to_json()?)
                    .await?
            }
            None => self.storage.remove(KEY_STORAGE_DELEGATION).await?,
        }
        debug!(with_chain = chain.is_some(), "Session persisted");
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        delete_session(self.storage).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SignIdentity;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert!(storage.get("a").await.unwrap().is_none());

        storage.set("a", "1".to_string()).await.unwrap();
        assert_eq!(storage.get("a").await.unwrap().as_deref(), Some("1"));

        storage.remove("a").await.unwrap();
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn test_migration_moves_both_records() {
        let current = MemoryStorage::new();
        let legacy = MemoryStorage::new();
        legacy.set(KEY_STORAGE_KEY, "key".to_string()).await.unwrap();
        legacy
            .set(KEY_STORAGE_DELEGATION, "chain".to_string())
            .await
            .unwrap();

        assert!(migrate_legacy(&current, &legacy).await.unwrap());
        assert_eq!(
            current.get(KEY_STORAGE_KEY).await.unwrap().as_deref(),
            Some("key")
        );
        assert_eq!(
            current.get(KEY_STORAGE_DELEGATION).await.unwrap().as_deref(),
            Some("chain")
        );
        assert!(legacy.is_empty().await);
    }

    #[tokio::test]
    async fn test_migration_skipped_when_current_has_key() {
        let current = MemoryStorage::new();
        let legacy = MemoryStorage::new();
        current.set(KEY_STORAGE_KEY, "new".to_string()).await.unwrap();
        legacy.set(KEY_STORAGE_KEY, "old".to_string()).await.unwrap();
        legacy
            .set(KEY_STORAGE_DELEGATION, "chain".to_string())
            .await
            .unwrap();

        assert!(!migrate_legacy(&current, &legacy).await.unwrap());
        assert_eq!(legacy.len().await, 2);
    }

    #[tokio::test]
    async fn test_migration_needs_both_records() {
        let current = MemoryStorage::new();
        let legacy = MemoryStorage::new();
        legacy.set(KEY_STORAGE_KEY, "key".to_string()).await.unwrap();

        assert!(!migrate_legacy(&current, &legacy).await.unwrap());
        assert!(current.is_empty().await);
        assert_eq!(legacy.len().await, 1);
    }

    #[tokio::test]
    async fn test_session_store_pairs_records() {
        let storage = MemoryStorage::new();
        let store = SessionStore::new(&storage);
        let root = Ed25519KeyIdentity::from_seed([1u8; 32]);
        let key = Ed25519KeyIdentity::from_seed([2u8; 32]);
        let chain = DelegationChain::create(&root, key.public_key(), 10, None, None).unwrap();

        store.save(&key, Some(&chain)).await.unwrap();
        let (restored_key, restored_chain) =
            store.load().await.unwrap().unwrap().decode().unwrap();
        assert_eq!(restored_key.public_key(), key.public_key());
        assert_eq!(restored_chain, Some(chain));

        store.save(&key, None).await.unwrap();
        let session = store.load().await.unwrap().unwrap();
        assert!(session.chain.is_none());
    }

    #[tokio::test]
    async fn test_orphaned_chain_is_discarded() {
        let storage = MemoryStorage::new();
        storage
            .set(KEY_STORAGE_DELEGATION, "chain".to_string())
            .await
            .unwrap();
        storage.set(KEY_VECTOR, "iv".to_string()).await.unwrap();

        let store = SessionStore::new(&storage);
        assert!(store.load().await.unwrap().is_none());
        assert!(storage.is_empty().await);
    }
}
