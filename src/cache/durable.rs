//! Durable tier: record encoding plus namespaced access to a
//! [`PersistentStore`].
//!
//! Records live under `"{namespace}:{key}"` as JSON documents holding the
//! entry metadata and a base64 payload. For encrypted namespaces the payload
//! is sealed with the storage key as associated data.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheEntry, Envelope};
use crate::error::{CacheError, StorageError};
use crate::storage::PersistentStore;

#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    created_at: u64,
    ttl_ms: u64,
    schema_version: u32,
    size_bytes: usize,
    encrypted: bool,
    #[serde(default)]
    version: Option<u64>,
    #[serde(default)]
    seq: u64,
    payload: String,
}

/// Result of reading one key from the durable tier.
#[derive(Debug)]
pub(crate) enum DurableRead {
    Found(CacheEntry),
    Absent,
    Corrupt(String),
}

pub(crate) struct DurableTier {
    prefix: String,
    encrypted: bool,
    store: Arc<dyn PersistentStore>,
    envelope: Option<Envelope>,
}

impl std::fmt::Debug for DurableTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableTier")
            .field("prefix", &self.prefix)
            .field("encrypted", &self.encrypted)
            .finish()
    }
}

impl DurableTier {
    pub(crate) fn new(
        namespace: &str,
        encrypted: bool,
        store: Arc<dyn PersistentStore>,
        envelope: Option<Envelope>,
    ) -> Self {
        Self {
            prefix: format!("{namespace}:"),
            encrypted,
            store,
            envelope,
        }
    }

    pub(crate) fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub(crate) fn user_key<'a>(&self, storage_key: &'a str) -> Option<&'a str> {
        storage_key.strip_prefix(self.prefix.as_str())
    }

    // == Encoding ==
    pub(crate) fn encode(&self, entry: &CacheEntry) -> Result<Vec<u8>, CacheError> {
        let storage_key = self.storage_key(&entry.key);
        let payload = if self.encrypted {
            let envelope = self.envelope.as_ref().ok_or_else(|| {
                CacheError::Config(format!("no encryption key for '{}'", self.prefix))
            })?;
            envelope.encrypt(&entry.value, storage_key.as_bytes())?
        } else {
            entry.value.clone()
        };

        let record = StoredRecord {
            key: entry.key.clone(),
            created_at: entry.created_at,
            ttl_ms: entry.ttl_ms,
            schema_version: entry.schema_version,
            size_bytes: entry.size_bytes,
            encrypted: self.encrypted,
            version: entry.version,
            seq: entry.seq,
            payload: BASE64.encode(payload),
        };
        serde_json::to_vec(&record)
            .map_err(|e| CacheError::CorruptEntry(format!("record encode failed: {e}")))
    }

    /// Decodes and, for encrypted namespaces, decrypts a stored record.
    pub(crate) fn decode(&self, storage_key: &str, raw: &[u8]) -> Result<CacheEntry, CacheError> {
        let record: StoredRecord = serde_json::from_slice(raw)
            .map_err(|e| CacheError::CorruptEntry(format!("record decode failed: {e}")))?;

        if self.user_key(storage_key) != Some(record.key.as_str()) {
            return Err(CacheError::CorruptEntry(format!(
                "record for '{}' stored under '{}'",
                record.key, storage_key
            )));
        }
        if record.encrypted != self.encrypted {
            return Err(CacheError::CorruptEntry(
                "record encryption does not match namespace policy".to_string(),
            ));
        }

        let payload = BASE64
            .decode(&record.payload)
            .map_err(|e| CacheError::CorruptEntry(format!("payload base64: {e}")))?;
        let value = if record.encrypted {
            let envelope = self
                .envelope
                .as_ref()
                .ok_or_else(|| CacheError::CorruptEntry("no key to decrypt".to_string()))?;
            envelope.decrypt(&payload, storage_key.as_bytes())?
        } else {
            payload
        };

        Ok(CacheEntry {
            key: record.key,
            value,
            created_at: record.created_at,
            ttl_ms: record.ttl_ms,
            schema_version: record.schema_version,
            size_bytes: record.size_bytes,
            encrypted: record.encrypted,
            version: record.version,
            seq: record.seq,
        })
    }

    // == Single-key Access ==
    pub(crate) async fn load(&self, key: &str) -> Result<DurableRead, StorageError> {
        let storage_key = self.storage_key(key);
        match self.store.get(&storage_key).await? {
            None => Ok(DurableRead::Absent),
            Some(raw) => Ok(match self.decode(&storage_key, &raw) {
                Ok(entry) => DurableRead::Found(entry),
                Err(e) => DurableRead::Corrupt(e.to_string()),
            }),
        }
    }

    pub(crate) async fn write(&self, entry: &CacheEntry) -> Result<(), StorageError> {
        let raw = self
            .encode(entry)
            .map_err(|e| StorageError::Format(e.to_string()))?;
        self.store.set(&self.storage_key(&entry.key), raw).await
    }

    pub(crate) async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(&self.storage_key(key)).await
    }

    // == Bulk Access ==
    /// Every storage key in this namespace.
    pub(crate) async fn list_storage_keys(&self) -> Result<Vec<String>, StorageError> {
        self.store.list_keys(&self.prefix).await
    }

    pub(crate) async fn read_raw(
        &self,
        storage_keys: &[String],
    ) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        self.store.bulk_get(storage_keys).await
    }

    pub(crate) async fn delete_raw(&self, storage_keys: &[String]) -> Result<(), StorageError> {
        self.store.delete_many(storage_keys).await
    }

    pub(crate) async fn write_raw(
        &self,
        records: Vec<(String, Vec<u8>)>,
    ) -> Result<(), StorageError> {
        self.store.set_many(records).await
    }

    /// Removes every record of this namespace, returning how many existed.
    pub(crate) async fn clear(&self) -> Result<usize, StorageError> {
        let keys = self.list_storage_keys().await?;
        let count = keys.len();
        if count > 0 {
            self.delete_raw(&keys).await?;
        }
        Ok(count)
    }
}
