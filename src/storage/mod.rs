//! Storage Module
//!
//! Durable key/value backends consumed by the cache's durable tier. Backends
//! model device-local storage: flat string keys, opaque byte values, bulk
//! reads and a whole-store wipe.

mod file;
#[cfg(test)]
pub(crate) mod gated;
mod memory;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::StorageError;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Local persistent key/value store.
#[async_trait]
pub trait PersistentStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys starting with `prefix`, in no particular order.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Values for the keys that exist; missing keys are omitted.
    async fn bulk_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, StorageError>;

    async fn clear_all(&self) -> Result<(), StorageError>;

    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StorageError> {
        for (key, value) in entries {
            self.set(&key, value).await?;
        }
        Ok(())
    }
}
