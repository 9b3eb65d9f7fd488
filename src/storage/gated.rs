//! Store wrapper whose bulk reads wait for permits, so tests can hold a
//! sweep in the middle of its durable scan.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use super::{MemoryStore, PersistentStore};
use crate::error::StorageError;

#[derive(Debug)]
pub(crate) struct GatedStore {
    inner: Arc<MemoryStore>,
    reads: Semaphore,
    entered: Notify,
}

impl GatedStore {
    /// Bulk reads block until [`GatedStore::release`] is called.
    pub(crate) fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            reads: Semaphore::new(0),
            entered: Notify::new(),
        }
    }

    /// Resolves once a bulk read is waiting.
    pub(crate) async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Lets every pending and future bulk read through.
    pub(crate) fn release(&self) {
        self.reads.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

#[async_trait]
impl PersistentStore for GatedStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.inner.list_keys(prefix).await
    }

    async fn bulk_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        self.entered.notify_one();
        if let Ok(permit) = self.reads.acquire().await {
            permit.forget();
        }
        self.inner.bulk_get(keys).await
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.inner.clear_all().await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        self.inner.delete_many(keys).await
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StorageError> {
        self.inner.set_many(entries).await
    }
}
