//! Single-file JSON store.
//!
//! The whole map is held in memory and rewritten on every mutation through a
//! temp file + rename, so a crash leaves either the old or the new file.
//! This matches the bulk-read / bulk-overwrite shape of device key/value
//! storage.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::PersistentStore;
use crate::error::StorageError;

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl FileStore {
    /// Opens (or creates on first write) the store at `path`.
    ///
    /// An unreadable file is discarded with a warning: the cache is not the
    /// system of record.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let data = match tokio::fs::read(&path).await {
            Ok(raw) => match decode_file(&raw) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Discarding unreadable cache file");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), records = data.len(), "Opened file store");

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, data: &BTreeMap<String, Vec<u8>>) -> Result<(), StorageError> {
        let encoded: BTreeMap<&str, String> = data
            .iter()
            .map(|(k, v)| (k.as_str(), BASE64.encode(v)))
            .collect();
        let raw = serde_json::to_vec(&encoded)
            .map_err(|e| StorageError::Format(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Writes `next` to disk, then makes it the in-memory state. A failed
    /// write leaves `data` untouched.
    async fn commit(
        &self,
        data: &mut BTreeMap<String, Vec<u8>>,
        next: BTreeMap<String, Vec<u8>>,
    ) -> Result<(), StorageError> {
        self.persist(&next).await?;
        *data = next;
        Ok(())
    }
}

fn decode_file(raw: &[u8]) -> Result<BTreeMap<String, Vec<u8>>, StorageError> {
    let encoded: BTreeMap<String, String> =
        serde_json::from_slice(raw).map_err(|e| StorageError::Format(e.to_string()))?;
    encoded
        .into_iter()
        .map(|(k, v)| {
            BASE64
                .decode(v)
                .map(|bytes| (k, bytes))
                .map_err(|e| StorageError::Format(e.to_string()))
        })
        .collect()
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        next.insert(key.to_string(), value);
        self.commit(&mut data, next).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        if !data.contains_key(key) {
            return Ok(());
        }
        let mut next = data.clone();
        next.remove(key);
        self.commit(&mut data, next).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn bulk_get(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>, StorageError> {
        let data = self.data.lock().await;
        Ok(keys
            .iter()
            .filter_map(|k| data.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        self.commit(&mut data, BTreeMap::new()).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<(), StorageError> {
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        for key in keys {
            next.remove(key);
        }
        if next.len() == data.len() {
            return Ok(());
        }
        self.commit(&mut data, next).await
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StorageError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut data = self.data.lock().await;
        let mut next = data.clone();
        next.extend(entries);
        self.commit(&mut data, next).await
    }
}
