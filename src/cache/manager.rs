//! Cache Manager Module
//!
//! Owns every configured namespace over one shared durable store.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use super::{Cache, Codec, Envelope, JsonCodec, StatsSnapshot, TieredCache};
use crate::clock::SharedClock;
use crate::config::{Config, NamespaceConfig};
use crate::error::{CacheError, Result};
use crate::storage::PersistentStore;

// == Cache Manager ==
/// Registry of namespaces, keyed by name.
#[derive(Debug)]
pub struct CacheManager {
    namespaces: BTreeMap<String, Arc<TieredCache>>,
}

impl CacheManager {
    // == Constructor ==
    /// Builds one [`TieredCache`] per namespace.
    ///
    /// Must be called inside a Tokio runtime. Fails when a namespace policy
    /// is invalid, a name repeats, or an encrypted namespace has no key.
    pub fn new(
        namespaces: &[NamespaceConfig],
        schema_version: u32,
        store: Arc<dyn PersistentStore>,
        clock: SharedClock,
        encryption_key: Option<[u8; 32]>,
    ) -> Result<Self> {
        let envelope = encryption_key.map(|key| Envelope::new(&key));
        let mut registry = BTreeMap::new();

        for config in namespaces {
            if registry.contains_key(&config.name) {
                return Err(CacheError::Config(format!(
                    "namespace '{}' configured twice",
                    config.name
                )));
            }
            let cache = TieredCache::new(
                config.clone(),
                schema_version,
                Arc::clone(&store),
                envelope.clone(),
                Arc::clone(&clock),
            )?;
            registry.insert(config.name.clone(), Arc::new(cache));
        }

        info!(
            namespaces = registry.len(),
            schema_version,
            "Cache manager initialized"
        );
        Ok(Self {
            namespaces: registry,
        })
    }

    /// Builds the manager from runtime configuration.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn PersistentStore>,
        clock: SharedClock,
        encryption_key: Option<[u8; 32]>,
    ) -> Result<Self> {
        Self::new(
            &config.namespaces,
            config.schema_version,
            store,
            clock,
            encryption_key,
        )
    }

    // == Lookup ==
    pub fn namespace(&self, name: &str) -> Result<Arc<TieredCache>> {
        self.namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::UnknownNamespace(name.to_string()))
    }

    /// JSON-typed view of a namespace.
    pub fn typed<T>(&self, name: &str) -> Result<Cache<T>>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        self.typed_with(name, JsonCodec::new())
    }

    pub fn typed_with<T, C>(&self, name: &str, codec: C) -> Result<Cache<T, C>>
    where
        T: 'static,
        C: Codec<T>,
    {
        Ok(Cache::new(self.namespace(name)?, codec))
    }

    /// All namespaces, in name order.
    pub fn caches(&self) -> Vec<Arc<TieredCache>> {
        self.namespaces.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.namespaces.keys().cloned().collect()
    }

    // == Stats ==
    pub fn stats(&self) -> Vec<StatsSnapshot> {
        self.namespaces.values().map(|cache| cache.stats()).collect()
    }
}
