//! Typed view over a namespace.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use super::{Codec, JsonCodec, Lookup, MissReason, Subscription, TieredCache, WriteOutcome};
use crate::error::Result;

/// A namespace seen through a [`Codec`].
///
/// Values that fail to decode are purged and read as
/// `Lookup::Miss(MissReason::Corrupt)`.
pub struct Cache<T, C = JsonCodec<T>> {
    inner: Arc<TieredCache>,
    codec: Arc<C>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> Clone for Cache<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            codec: Arc::clone(&self.codec),
            _marker: PhantomData,
        }
    }
}

impl<T, C> std::fmt::Debug for Cache<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("namespace", &self.inner.name())
            .finish()
    }
}

impl<T, C> Cache<T, C>
where
    T: 'static,
    C: Codec<T>,
{
    pub fn new(inner: Arc<TieredCache>, codec: C) -> Self {
        Self {
            inner,
            codec: Arc::new(codec),
            _marker: PhantomData,
        }
    }

    pub fn namespace(&self) -> &str {
        self.inner.name()
    }

    /// The byte-level namespace behind this view.
    pub fn raw(&self) -> &Arc<TieredCache> {
        &self.inner
    }

    pub async fn get(&self, key: &str) -> Lookup<T> {
        match self.inner.get(key).await {
            Lookup::Hit(bytes) => match self.codec.decode(&bytes) {
                Ok(value) => Lookup::Hit(value),
                Err(_) => {
                    self.inner.purge_undecodable(key, &bytes).await;
                    Lookup::Miss(MissReason::Corrupt)
                }
            },
            Lookup::Miss(reason) => Lookup::Miss(reason),
        }
    }

    /// Stores `value` with the namespace's default TTL.
    pub async fn set(&self, key: &str, value: &T) -> Result<WriteOutcome> {
        let bytes = self.codec.encode(value)?;
        self.inner.set(key, bytes, None).await
    }

    pub async fn set_with_ttl(&self, key: &str, value: &T, ttl: Duration) -> Result<WriteOutcome> {
        let bytes = self.codec.encode(value)?;
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.inner.set(key, bytes, Some(ttl_ms)).await
    }

    /// Stores `value` unless a version greater than or equal to `version`
    /// is already cached.
    pub async fn set_versioned(&self, key: &str, value: &T, version: u64) -> Result<WriteOutcome> {
        let bytes = self.codec.encode(value)?;
        self.inner.set_versioned(key, bytes, None, version).await
    }

    pub async fn delete(&self, key: &str) -> WriteOutcome {
        self.inner.delete(key).await
    }

    pub async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_hit()
    }

    pub async fn keys(&self) -> Vec<String> {
        self.inner.keys().await
    }

    pub async fn clear(&self) {
        self.inner.clear().await
    }

    /// Calls `listener` with the decoded new value after each mutation of
    /// `key`, or `None` on delete, clear, or an undecodable payload.
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Subscription
    where
        F: Fn(Option<T>) + Send + Sync + 'static,
    {
        let codec = Arc::clone(&self.codec);
        self.inner.subscribe(key, move |_, bytes| {
            listener(bytes.and_then(|b| codec.decode(b).ok()))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::cache::BytesCodec;
    use crate::clock::ManualClock;
    use crate::config::NamespaceConfig;
    use crate::storage::MemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Listing {
        id: u64,
        title: String,
        price_cents: u64,
    }

    fn listing(id: u64) -> Listing {
        Listing {
            id,
            title: format!("Listing {id}"),
            price_cents: 1_999,
        }
    }

    fn namespace(store: Arc<MemoryStore>, clock: Arc<ManualClock>) -> Arc<TieredCache> {
        Arc::new(
            TieredCache::new(
                NamespaceConfig::new("listings").with_ttl_ms(60_000),
                1,
                store,
                None,
                clock,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let cache: Cache<Listing> = Cache::new(namespace(store, clock), JsonCodec::new());

        cache.set("1", &listing(1)).await.unwrap();
        assert_eq!(cache.get("1").await, Lookup::Hit(listing(1)));
        assert!(cache.has("1").await);
        assert_eq!(cache.keys().await, vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_set_with_ttl() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let cache: Cache<Listing> = Cache::new(namespace(store, clock.clone()), JsonCodec::new());

        cache
            .set_with_ttl("1", &listing(1), Duration::from_millis(50))
            .await
            .unwrap();
        clock.advance(50);
        assert_eq!(cache.get("1").await, Lookup::Miss(MissReason::Expired));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_purged() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let ns = namespace(store.clone(), clock);
        let raw: Cache<Vec<u8>, BytesCodec> = Cache::new(ns.clone(), BytesCodec);
        let typed: Cache<Listing> = Cache::new(ns, JsonCodec::new());

        raw.set("1", &b"not a listing".to_vec()).await.unwrap();
        assert_eq!(typed.get("1").await, Lookup::Miss(MissReason::Corrupt));

        typed.raw().flush().await;
        assert!(store.raw_get("listings:1").is_none());
        assert_eq!(raw.get("1").await.miss_reason(), Some(MissReason::Absent));
    }

    #[tokio::test]
    async fn test_subscribe_decodes_values() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let cache: Cache<Listing> = Cache::new(namespace(store, clock), JsonCodec::new());

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = cache.subscribe("1", move |value| sink.lock().push(value));

        cache.set("1", &listing(1)).await.unwrap();
        cache.delete("1").await;

        assert_eq!(*seen.lock(), vec![Some(listing(1)), None]);
    }

    #[tokio::test]
    async fn test_set_versioned() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let cache: Cache<Listing> = Cache::new(namespace(store, clock), JsonCodec::new());

        let mut newer = listing(1);
        newer.price_cents = 999;
        assert!(cache.set_versioned("1", &newer, 2).await.unwrap().is_applied());
        assert_eq!(
            cache.set_versioned("1", &listing(1), 1).await.unwrap(),
            WriteOutcome::Stale
        );
        assert_eq!(cache.get("1").await, Lookup::Hit(newer));
    }
}
