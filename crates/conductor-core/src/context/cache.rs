//! TTL cache abstraction for prepared context bundles.
//!
//! Callers only see [`TtlCache`]; the in-process [`InMemoryTtlCache`] can be
//! replaced by a shared/distributed implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

/// Key → value cache where each entry carries its own expiry.
#[async_trait]
pub trait TtlCache<K, V>: Send + Sync
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Live value for `key`; expired entries read as absent.
    async fn get(&self, key: &K) -> Option<V>;

    /// Insert or replace, expiring after `ttl`.
    async fn insert(&self, key: K, value: V, ttl: Duration);

    /// Remove every entry whose key matches `predicate`; returns the count.
    async fn remove_where(&self, predicate: &(dyn for<'k> Fn(&'k K) -> bool + Send + Sync)) -> usize;

    /// Drop expired entries; returns the count.
    async fn purge_expired(&self) -> usize;

    /// Entries currently held (including not-yet-purged expired ones).
    async fn len(&self) -> usize;
}

/// Process-local cache on a [`DashMap`].
#[derive(Debug)]
pub struct InMemoryTtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, (V, Instant)>,
}

impl<K: Eq + Hash, V> Default for InMemoryTtlCache<K, V> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> InMemoryTtlCache<K, V> {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<K, V> TtlCache<K, V> for InMemoryTtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let hit = self.entries.get(key).and_then(|entry| {
            let (value, expires_at) = entry.value();
            (*expires_at > now).then(|| value.clone())
        });
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires_at)| *expires_at <= now);
        }
        hit
    }

    async fn insert(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, (value, Instant::now() + ttl));
    }

    async fn remove_where(&self, predicate: &(dyn for<'k> Fn(&'k K) -> bool + Send + Sync)) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| !predicate(k));
        before.saturating_sub(self.entries.len())
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires_at)| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let cache: InMemoryTtlCache<&'static str, u32> = InMemoryTtlCache::new();
        cache.insert("a", 1, Duration::from_secs(10)).await;
        assert_eq!(cache.get(&"a").await, Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&"a").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_remove_where() {
        let cache: InMemoryTtlCache<(u8, u8), &'static str> = InMemoryTtlCache::new();
        cache.insert((1, 1), "short", Duration::from_secs(1)).await;
        cache.insert((1, 2), "long", Duration::from_secs(100)).await;
        cache.insert((2, 1), "other", Duration::from_secs(100)).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired().await, 1);

        let removed = cache.remove_where(&|k: &(u8, u8)| k.0 == 1).await;
        assert_eq!(removed, 1);
        assert_eq!(cache.get(&(2, 1)).await, Some("other"));
    }
}
