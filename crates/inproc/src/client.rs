//! In-process cache client: TTL entries stored in a heap-ordered LRU cache

use std::borrow::Borrow;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use heapcache::{CacheError, LruCache, Result};
use tracing::debug;

use crate::stats::CacheStats;

/// Used when `now + ttl` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Stored value with its expiry time
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<V> {
    /// Cached value
    pub value: V,
    /// Moment the entry turns stale
    pub expires_at: Instant,
}

impl<V> Entry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self { value, expires_at }
    }

    /// Remaining time to live, `None` once stale
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_at.checked_duration_since(Instant::now())
    }

    /// True once the expiry time has passed
    pub fn is_stale(&self) -> bool {
        self.expires_at <= Instant::now()
    }

    /// How long the entry has been stale (zero while fresh)
    pub fn stale_for(&self) -> Duration {
        Instant::now().saturating_duration_since(self.expires_at)
    }
}

/// Cache client for data that lives in this process.
///
/// Entries carry a TTL. Stale entries stay in the cache (and are returned by
/// [`get_ttl`](Self::get_ttl)) until evicted or [`purge`](Self::purge)d.
pub struct InprocCacheClient<K, V> {
    /// LRU store holding value + expiry
    store: LruCache<K, Entry<V>>,

    /// Cache statistics
    stats: Arc<CacheStats>,
}

impl<K, V> InprocCacheClient<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a new client holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let stats = Arc::new(CacheStats::new());
        let evictions = Arc::clone(&stats);
        let store = LruCache::new(capacity)
            .with_eviction_callback(move |_, _| evictions.record_eviction());

        Self { store, stats }
    }

    /// Store a value for `ttl`
    pub fn put(&self, key: K, value: V, ttl: Duration) {
        self.store.set(key, Entry::new(value, ttl));
        self.stats.record_insert();
    }

    /// Get the entry, fresh or stale.
    ///
    /// Only a missing key is a [`CacheError::Miss`]; callers inspect
    /// [`Entry::ttl`] to tell stale entries apart.
    pub fn get_ttl<Q>(&self, key: &Q) -> Result<Entry<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.store.get(key) {
            Some(entry) => {
                if entry.is_stale() {
                    self.stats.record_miss();
                } else {
                    self.stats.record_hit();
                }
                Ok(entry)
            }
            None => {
                self.stats.record_miss();
                Err(CacheError::Miss)
            }
        }
    }

    /// Get a fresh value. Missing and stale entries are both misses.
    pub fn get<Q>(&self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.get_ttl(key)?;
        if entry.is_stale() {
            Err(CacheError::Miss)
        } else {
            Ok(entry.value)
        }
    }

    /// Get a fresh value or fall back to `default`
    pub fn get_or<Q>(&self, key: &Q, default: V) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).unwrap_or(default)
    }

    /// Check for a fresh entry without touching it.
    ///
    /// With a `margin`, entries with that much or less time to live count as
    /// stale.
    pub fn contains<Q>(&self, key: &Q, margin: Option<Duration>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let margin = margin.unwrap_or(Duration::ZERO);
        self.store
            .peek(key)
            .and_then(|entry| entry.ttl())
            .map_or(false, |ttl| ttl > margin)
    }

    /// Remove a key. Missing keys are ignored.
    pub fn delete<Q>(&self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let _ = self.store.delete(key);
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Remove entries that have been stale for longer than `timeout`, then
    /// compact the store. Scan, removal and compaction share one critical
    /// section, so a concurrent `put` is never lost. The removed entries are
    /// handed back so they are dropped by the caller, outside any lock.
    pub fn purge(&self, timeout: Duration) -> Vec<(K, Entry<V>)> {
        let removed = self
            .store
            .remove_if(|_, entry| entry.is_stale() && entry.stale_for() > timeout);

        debug!(removed = removed.len(), remaining = self.store.len(), "purged stale entries");
        removed
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Number of entries, stale ones included
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Get cache capacity
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }
}
