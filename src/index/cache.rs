//! Bounded LRU cache for search results
//!
//! Entries are evicted least-recently-used first whenever either bound is
//! exceeded:
//! - Maximum entry count (slots)
//! - Maximum total estimated size in bytes
//!
//! The cache keeps hit/miss counters and switches itself off when the hit
//! ratio over a probe window stays below a minimum. Clearing never changes
//! search results, only their speed.

use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::num::NonZeroUsize;

/// Bounds and self-disable policy of a cache
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum number of entries
    pub slots: usize,
    /// Maximum total estimated size of all entries
    pub max_bytes: usize,
    /// Minimum hit ratio for the cache to stay enabled
    pub min_hit_ratio: f64,
    /// Lookups per hit-ratio probe
    pub probe_window: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            slots: 128,
            max_bytes: 256 * 1024,
            min_hit_ratio: 0.0,
            probe_window: 256,
        }
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub bytes: usize,
    pub enabled: bool,
}

struct Entry<V> {
    value: V,
    size: usize,
}

/// LRU cache bounded in slots and bytes
pub struct BoundedCache<K: Hash + Eq, V> {
    inner: LruCache<K, Entry<V>>,
    settings: CacheSettings,
    bytes: usize,
    hits: u64,
    misses: u64,
    window_hits: u64,
    window_lookups: u64,
    enabled: bool,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    pub fn new(settings: CacheSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.slots.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: LruCache::new(capacity),
            settings,
            bytes: 0,
            hits: 0,
            misses: 0,
            window_hits: 0,
            window_lookups: 0,
            enabled: settings.slots > 0 && settings.max_bytes > 0,
        }
    }

    /// Whether lookups and inserts are currently served
    pub fn could_enable(&self) -> bool {
        self.enabled
    }

    /// Look up an entry, counting the hit or miss
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.enabled {
            return None;
        }

        let hit = self.inner.contains(key);
        if hit {
            self.hits += 1;
            self.window_hits += 1;
        } else {
            self.misses += 1;
        }
        self.window_lookups += 1;

        if self.window_lookups >= self.settings.probe_window {
            let ratio = self.window_hits as f64 / self.window_lookups as f64;
            self.window_hits = 0;
            self.window_lookups = 0;
            if ratio < self.settings.min_hit_ratio {
                tracing::debug!(
                    "Disabling search cache: hit ratio {:.3} below {:.3}",
                    ratio,
                    self.settings.min_hit_ratio
                );
                self.enabled = false;
                self.drop_entries();
                return None;
            }
        }

        if hit {
            self.inner.get(key).map(|entry| &entry.value)
        } else {
            None
        }
    }

    /// Insert an entry with its estimated size. Returns false if it can never fit.
    pub fn insert(&mut self, key: K, value: V, size: usize) -> bool {
        if !self.enabled || size > self.settings.max_bytes {
            return false;
        }

        if let Some(old) = self.inner.pop(&key) {
            self.bytes -= old.size;
        }
        while self.bytes + size > self.settings.max_bytes {
            match self.inner.pop_lru() {
                Some((_, evicted)) => self.bytes -= evicted.size,
                None => break,
            }
        }

        if let Some((_, evicted)) = self.inner.push(key, Entry { value, size }) {
            self.bytes -= evicted.size;
        }
        self.bytes += size;
        true
    }

    fn drop_entries(&mut self) {
        self.inner.clear();
        self.bytes = 0;
    }

    /// Drop all entries and re-enable the cache (the underlying data changed)
    pub fn clear(&mut self) {
        self.drop_entries();
        self.window_hits = 0;
        self.window_lookups = 0;
        self.enabled = self.settings.slots > 0 && self.settings.max_bytes > 0;
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.inner.len(),
            bytes: self.bytes,
            enabled: self.enabled,
        }
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("len", &self.inner.len())
            .field("bytes", &self.bytes)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(slots: usize, max_bytes: usize) -> CacheSettings {
        CacheSettings {
            slots,
            max_bytes,
            ..CacheSettings::default()
        }
    }

    #[test]
    fn test_cache_basic_operations() {
        let mut cache: BoundedCache<Vec<u8>, u32> = BoundedCache::new(settings(4, 1024));

        assert!(cache.get(&b"a".to_vec()).is_none());
        assert!(cache.insert(b"a".to_vec(), 1, 10));
        assert_eq!(cache.get(&b"a".to_vec()), Some(&1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.bytes, 10);
    }

    #[test]
    fn test_slot_bound_evicts_lru() {
        let mut cache: BoundedCache<u32, u32> = BoundedCache::new(settings(2, 1024));
        cache.insert(1, 10, 1);
        cache.insert(2, 20, 1);

        // Touch 1 so 2 becomes the eviction candidate
        cache.get(&1);
        cache.insert(3, 30, 1);

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&2).is_none());
        assert_eq!(cache.get(&1), Some(&10));
        assert_eq!(cache.get(&3), Some(&30));
        assert_eq!(cache.stats().bytes, 2);
    }

    #[test]
    fn test_byte_bound_evicts_until_fit() {
        let mut cache: BoundedCache<u32, u32> = BoundedCache::new(settings(16, 100));
        cache.insert(1, 1, 40);
        cache.insert(2, 2, 40);
        cache.insert(3, 3, 40);

        assert_eq!(cache.len(), 2);
        assert!(cache.stats().bytes <= 100);
        assert!(!cache.insert(4, 4, 101));
    }

    #[test]
    fn test_reinsert_replaces_size() {
        let mut cache: BoundedCache<u32, u32> = BoundedCache::new(settings(4, 100));
        cache.insert(1, 1, 60);
        cache.insert(1, 2, 30);
        assert_eq!(cache.stats().bytes, 30);
        assert_eq!(cache.get(&1), Some(&2));
    }

    #[test]
    fn test_low_hit_ratio_disables_until_cleared() {
        let mut cache: BoundedCache<u32, u32> = BoundedCache::new(CacheSettings {
            slots: 8,
            max_bytes: 1024,
            min_hit_ratio: 0.5,
            probe_window: 4,
        });

        for key in 0..4 {
            assert!(cache.get(&key).is_none());
        }
        assert!(!cache.could_enable());
        assert!(!cache.insert(9, 9, 1));

        cache.clear();
        assert!(cache.could_enable());
        assert!(cache.insert(9, 9, 1));
    }
}
