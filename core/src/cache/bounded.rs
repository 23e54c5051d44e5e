//! Thread-safe LRU bounded by item count and an optional byte budget.

use std::hash::Hash;

use hashlink::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::config::CacheLimits;
use crate::types::SizeEstimate;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    cost: usize,
}

#[derive(Debug)]
struct Inner<K: Hash + Eq, V> {
    entries: LruCache<K, CacheEntry<V>>,
    bytes_used: usize,
    hits: u64,
    misses: u64,
}

/// Point-in-time counters for one cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub estimated_bytes: usize,
    pub byte_budget: Option<usize>,
}

/// LRU keyed store shared between the background loader and the consumer.
///
/// Eviction runs synchronously inside [`BoundedCache::set`]: the least recently used entries
/// are dropped until both the item limit and the byte budget hold.
#[derive(Debug)]
pub struct BoundedCache<K: Hash + Eq, V> {
    name: &'static str,
    capacity: usize,
    byte_budget: Option<usize>,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + SizeEstimate,
{
    pub fn new(name: &'static str, limits: CacheLimits) -> Self {
        Self {
            name,
            capacity: limits.max_items.max(1),
            byte_budget: limits.max_bytes,
            inner: Mutex::new(Inner {
                entries: LruCache::new_unbounded(),
                bytes_used: 0,
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_used(&self) -> usize {
        self.inner.lock().bytes_used
    }

    /// Look up a value, moving it to the most recently used position on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let value = inner.entries.get(key).map(|entry| entry.value.clone());
        match value {
            Some(_) => inner.hits = inner.hits.saturating_add(1),
            None => inner.misses = inner.misses.saturating_add(1),
        }
        value
    }

    /// Presence check that neither refreshes recency nor touches the counters.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    /// Insert or replace a value, then evict until the limits are satisfied.
    ///
    /// A single value larger than the whole byte budget is not stored, so that it cannot
    /// flush every other entry on its way in. Returns whether the value was stored.
    pub fn set(&self, key: K, value: V) -> bool {
        let cost = value.estimated_bytes();
        let mut inner = self.inner.lock();

        if let Some(previous) = inner.entries.remove(&key) {
            inner.bytes_used = inner.bytes_used.saturating_sub(previous.cost);
        }

        if self.byte_budget.is_some_and(|budget| cost > budget) {
            debug!(target: "cache", cache = self.name, cost, "entry exceeds byte budget, skipped");
            return false;
        }

        inner.bytes_used += cost;
        inner.entries.insert(key, CacheEntry { value, cost });
        self.evict_if_needed(&mut inner);
        true
    }

    /// Remove an entry if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let removed = inner.entries.remove(key)?;
        inner.bytes_used = inner.bytes_used.saturating_sub(removed.cost);
        Some(removed.value)
    }

    /// Drop every entry. Hit and miss counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes_used = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        let hit_rate = if lookups == 0 { 0.0 } else { inner.hits as f64 / lookups as f64 };
        CacheStats {
            count: inner.entries.len(),
            capacity: self.capacity,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            estimated_bytes: inner.bytes_used,
            byte_budget: self.byte_budget,
        }
    }

    fn evict_if_needed(&self, inner: &mut Inner<K, V>) {
        while inner.entries.len() > self.capacity
            || self.byte_budget.is_some_and(|budget| inner.bytes_used > budget)
        {
            match inner.entries.remove_lru() {
                Some((_key, oldest)) => {
                    inner.bytes_used = inner.bytes_used.saturating_sub(oldest.cost);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(items: usize) -> BoundedCache<&'static str, Vec<u8>> {
        BoundedCache::new("test", CacheLimits::items(items))
    }

    #[test]
    fn refreshed_entry_survives_eviction() {
        let cache = cache(2);
        cache.set("a", vec![1]);
        cache.set("b", vec![2]);
        cache.set("c", vec![3]);
        assert!(!cache.contains(&"a"));

        assert!(cache.get(&"b").is_some());
        cache.set("d", vec![4]);
        assert!(!cache.contains(&"c"));
        assert!(cache.contains(&"b"));
        assert!(cache.contains(&"d"));
    }

    #[test]
    fn byte_budget_evicts_oldest_first() {
        let cache: BoundedCache<u32, Vec<u8>> =
            BoundedCache::new("bytes", CacheLimits::items(10).with_bytes(64));
        cache.set(1, vec![0; 32]);
        cache.set(2, vec![0; 32]);
        cache.set(3, vec![0; 16]);

        assert!(!cache.contains(&1));
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
        assert_eq!(cache.bytes_used(), 48);
    }

    #[test]
    fn oversized_value_is_rejected_without_flushing() {
        let cache: BoundedCache<u32, Vec<u8>> =
            BoundedCache::new("bytes", CacheLimits::items(10).with_bytes(64));
        cache.set(1, vec![0; 16]);
        assert!(!cache.set(2, vec![0; 65]));
        assert!(cache.contains(&1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn update_replaces_cost_and_refreshes() {
        let cache: BoundedCache<u32, Vec<u8>> =
            BoundedCache::new("update", CacheLimits::items(2).with_bytes(100));
        cache.set(1, vec![0; 10]);
        cache.set(2, vec![0; 10]);
        cache.set(1, vec![0; 40]);
        assert_eq!(cache.bytes_used(), 50);

        cache.set(3, vec![0; 1]);
        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = cache(4);
        cache.set("a", vec![1, 2, 3]);
        let _ = cache.get(&"a");
        let _ = cache.get(&"missing");

        let stats = cache.stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.estimated_bytes, 3);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().estimated_bytes, 0);
    }

    #[test]
    fn zero_capacity_is_treated_as_one() {
        let cache = cache(0);
        cache.set("a", vec![1]);
        cache.set("b", vec![2]);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&"b"));
    }
}
