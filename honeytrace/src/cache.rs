//! Per-instance, bounded, TTL-based caches.
//!
//! Three named caches are provided to the rest of a [`crate::tracer::TracerInstance`]:
//! `attribute_normalization` (high churn, 5-minute TTL), `resource_detection`
//! (1-hour TTL), and `config_resolution` (15-minute TTL). Caches are never
//! shared across instances, and a failure anywhere in the cache path
//! degrades to a cache miss rather than propagating.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
    last_accessed: Instant,
    insertion_order: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Default)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub current_entries: u64,
}

struct NamedCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    max_size: usize,
    ttl: Duration,
    insertion_counter: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K, V> NamedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_size,
            ttl,
            insertion_counter: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            entry.last_accessed = now;
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value.clone());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, key: K, value: V) {
        let now = Instant::now();
        if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
            self.evict_one();
        }
        let order = self.insertion_counter.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                expires_at: now + self.ttl,
                last_accessed: now,
                insertion_order: order,
            },
        );
    }

    /// Evicts the least-recently-inserted entry. The spec calls for
    /// "least-recently-inserted" eviction on overflow, distinct from the
    /// LRU-by-access variant the cache module this is grounded on also
    /// supports; insertion order is tracked explicitly for this reason.
    fn evict_one(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.insertion_order)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        for key in expired {
            self.entries.remove(&key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            current_entries: self.entries.len() as u64,
        }
    }

    fn clear(&self) {
        self.entries.clear();
    }
}

/// The three cache names the processor and resolver address caches by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheName {
    AttributeNormalization,
    ResourceDetection,
    ConfigResolution,
}

/// Owns the three named per-instance caches plus a background sweep
/// task. Dropping the manager aborts the sweep task; there is no
/// process-wide cache state left behind.
pub struct CacheManager {
    enabled: bool,
    attribute_normalization: Arc<NamedCache<String, String>>,
    resource_detection: Arc<NamedCache<String, String>>,
    config_resolution: Arc<NamedCache<String, String>>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    pub fn new(enabled: bool, max_size: usize) -> Arc<Self> {
        let manager = Arc::new(Self {
            enabled,
            attribute_normalization: Arc::new(NamedCache::new(max_size, Duration::from_secs(300))),
            resource_detection: Arc::new(NamedCache::new(max_size.min(100).max(1), Duration::from_secs(3600))),
            config_resolution: Arc::new(NamedCache::new(max_size.min(100).max(1), Duration::from_secs(900))),
            sweep_handle: Mutex::new(None),
        });
        if enabled {
            manager.clone().start_sweep(Duration::from_secs(60));
        }
        manager
    }

    fn start_sweep(self: Arc<Self>, interval: Duration) {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.attribute_normalization.sweep_expired();
                self.resource_detection.sweep_expired();
                self.config_resolution.sweep_expired();
            }
        });
        // best-effort: only one sweep task should ever be spawned per
        // manager, and `new` is the only caller.
        if let Ok(mut guard) = self.sweep_handle.try_lock() {
            *guard = Some(handle);
        }
    }

    fn cache_for(&self, name: CacheName) -> &Arc<NamedCache<String, String>> {
        match name {
            CacheName::AttributeNormalization => &self.attribute_normalization,
            CacheName::ResourceDetection => &self.resource_detection,
            CacheName::ConfigResolution => &self.config_resolution,
        }
    }

    /// Returns `None` both on a genuine miss and when caching is
    /// disabled entirely -- callers must treat both identically,
    /// per the "bypass on disable" contract.
    pub fn get(&self, name: CacheName, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        self.cache_for(name).get(&key.to_string())
    }

    pub fn put(&self, name: CacheName, key: String, value: String) {
        if !self.enabled {
            return;
        }
        self.cache_for(name).put(key, value);
    }

    pub fn statistics(&self, name: CacheName) -> CacheStatistics {
        self.cache_for(name).statistics()
    }

    pub fn clear_all(&self) {
        self.attribute_normalization.clear();
        self.resource_detection.clear();
        self.config_resolution.clear();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweep_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_always_misses_without_touching_storage() {
        let manager = CacheManager::new(false, 10);
        manager.put(CacheName::ConfigResolution, "k".into(), "v".into());
        assert!(manager.get(CacheName::ConfigResolution, "k").is_none());
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let manager = CacheManager::new(true, 10);
        manager.put(CacheName::AttributeNormalization, "k".into(), "v".into());
        assert_eq!(
            manager.get(CacheName::AttributeNormalization, "k"),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn overflow_evicts_oldest_insertion() {
        let manager = CacheManager::new(true, 2);
        manager.put(CacheName::ConfigResolution, "a".into(), "1".into());
        manager.put(CacheName::ConfigResolution, "b".into(), "2".into());
        manager.put(CacheName::ConfigResolution, "c".into(), "3".into());
        assert!(manager.get(CacheName::ConfigResolution, "a").is_none());
        assert_eq!(manager.statistics(CacheName::ConfigResolution).evictions, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss_and_counts_as_expiration() {
        let cache: NamedCache<String, String> = NamedCache::new(10, Duration::from_millis(1));
        cache.put("k".to_string(), "v".to_string());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.get(&"k".to_string()).is_none());
        assert_eq!(cache.statistics().expirations, 1);
    }

    #[tokio::test]
    async fn two_instances_of_the_manager_never_share_entries() {
        let a = CacheManager::new(true, 10);
        let b = CacheManager::new(true, 10);
        a.put(CacheName::ConfigResolution, "k".into(), "a-value".into());
        assert!(b.get(CacheName::ConfigResolution, "k").is_none());
    }
}
