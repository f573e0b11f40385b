//! Sharded Map
//!
//! Concurrent hashmap split across N independently locked shards so readers
//! on different keys never contend. The shard count comes from the engine
//! configuration (one knob also sizes the coordinator's key-lock pool).

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Single shard containing a hashmap and access counters
pub struct Shard<V> {
    map: RwLock<HashMap<String, V>>,
    count: AtomicU64,
}

impl<V> Shard<V> {
    fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
            count: AtomicU64::new(0),
        }
    }

    /// Number of entries in this shard
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Shard<V> {
    pub fn get(&self, key: &str) -> Option<V> {
        self.map.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.read().contains_key(key)
    }

    /// Insert a value, returning the old value if present
    pub fn insert(&self, key: String, value: V) -> Option<V> {
        let old = self.map.write().insert(key, value);
        if old.is_none() {
            self.count.fetch_add(1, Ordering::Relaxed);
        }
        old
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let removed = self.map.write().remove(key);
        if removed.is_some() {
            self.count.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn clear(&self) {
        self.map.write().clear();
        self.count.store(0, Ordering::Relaxed);
    }

    /// Snapshot of this shard's entries (for eviction scans)
    pub fn entries(&self) -> Vec<(String, V)> {
        self.map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Snapshot of this shard's keys
    pub fn keys(&self) -> Vec<String> {
        self.map.read().keys().cloned().collect()
    }

    /// Remove every entry the predicate selects; returns removed entries
    pub fn remove_matching<F>(&self, mut predicate: F) -> Vec<(String, V)>
    where
        F: FnMut(&str, &V) -> bool,
    {
        let mut guard = self.map.write();
        let doomed: Vec<String> = guard
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, _)| k.clone())
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for key in doomed {
            if let Some(v) = guard.remove(&key) {
                self.count.fetch_sub(1, Ordering::Relaxed);
                removed.push((key, v));
            }
        }
        removed
    }
}

/// Map sharded over a runtime-configured number of locks
pub struct ShardedMap<V> {
    shards: Vec<Shard<V>>,
}

impl<V: Clone> ShardedMap<V> {
    /// Create a sharded map; `shard_count` is clamped to at least 1
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            shards: (0..shard_count).map(|_| Shard::new()).collect(),
        }
    }

    #[inline]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard_for(&self, key: &str) -> &Shard<V> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Access a shard by index (for whole-map scans)
    #[inline]
    pub fn shard(&self, index: usize) -> &Shard<V> {
        &self.shards[index % self.shards.len()]
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.shard_for(key).get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.shard_for(key).contains_key(key)
    }

    pub fn insert(&self, key: String, value: V) -> Option<V> {
        let shard = self.shard_for(&key);
        shard.insert(key, value)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.shard_for(key).remove(key)
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.is_empty())
    }

    /// Snapshot of all entries across shards
    pub fn entries(&self) -> Vec<(String, V)> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(shard.entries());
        }
        out
    }

    /// Snapshot of all keys across shards
    pub fn keys(&self) -> Vec<String> {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(shard.keys());
        }
        out
    }

    /// Remove matching entries across every shard; returns removed entries
    pub fn remove_matching<F>(&self, mut predicate: F) -> Vec<(String, V)>
    where
        F: FnMut(&str, &V) -> bool,
    {
        let mut out = Vec::new();
        for shard in &self.shards {
            out.extend(shard.remove_matching(&mut predicate));
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creation() {
        let map: ShardedMap<i32> = ShardedMap::new(16);
        assert!(map.is_empty());
        assert_eq!(map.shard_count(), 16);
    }

    #[test]
    fn test_zero_shards_clamped() {
        let map: ShardedMap<i32> = ShardedMap::new(0);
        assert_eq!(map.shard_count(), 1);
    }

    #[test]
    fn test_insert_get_remove() {
        let map: ShardedMap<i32> = ShardedMap::new(16);

        assert!(map.insert("a".to_string(), 1).is_none());
        assert_eq!(map.insert("a".to_string(), 2), Some(1));
        assert_eq!(map.get("a"), Some(2));
        assert_eq!(map.len(), 1);

        assert_eq!(map.remove("a"), Some(2));
        assert!(map.get("a").is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_contains_key() {
        let map: ShardedMap<i32> = ShardedMap::new(4);
        map.insert("x".to_string(), 10);
        assert!(map.contains_key("x"));
        assert!(!map.contains_key("y"));
    }

    #[test]
    fn test_clear() {
        let map: ShardedMap<i32> = ShardedMap::new(4);
        for i in 0..100 {
            map.insert(format!("key-{}", i), i);
        }
        assert_eq!(map.len(), 100);
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn test_entries_snapshot() {
        let map: ShardedMap<i32> = ShardedMap::new(4);
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);

        let mut entries = map.entries();
        entries.sort();
        assert_eq!(entries, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_remove_matching() {
        let map: ShardedMap<i32> = ShardedMap::new(4);
        for i in 0..10 {
            map.insert(format!("key-{}", i), i);
        }

        let removed = map.remove_matching(|_, v| *v % 2 == 0);
        assert_eq!(removed.len(), 5);
        assert_eq!(map.len(), 5);
        assert!(map.get("key-0").is_none());
        assert_eq!(map.get("key-1"), Some(1));
    }

    #[test]
    fn test_distribution() {
        let map: ShardedMap<i32> = ShardedMap::new(16);
        for i in 0..1000 {
            map.insert(format!("key-{}", i), i);
        }

        // No shard should hold a wildly disproportionate share
        let max = (0..16).map(|i| map.shard(i).len()).max().unwrap();
        assert!(max < 200, "uneven distribution: max shard has {}", max);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let map: Arc<ShardedMap<i32>> = Arc::new(ShardedMap::new(16));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let key = format!("key-{}-{}", t, i);
                        map.insert(key.clone(), i);
                        map.get(&key);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(map.len(), 8000);
    }
}
