//! L1 Cache - In-Memory Tier
//!
//! Bounded in-memory store over a sharded hashmap. Eviction is strictly
//! least-recently-used by last-access time with insertion order breaking
//! ties; expired entries are purged on touch and during eviction scans.
//! The byte budget is enforced before every insert.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::entry::CacheEntry;
use super::shard::ShardedMap;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::key::KeyPattern;

/// Default L1 budget (500 MiB)
pub const DEFAULT_L1_MAX_BYTES: u64 = 500 * 1024 * 1024;

/// L1 Cache configuration
#[derive(Debug, Clone)]
pub struct L1Config {
    /// Hard byte budget
    pub max_bytes: u64,
    /// Number of map shards
    pub shard_count: usize,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_L1_MAX_BYTES,
            shard_count: 64,
        }
    }
}

/// L1 cache statistics
#[derive(Debug, Clone)]
pub struct L1Stats {
    pub size_bytes: u64,
    pub max_bytes: u64,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub errors: u64,
    pub hit_ratio: f64,
    pub utilization: f64,
}

/// In-memory cache tier
pub struct L1Cache {
    storage: ShardedMap<CacheEntry>,
    config: L1Config,
    clock: Arc<Clock>,
    current_size: AtomicU64,
    /// Monotonic insertion counter; breaks LRU ties
    next_seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

impl L1Cache {
    /// Create an L1 cache over the shared clock
    pub fn new(config: L1Config, clock: Arc<Clock>) -> Self {
        let shard_count = config.shard_count;
        Self {
            storage: ShardedMap::new(shard_count),
            config,
            clock,
            current_size: AtomicU64::new(0),
            next_seq: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Get an entry; expired entries are purged and reported as misses
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now();

        match self.storage.get(key) {
            Some(entry) => {
                if entry.is_expired(now) {
                    if self.storage.remove(key).is_some() {
                        self.current_size.fetch_sub(entry.size(), Ordering::Relaxed);
                    }
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                entry.record_access(now);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert an entry, atomically replacing any previous value under the
    /// same key. Evicts least-recently-used entries first when the budget
    /// would be exceeded.
    pub fn set(&self, key: String, mut entry: CacheEntry) -> Result<()> {
        let size = entry.size();

        if size > self.config.max_bytes {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Validation(format!(
                "value of {} bytes exceeds tier budget of {} bytes",
                size, self.config.max_bytes
            )));
        }

        entry.set_seq(self.next_seq.fetch_add(1, Ordering::Relaxed));

        let old = self.storage.insert(key.clone(), entry);
        if let Some(old_entry) = old {
            let old_size = old_entry.size();
            if size >= old_size {
                self.current_size
                    .fetch_add(size - old_size, Ordering::Relaxed);
            } else {
                self.current_size
                    .fetch_sub(old_size - size, Ordering::Relaxed);
            }
        } else {
            self.current_size.fetch_add(size, Ordering::Relaxed);
        }
        self.sets.fetch_add(1, Ordering::Relaxed);

        // Evict after the insert so concurrent writers cannot leave the tier
        // over budget; the entry just written is never its own victim.
        if self.current_size.load(Ordering::Relaxed) > self.config.max_bytes {
            self.evict_to_budget(&key);
        }

        Ok(())
    }

    /// Remove an entry
    pub fn delete(&self, key: &str) -> bool {
        if let Some(entry) = self.storage.remove(key) {
            self.current_size.fetch_sub(entry.size(), Ordering::Relaxed);
            self.deletes.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        match self.storage.get(key) {
            Some(entry) => !entry.is_expired(self.clock.now()),
            None => false,
        }
    }

    /// Wipe the tier
    pub fn clear(&self) {
        self.storage.clear();
        self.current_size.store(0, Ordering::Relaxed);
    }

    /// Keys matching a pattern (expired entries excluded)
    pub fn keys_matching(&self, pattern: &KeyPattern) -> Vec<String> {
        let now = self.clock.now();
        self.storage
            .entries()
            .into_iter()
            .filter(|(k, e)| !e.is_expired(now) && pattern.matches(k))
            .map(|(k, _)| k)
            .collect()
    }

    /// Remove every key matching the pattern; returns how many were removed
    pub fn invalidate_pattern(&self, pattern: &KeyPattern) -> usize {
        let removed = self.storage.remove_matching(|k, _| pattern.matches(k));
        let mut freed = 0u64;
        for (_, entry) in &removed {
            freed += entry.size();
        }
        self.current_size.fetch_sub(freed, Ordering::Relaxed);
        self.deletes.fetch_add(removed.len() as u64, Ordering::Relaxed);
        removed.len()
    }

    /// Remove every entry carrying the tag; returns how many were removed
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let removed = self.storage.remove_matching(|_, e| e.tag() == Some(tag));
        let mut freed = 0u64;
        for (_, entry) in &removed {
            freed += entry.size();
        }
        self.current_size.fetch_sub(freed, Ordering::Relaxed);
        self.deletes.fetch_add(removed.len() as u64, Ordering::Relaxed);
        removed.len()
    }

    /// Shrink the tier back inside its budget. Expired entries go first,
    /// then strict LRU order (ties by insertion sequence, oldest first).
    /// `protect` is the key just written and is never its own victim.
    fn evict_to_budget(&self, protect: &str) {
        let now = self.clock.now();

        // Purge expired entries first
        let expired = self
            .storage
            .remove_matching(|k, e| k != protect && e.is_expired(now));
        let mut freed = 0u64;
        for (_, entry) in &expired {
            freed += entry.size();
        }
        if freed > 0 {
            self.current_size.fetch_sub(freed, Ordering::Relaxed);
            self.evictions
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
        }

        if self.current_size.load(Ordering::Relaxed) <= self.config.max_bytes {
            return;
        }

        // Strict LRU: last access ascending, insertion sequence breaks ties
        let mut candidates: Vec<(String, u64, u64, u64)> = self
            .storage
            .entries()
            .into_iter()
            .filter(|(k, _)| k != protect)
            .map(|(k, e)| (k, e.last_access(), e.seq(), e.size()))
            .collect();
        candidates.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.cmp(&b.2)));

        let mut evicted = 0u64;
        for (key, _, _, size) in candidates {
            if self.current_size.load(Ordering::Relaxed) <= self.config.max_bytes {
                break;
            }
            if self.storage.remove(&key).is_some() {
                self.current_size.fetch_sub(size, Ordering::Relaxed);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(evicted, "l1 eviction pass");
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    pub fn max_bytes(&self) -> u64 {
        self.config.max_bytes
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn utilization(&self) -> f64 {
        if self.config.max_bytes == 0 {
            return 0.0;
        }
        self.size_bytes() as f64 / self.config.max_bytes as f64
    }

    /// Snapshot tier statistics
    pub fn stats(&self) -> L1Stats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        L1Stats {
            size_bytes: self.size_bytes(),
            max_bytes: self.config.max_bytes,
            entries: self.len(),
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions(),
            errors: self.errors.load(Ordering::Relaxed),
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            utilization: self.utilization(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
