//! Cache Coordinator
//!
//! Public contract over the tiers: read-through with promotion, write-through,
//! pattern and tag invalidation, bulk warming, and an explicit
//! `get_or_compute` helper for callers that fetch from upstream on miss.
//!
//! # Concurrency
//!
//! Reads never take coordinator locks. Writes to the same key serialize
//! through a per-key mutex picked from a fixed shard pool; writes to
//! distinct keys run in parallel.
//!
//! # Error policy
//!
//! Tier errors on reads degrade to a miss for that tier, with a warning and
//! an error counter. Writes report failure only when every targeted tier
//! failed. Deletes are best-effort.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::entry::CacheEntry;
use super::l1::{L1Cache, L1Stats};
use super::l2::{L2Cache, L2Stats};
use crate::clock::Clock;
use crate::config::TtlTable;
use crate::error::{Error, Result};
use crate::key::{normalize_query_key, DataType, KeyPattern, ParamValue};
use crate::monitoring::{LatencyTracker, Metrics};

/// Which tier(s) an operation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTarget {
    /// Both tiers: read L1-then-L2 with promotion, write through
    #[default]
    Auto,
    /// In-memory tier only
    L1Only,
    /// Persistent tier only
    L2Only,
}

impl std::fmt::Display for CacheTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTarget::Auto => write!(f, "auto"),
            CacheTarget::L1Only => write!(f, "l1"),
            CacheTarget::L2Only => write!(f, "l2"),
        }
    }
}

/// Options for `set`. The logical size is always supplied by the caller;
/// start from [`SetOptions::sized`] and override the rest with struct
/// update syntax.
#[derive(Debug, Clone)]
pub struct SetOptions {
    /// Explicit lifetime; derived from `data_type` when unset
    pub ttl: Option<Duration>,
    /// Free-form label for bulk eviction
    pub tag: Option<String>,
    /// Value family, drives the TTL table
    pub data_type: Option<DataType>,
    /// Logical size of the payload in bytes
    pub size: u64,
    /// Tier selection
    pub target: CacheTarget,
}

impl SetOptions {
    /// Options for a payload of the given logical size, with every other
    /// field at its default
    pub fn sized(size: u64) -> Self {
        Self {
            ttl: None,
            tag: None,
            data_type: None,
            size,
            target: CacheTarget::Auto,
        }
    }
}

/// Aggregate view over both tiers
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    pub l1: L1Stats,
    pub l2: Option<L2Stats>,
}

/// Tiered cache front door
pub struct CacheCoordinator {
    l1: Arc<L1Cache>,
    l2: Option<Arc<L2Cache>>,
    metrics: Arc<Metrics>,
    clock: Arc<Clock>,
    ttl: TtlTable,
    namespace_version: u32,
    key_locks: Vec<Mutex<()>>,
}

impl CacheCoordinator {
    pub fn new(
        l1: Arc<L1Cache>,
        l2: Option<Arc<L2Cache>>,
        metrics: Arc<Metrics>,
        clock: Arc<Clock>,
        ttl: TtlTable,
        namespace_version: u32,
        shard_count: usize,
    ) -> Self {
        let shard_count = shard_count.max(1);
        Self {
            l1,
            l2,
            metrics,
            clock,
            ttl,
            namespace_version,
            key_locks: (0..shard_count).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Namespace version folded into keys built through this coordinator
    pub fn namespace_version(&self) -> u32 {
        self.namespace_version
    }

    /// Build a versioned key from canonicalized query parameters
    pub fn query_key(
        &self,
        data_type: DataType,
        prefix: &str,
        params: &BTreeMap<String, ParamValue>,
    ) -> String {
        normalize_query_key(data_type, prefix, self.namespace_version, params)
    }

    #[inline]
    fn lock_for(&self, key: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.key_locks[(hasher.finish() as usize) % self.key_locks.len()]
    }

    /// Look up a key. `Auto` tries L1 first, then L2, promoting an L2 hit
    /// into L1 with its remaining TTL and tag intact.
    pub fn get(&self, key: &str, target: CacheTarget) -> Option<Bytes> {
        if matches!(target, CacheTarget::Auto | CacheTarget::L1Only) {
            let tracker = LatencyTracker::start();
            if let Some(entry) = self.l1.get(key) {
                self.metrics.l1().record_hit(tracker.elapsed_ms());
                return Some(entry.value());
            }
            self.metrics.l1().record_miss();
            if target == CacheTarget::L1Only {
                return None;
            }
        }

        if let Some(l2) = &self.l2 {
            let tracker = LatencyTracker::start();
            match l2.get(key) {
                Ok(Some(entry)) => {
                    self.metrics.l2().record_hit(tracker.elapsed_ms());
                    let value = entry.value();
                    if target == CacheTarget::Auto {
                        self.promote(key, entry);
                    }
                    return Some(value);
                }
                Ok(None) => {
                    self.metrics.l2().record_miss();
                }
                Err(e) => {
                    // A tier failure is a miss, never a caller-visible error
                    warn!(
                        layer = "l2",
                        op = "get",
                        error = %e,
                        "tier read failed, degrading to miss"
                    );
                    self.metrics.l2().record_error();
                    self.metrics.l2().record_miss();
                }
            }
        }

        None
    }

    fn promote(&self, key: &str, entry: CacheEntry) {
        if let Err(e) = self.l1.set(key.to_string(), entry) {
            debug!(error = %e, "promotion into l1 skipped");
        }
    }

    /// Write a value. `Auto` writes through to both tiers; the write fails
    /// only if every targeted tier rejected it.
    pub fn set(&self, key: &str, value: Bytes, opts: SetOptions) -> Result<()> {
        if key.is_empty() {
            return Err(Error::Validation("cache key must not be empty".into()));
        }
        if let Some(ttl) = opts.ttl {
            if ttl.is_zero() {
                return Err(Error::Validation("ttl must be positive".into()));
            }
        }

        let ttl = opts.ttl.unwrap_or_else(|| self.ttl.ttl_for(opts.data_type));
        let size = opts.size;
        let entry = CacheEntry::new(
            value,
            size,
            self.clock.now(),
            Some(ttl),
            opts.tag.clone(),
            opts.data_type,
        );

        let _guard = self.lock_for(key).lock();

        let mut last_error: Option<Error> = None;
        let mut wrote_any = false;

        if matches!(opts.target, CacheTarget::Auto | CacheTarget::L1Only) {
            match self.l1.set(key.to_string(), entry.clone()) {
                Ok(()) => {
                    self.metrics.l1().record_set();
                    wrote_any = true;
                }
                Err(e) => {
                    warn!(layer = "l1", op = "set", error = %e, "tier write failed");
                    self.metrics.l1().record_error();
                    last_error = Some(e);
                }
            }
        }

        if matches!(opts.target, CacheTarget::Auto | CacheTarget::L2Only) {
            if let Some(l2) = &self.l2 {
                match l2.set(key, &entry) {
                    Ok(()) => {
                        self.metrics.l2().record_set();
                        wrote_any = true;
                    }
                    Err(e) => {
                        warn!(layer = "l2", op = "set", error = %e, "tier write failed");
                        self.metrics.l2().record_error();
                        last_error = Some(e);
                    }
                }
            } else if opts.target == CacheTarget::L2Only {
                return Err(Error::Config("persistent tier is disabled".into()));
            }
        }

        if wrote_any {
            Ok(())
        } else {
            Err(last_error.unwrap_or_else(|| Error::Config("no tier targeted".into())))
        }
    }

    /// Remove a key from the targeted tier(s); best-effort
    pub fn delete(&self, key: &str, target: CacheTarget) -> bool {
        let _guard = self.lock_for(key).lock();
        let mut deleted = false;

        if matches!(target, CacheTarget::Auto | CacheTarget::L1Only) && self.l1.delete(key) {
            self.metrics.l1().record_delete();
            deleted = true;
        }

        if matches!(target, CacheTarget::Auto | CacheTarget::L2Only) {
            if let Some(l2) = &self.l2 {
                match l2.delete(key) {
                    Ok(true) => {
                        self.metrics.l2().record_delete();
                        deleted = true;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(layer = "l2", op = "delete", error = %e, "tier delete failed");
                        self.metrics.l2().record_error();
                    }
                }
            }
        }

        deleted
    }

    /// Remove every key matching the pattern from both tiers; returns the
    /// total number of removals across tiers
    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let pattern = KeyPattern::parse(pattern);
        let mut removed = self.l1.invalidate_pattern(&pattern);
        if let Some(l2) = &self.l2 {
            removed += l2.invalidate_pattern(&pattern);
        }
        debug!(pattern = %pattern, removed, "pattern invalidation");
        removed
    }

    /// Remove every entry carrying the tag from both tiers
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        let mut removed = self.l1.invalidate_tag(tag);
        if let Some(l2) = &self.l2 {
            removed += l2.invalidate_tag(tag);
        }
        removed
    }

    /// Wipe the targeted tier(s)
    pub fn clear(&self, target: CacheTarget) {
        if matches!(target, CacheTarget::Auto | CacheTarget::L1Only) {
            self.l1.clear();
        }
        if matches!(target, CacheTarget::Auto | CacheTarget::L2Only) {
            if let Some(l2) = &self.l2 {
                if let Err(e) = l2.clear() {
                    warn!(layer = "l2", op = "clear", error = %e, "tier clear failed");
                    self.metrics.l2().record_error();
                }
            }
        }
    }

    /// Bulk insert; returns how many writes succeeded
    pub fn warm(
        &self,
        entries: Vec<(String, Bytes)>,
        ttl: Option<Duration>,
        tag: Option<String>,
        data_type: Option<DataType>,
    ) -> usize {
        let mut succeeded = 0;
        for (key, value) in entries {
            let opts = SetOptions {
                ttl,
                tag: tag.clone(),
                data_type,
                ..SetOptions::sized(value.len() as u64)
            };
            if self.set(&key, value, opts).is_ok() {
                succeeded += 1;
            }
        }
        succeeded
    }

    /// Read-through helper: return the cached value, or invoke `compute`,
    /// store its result write-through, and return it. `size_of` supplies
    /// the logical size of the computed payload for the cache write. Cache
    /// write failures never fail the computation.
    pub fn get_or_compute<F, S, E>(
        &self,
        key: &str,
        data_type: DataType,
        size_of: S,
        compute: F,
    ) -> std::result::Result<Bytes, E>
    where
        F: FnOnce() -> std::result::Result<Bytes, E>,
        S: FnOnce(&Bytes) -> u64,
    {
        if let Some(value) = self.get(key, CacheTarget::Auto) {
            return Ok(value);
        }

        let value = compute()?;
        self.metrics.add_bytes_downloaded(value.len() as u64);

        let opts = SetOptions {
            data_type: Some(data_type),
            ..SetOptions::sized(size_of(&value))
        };
        if let Err(e) = self.set(key, value.clone(), opts) {
            warn!(op = "get_or_compute", error = %e, "caching computed value failed");
        }
        Ok(value)
    }

    /// Aggregate tier statistics
    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            l1: self.l1.stats(),
            l2: self.l2.as_ref().map(|l2| l2.stats()),
        }
    }

    /// In-memory tier handle
    pub fn l1(&self) -> &L1Cache {
        &self.l1
    }

    /// Persistent tier handle, when enabled
    pub fn l2(&self) -> Option<&L2Cache> {
        self.l2.as_deref()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::l1::L1Config;
    use crate::cache::l2::L2Config;

    fn coordinator_at(
        dir: &std::path::Path,
        l1_max: u64,
        version: u32,
    ) -> (CacheCoordinator, Arc<Clock>, Arc<Metrics>) {
        let clock = Arc::new(Clock::new());
        let metrics = Arc::new(Metrics::new(100));
        let l1 = Arc::new(L1Cache::new(
            L1Config {
                max_bytes: l1_max,
                shard_count: 16,
            },
            Arc::clone(&clock),
        ));
        let l2 = Arc::new(
            L2Cache::open(
                L2Config {
                    enabled: true,
                    max_bytes: 10 * 1024 * 1024,
                    cache_dir: dir.to_path_buf(),
                },
                Arc::clone(&clock),
            )
            .unwrap(),
        );
        let coordinator = CacheCoordinator::new(
            l1,
            Some(l2),
            Arc::clone(&metrics),
            Arc::clone(&clock),
            TtlTable::default(),
            version,
            16,
        );
        (coordinator, clock, metrics)
    }

    fn memory_only(l1_max: u64) -> (CacheCoordinator, Arc<Clock>, Arc<Metrics>) {
        let clock = Arc::new(Clock::new());
        let metrics = Arc::new(Metrics::new(100));
        let l1 = Arc::new(L1Cache::new(
            L1Config {
                max_bytes: l1_max,
                shard_count: 16,
            },
            Arc::clone(&clock),
        ));
        let coordinator = CacheCoordinator::new(
            l1,
            None,
            Arc::clone(&metrics),
            Arc::clone(&clock),
            TtlTable::default(),
            1,
            16,
        );
        (coordinator, clock, metrics)
    }

    fn set_simple(c: &CacheCoordinator, key: &str, value: &[u8]) {
        c.set(
            key,
            Bytes::copy_from_slice(value),
            SetOptions {
                data_type: Some(DataType::Search),
                ..SetOptions::sized(value.len() as u64)
            },
        )
        .unwrap();
    }

    #[test]
    fn test_write_through_reaches_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, _m) = coordinator_at(dir.path(), 1024, 1);

        set_simple(&c, "search:v1:q:abcd", b"hello");

        assert!(c.l1().contains("search:v1:q:abcd"));
        assert!(c.l2().unwrap().contains("search:v1:q:abcd"));
    }

    #[test]
    fn test_l1_hit_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, m) = coordinator_at(dir.path(), 1024, 1);

        set_simple(&c, "k", b"hello");
        let value = c.get("k", CacheTarget::Auto).unwrap();
        assert_eq!(value.as_ref(), b"hello");
        assert_eq!(m.l1().hits(), 1);
        assert_eq!(m.l2().hits(), 0);
    }

    #[test]
    fn test_l2_hit_promotes_to_l1() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, m) = coordinator_at(dir.path(), 4096, 1);

        // Land the value only in L2
        c.set(
            "k",
            Bytes::from_static(b"warm"),
            SetOptions {
                target: CacheTarget::L2Only,
                data_type: Some(DataType::Search),
                ..SetOptions::sized(4)
            },
        )
        .unwrap();
        assert!(!c.l1().contains("k"));

        let value = c.get("k", CacheTarget::Auto).unwrap();
        assert_eq!(value.as_ref(), b"warm");
        assert_eq!(m.l1().misses(), 1);
        assert_eq!(m.l2().hits(), 1);

        // Promoted: the next read hits L1
        assert!(c.l1().contains("k"));
        c.get("k", CacheTarget::Auto).unwrap();
        assert_eq!(m.l1().hits(), 1);
    }

    #[test]
    fn test_promotion_preserves_remaining_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let (c, clock, _m) = coordinator_at(dir.path(), 4096, 1);

        c.set(
            "k",
            Bytes::from_static(b"v"),
            SetOptions {
                ttl: Some(Duration::from_secs(100)),
                target: CacheTarget::L2Only,
                ..SetOptions::sized(1)
            },
        )
        .unwrap();

        clock.advance(Duration::from_secs(60));
        c.get("k", CacheTarget::Auto).unwrap();
        assert!(c.l1().contains("k"));

        // 40 seconds remain; after 50 more the promoted copy must be gone
        clock.advance(Duration::from_secs(50));
        assert!(c.get("k", CacheTarget::Auto).is_none());
    }

    #[test]
    fn test_full_miss_records_both_layers() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, m) = coordinator_at(dir.path(), 1024, 1);

        assert!(c.get("absent", CacheTarget::Auto).is_none());
        assert_eq!(m.l1().misses(), 1);
        assert_eq!(m.l2().misses(), 1);
    }

    #[test]
    fn test_ttl_derived_from_data_type() {
        let dir = tempfile::tempdir().unwrap();
        let (c, clock, _m) = coordinator_at(dir.path(), 1024, 1);

        set_simple(&c, "k", b"searchy");

        // Default search TTL is 300 s
        clock.advance(Duration::from_secs(299));
        assert!(c.get("k", CacheTarget::Auto).is_some());
        clock.advance(Duration::from_secs(2));
        assert!(c.get("k", CacheTarget::Auto).is_none());
    }

    #[test]
    fn test_explicit_ttl_beats_table() {
        let dir = tempfile::tempdir().unwrap();
        let (c, clock, _m) = coordinator_at(dir.path(), 1024, 1);

        c.set(
            "k",
            Bytes::from_static(b"v"),
            SetOptions {
                ttl: Some(Duration::from_secs(5)),
                data_type: Some(DataType::Fulltext),
                ..SetOptions::sized(1)
            },
        )
        .unwrap();

        clock.advance(Duration::from_secs(6));
        assert!(c.get("k", CacheTarget::Auto).is_none());
    }

    #[test]
    fn test_empty_key_rejected() {
        let (c, _clock, _m) = memory_only(1024);
        let err = c
            .set("", Bytes::from_static(b"v"), SetOptions::sized(1))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let (c, _clock, _m) = memory_only(1024);
        let err = c
            .set(
                "k",
                Bytes::from_static(b"v"),
                SetOptions {
                    ttl: Some(Duration::from_secs(0)),
                    ..SetOptions::sized(1)
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_delete_from_all_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, _m) = coordinator_at(dir.path(), 1024, 1);

        set_simple(&c, "k", b"v");
        assert!(c.delete("k", CacheTarget::Auto));
        assert!(c.get("k", CacheTarget::Auto).is_none());
        assert!(!c.delete("k", CacheTarget::Auto));
    }

    #[test]
    fn test_invalidate_pattern_spans_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, _m) = coordinator_at(dir.path(), 4096, 1);

        set_simple(&c, "search:v1:q:aa", b"1");
        set_simple(&c, "search:v1:q:bb", b"2");
        set_simple(&c, "record:v1:r:cc", b"3");

        // Each key lives in both tiers
        let removed = c.invalidate_pattern("search:*");
        assert_eq!(removed, 4);
        assert!(c.get("search:v1:q:aa", CacheTarget::Auto).is_none());
        assert!(c.get("record:v1:r:cc", CacheTarget::Auto).is_some());
    }

    #[test]
    fn test_invalidate_tag_spans_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, _m) = coordinator_at(dir.path(), 4096, 1);

        c.set(
            "k1",
            Bytes::from_static(b"a"),
            SetOptions {
                tag: Some("import-42".to_string()),
                ..SetOptions::sized(1)
            },
        )
        .unwrap();
        set_simple(&c, "k2", b"b");

        assert_eq!(c.invalidate_tag("import-42"), 2);
        assert!(c.get("k1", CacheTarget::Auto).is_none());
        assert!(c.get("k2", CacheTarget::Auto).is_some());
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, _m) = coordinator_at(dir.path(), 4096, 1);

        set_simple(&c, "k1", b"a");
        set_simple(&c, "k2", b"b");
        c.clear(CacheTarget::Auto);

        assert!(c.get("k1", CacheTarget::Auto).is_none());
        assert_eq!(c.l1().len(), 0);
        assert_eq!(c.l2().unwrap().len(), 0);
    }

    #[test]
    fn test_warm_counts_successes() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, _m) = coordinator_at(dir.path(), 4096, 1);

        let entries = vec![
            ("w1".to_string(), Bytes::from_static(b"a")),
            ("w2".to_string(), Bytes::from_static(b"b")),
            ("".to_string(), Bytes::from_static(b"c")),
        ];
        let written = c.warm(entries, None, None, Some(DataType::Record));
        assert_eq!(written, 2);
        assert!(c.get("w1", CacheTarget::Auto).is_some());
    }

    #[test]
    fn test_get_or_compute_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, m) = coordinator_at(dir.path(), 4096, 1);

        let mut calls = 0;
        let value = c
            .get_or_compute("k", DataType::Record, |v| v.len() as u64, || {
                calls += 1;
                Ok::<_, Error>(Bytes::from_static(b"fetched"))
            })
            .unwrap();
        assert_eq!(value.as_ref(), b"fetched");
        assert_eq!(calls, 1);
        assert_eq!(m.snapshot().bytes_downloaded, 7);

        // Second call is served from cache
        let value = c
            .get_or_compute("k", DataType::Record, |v| v.len() as u64, || {
                calls += 1;
                Ok::<_, Error>(Bytes::from_static(b"never"))
            })
            .unwrap();
        assert_eq!(value.as_ref(), b"fetched");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_get_or_compute_propagates_compute_error() {
        let (c, _clock, _m) = memory_only(1024);

        let result: std::result::Result<Bytes, String> = c.get_or_compute(
            "k",
            DataType::Record,
            |v| v.len() as u64,
            || Err("upstream down".to_string()),
        );
        assert_eq!(result.unwrap_err(), "upstream down");
        // Nothing cached on failure
        assert!(c.get("k", CacheTarget::Auto).is_none());
    }

    #[test]
    fn test_memory_only_coordinator() {
        let (c, _clock, m) = memory_only(1024);

        set_simple(&c, "k", b"v");
        assert!(c.get("k", CacheTarget::Auto).is_some());
        assert_eq!(m.l2().hits() + m.l2().misses(), 0);
    }

    #[test]
    fn test_l2_only_target_without_l2_errors() {
        let (c, _clock, _m) = memory_only(1024);
        let err = c
            .set(
                "k",
                Bytes::from_static(b"v"),
                SetOptions {
                    target: CacheTarget::L2Only,
                    ..SetOptions::sized(1)
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_namespace_versions_produce_distinct_keys() {
        let dir1 = tempfile::tempdir().unwrap();
        let dir2 = tempfile::tempdir().unwrap();
        let (c1, _k1, _m1) = coordinator_at(dir1.path(), 1024, 1);
        let (c2, _k2, _m2) = coordinator_at(dir2.path(), 1024, 2);

        let params: BTreeMap<String, ParamValue> =
            BTreeMap::from([("q".to_string(), ParamValue::from("covid"))]);

        let key_v1 = c1.query_key(DataType::Search, "q", &params);
        let key_v2 = c2.query_key(DataType::Search, "q", &params);
        assert_ne!(key_v1, key_v2);
        assert!(key_v1.contains(":v1:"));
        assert!(key_v2.contains(":v2:"));
    }

    #[test]
    fn test_eviction_then_l2_backfill() {
        let dir = tempfile::tempdir().unwrap();
        let (c, _clock, m) = coordinator_at(dir.path(), 1024, 1);

        set_simple(&c, "search:v1:q:prized", b"hello");
        assert!(c.get("search:v1:q:prized", CacheTarget::Auto).is_some());
        assert_eq!(m.l1().hits(), 1);

        // Push the prized entry out of L1 with unrelated writes
        for i in 0..200 {
            set_simple(&c, &format!("filler:v1:f:{:04}", i), &[0u8; 10]);
        }
        assert!(!c.l1().contains("search:v1:q:prized"));

        // Served from L2, then promoted back into L1
        assert!(c.get("search:v1:q:prized", CacheTarget::Auto).is_some());
        assert!(m.l1().misses() >= 1);
        assert_eq!(m.l2().hits(), 1);

        c.get("search:v1:q:prized", CacheTarget::Auto).unwrap();
        assert_eq!(m.l1().hits(), 2);
    }

    #[test]
    fn test_concurrent_same_key_writes_serialize() {
        use std::thread;

        let (c, _clock, _m) = memory_only(1024 * 1024);
        let c = Arc::new(c);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for i in 0..100 {
                        let value = format!("value-{}-{}", t, i);
                        let size = value.len() as u64;
                        c.set(
                            "contested",
                            Bytes::from(value),
                            SetOptions::sized(size),
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // One of the written values survives intact
        let value = c.get("contested", CacheTarget::Auto).unwrap();
        assert!(value.starts_with(b"value-"));
    }
}
