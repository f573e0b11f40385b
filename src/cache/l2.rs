//! L2 Cache - Persistent Tier
//!
//! Durable counterpart to L1 over an embedded sled store. Same external
//! contract, survives restarts. The store is ephemeral by contract: an
//! incompatible record schema at open destroys and recreates it rather than
//! migrating.
//!
//! # Design
//!
//! - One sled tree for entries, one meta tree holding the schema descriptor
//! - Records carry wall-clock expiry so remaining TTL survives restarts
//! - LRU eviction by last-access; access time rewritten on every hit
//! - An advisory file lock holds the directory to a single process
//! - Transient I/O failures retry up to 3 times inside a 500 ms budget

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::key::{DataType, KeyPattern};

/// Default L2 budget (5 GiB)
pub const DEFAULT_L2_MAX_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Record layout version; bump when the record struct changes shape
const SCHEMA_VERSION: u32 = 1;

/// Fields a compatible store must carry. File-backed cache layouts probe
/// for `size`, `mode`, and `filename` columns; the latter two only exist
/// where large values are spilled into separate files. `L2Record` holds
/// its value inline, so `mode` and `filename` have no counterpart here and
/// the probe checks the inline layout's own required fields instead.
const REQUIRED_FIELDS: [&str; 4] = ["size", "expires_wall_ms", "last_access_ms", "data_type"];

const LOCKFILE: &str = "lockfile";
const STORE_DIR: &str = "store";

/// L2 Cache configuration
#[derive(Debug, Clone)]
pub struct L2Config {
    /// Whether the tier participates at all (consumed by the engine)
    pub enabled: bool,
    /// Hard byte budget
    pub max_bytes: u64,
    /// Directory holding the store and its lockfile
    pub cache_dir: PathBuf,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            max_bytes: DEFAULT_L2_MAX_BYTES,
            cache_dir: PathBuf::from("./cache/l2"),
        }
    }
}

/// Schema descriptor persisted in the meta tree
#[derive(Debug, Serialize, Deserialize)]
struct SchemaDescriptor {
    version: u32,
    fields: Vec<String>,
}

/// On-disk record
#[derive(Debug, Serialize, Deserialize)]
struct L2Record {
    value: Vec<u8>,
    size: u64,
    created_wall_ms: i64,
    /// Wall-clock expiry; `None` means the entry never expires
    expires_wall_ms: Option<i64>,
    tag: Option<String>,
    data_type: Option<DataType>,
    last_access_ms: i64,
}

/// L2 cache statistics
#[derive(Debug, Clone)]
pub struct L2Stats {
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

/// Persistent cache tier
pub struct L2Cache {
    db: sled::Db,
    entries: sled::Tree,
    config: L2Config,
    clock: Arc<Clock>,
    current_size: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
    /// Held for the lifetime of the tier
    _lock: File,
}

impl L2Cache {
    /// Open (or recreate) the persistent tier
    pub fn open(config: L2Config, clock: Arc<Clock>) -> Result<Self> {
        std::fs::create_dir_all(&config.cache_dir)?;

        let lock = Self::acquire_lock(&config.cache_dir)?;
        let store_path = config.cache_dir.join(STORE_DIR);

        let db = Self::open_validated(&store_path)?;
        let entries = db.open_tree("entries")?;

        let cache = Self {
            db,
            entries,
            config,
            clock,
            current_size: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            _lock: lock,
        };

        cache.rebuild_size_accounting();

        // A store reopened with a smaller budget must shrink immediately
        if cache.current_size.load(Ordering::Relaxed) > cache.config.max_bytes {
            cache.evict_to_budget(None);
        }

        Ok(cache)
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let path = dir.join(LOCKFILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        file.try_lock_exclusive()
            .map_err(|_| Error::DirectoryLocked(path.display().to_string()))?;
        Ok(file)
    }

    /// Open sled and verify the schema descriptor; destroy and recreate the
    /// store on any incompatibility. The cache is ephemeral, so losing its
    /// contents is preferable to migrating them.
    fn open_validated(store_path: &Path) -> Result<sled::Db> {
        let db = sled::open(store_path)?;

        if Self::schema_compatible(&db)? {
            return Ok(db);
        }

        warn!(
            path = %store_path.display(),
            "incompatible cache store schema, recreating"
        );
        drop(db);
        // Removes the data files and every auxiliary file sled keeps
        std::fs::remove_dir_all(store_path)?;

        let db = sled::open(store_path)?;
        Self::write_schema(&db)?;
        Ok(db)
    }

    fn schema_compatible(db: &sled::Db) -> Result<bool> {
        let meta = db.open_tree("meta")?;
        match meta.get("schema")? {
            None => {
                // Fresh store: stamp it and carry on
                if db.tree_names().len() <= 2 {
                    Self::write_schema(db)?;
                    return Ok(true);
                }
                Ok(false)
            }
            Some(raw) => match bincode::deserialize::<SchemaDescriptor>(&raw) {
                Ok(descriptor) => Ok(descriptor.version == SCHEMA_VERSION
                    && REQUIRED_FIELDS
                        .iter()
                        .all(|f| descriptor.fields.iter().any(|have| have == f))),
                Err(_) => Ok(false),
            },
        }
    }

    fn write_schema(db: &sled::Db) -> Result<()> {
        let meta = db.open_tree("meta")?;
        let descriptor = SchemaDescriptor {
            version: SCHEMA_VERSION,
            fields: REQUIRED_FIELDS.iter().map(|s| s.to_string()).collect(),
        };
        let encoded = bincode::serialize(&descriptor)
            .map_err(|e| Error::PersistenceCorruption(e.to_string()))?;
        meta.insert("schema", encoded)?;
        Ok(())
    }

    /// Scan the store once at open: drop wall-expired records and sum sizes
    fn rebuild_size_accounting(&self) {
        let wall_now = self.clock.wall().timestamp_millis();
        let mut total = 0u64;
        let mut purged = 0u64;

        for item in self.entries.iter() {
            let (key, raw) = match item {
                Ok(kv) => kv,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable record during size scan");
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            match bincode::deserialize::<L2Record>(&raw) {
                Ok(record) => {
                    if record.expires_wall_ms.map_or(false, |e| wall_now >= e) {
                        let _ = self.entries.remove(&key);
                        purged += 1;
                    } else {
                        total += record.size;
                    }
                }
                Err(_) => {
                    // Undecodable records are dead weight; drop them
                    let _ = self.entries.remove(&key);
                    purged += 1;
                }
            }
        }

        if purged > 0 {
            info!(purged, "purged stale records at open");
        }
        self.current_size.store(total, Ordering::Relaxed);
    }

    /// Get an entry. Expired records are purged and reported as misses;
    /// every hit rewrites the record's access time.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let raw = match with_io_retries(|| self.entries.get(key.as_bytes())) {
            Ok(v) => v,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let Some(raw) = raw else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let mut record: L2Record = match bincode::deserialize(&raw) {
            Ok(r) => r,
            Err(e) => {
                // A record that cannot be decoded is treated as corrupt and
                // removed so it cannot poison later reads
                self.errors.fetch_add(1, Ordering::Relaxed);
                let _ = self.entries.remove(key.as_bytes());
                return Err(Error::PersistenceCorruption(e.to_string()));
            }
        };

        let wall_now = self.clock.wall().timestamp_millis();
        if record.expires_wall_ms.map_or(false, |e| wall_now >= e) {
            if matches!(self.entries.remove(key.as_bytes()), Ok(Some(_))) {
                self.current_size.fetch_sub(record.size, Ordering::Relaxed);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        record.last_access_ms = wall_now;
        if let Ok(encoded) = bincode::serialize(&record) {
            let _ = self.entries.insert(key.as_bytes(), encoded);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);

        let remaining = record
            .expires_wall_ms
            .map(|e| Duration::from_millis((e - wall_now).max(0) as u64));
        let entry = CacheEntry::new(
            bytes::Bytes::from(record.value),
            record.size,
            self.clock.now(),
            remaining,
            record.tag,
            record.data_type,
        );
        Ok(Some(entry))
    }

    /// Insert an entry, replacing any previous record under the same key
    pub fn set(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        let size = entry.size();
        if size > self.config.max_bytes {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(Error::Validation(format!(
                "value of {} bytes exceeds tier budget of {} bytes",
                size, self.config.max_bytes
            )));
        }

        let wall_now = self.clock.wall().timestamp_millis();
        let now = self.clock.now();
        let record = L2Record {
            value: entry.value().to_vec(),
            size,
            created_wall_ms: wall_now,
            expires_wall_ms: entry
                .remaining_ttl(now)
                .map(|d| wall_now + d.as_millis() as i64),
            tag: entry.tag().map(|t| t.to_string()),
            data_type: entry.data_type(),
            last_access_ms: wall_now,
        };
        let encoded = bincode::serialize(&record)
            .map_err(|e| Error::PersistenceCorruption(e.to_string()))?;

        let old = match with_io_retries(|| self.entries.insert(key.as_bytes(), encoded.clone())) {
            Ok(old) => old,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let old_size = old
            .and_then(|raw| bincode::deserialize::<L2Record>(&raw).ok())
            .map(|r| r.size)
            .unwrap_or(0);
        if size >= old_size {
            self.current_size
                .fetch_add(size - old_size, Ordering::Relaxed);
        } else {
            self.current_size
                .fetch_sub(old_size - size, Ordering::Relaxed);
        }
        self.sets.fetch_add(1, Ordering::Relaxed);

        if self.current_size.load(Ordering::Relaxed) > self.config.max_bytes {
            self.evict_to_budget(Some(key));
        }

        Ok(())
    }

    /// Remove an entry
    pub fn delete(&self, key: &str) -> Result<bool> {
        let removed = match with_io_retries(|| self.entries.remove(key.as_bytes())) {
            Ok(r) => r,
            Err(e) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        if let Some(raw) = removed {
            if let Ok(record) = bincode::deserialize::<L2Record>(&raw) {
                self.current_size.fetch_sub(record.size, Ordering::Relaxed);
            }
            self.deletes.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        match self.entries.get(key.as_bytes()) {
            Ok(Some(raw)) => match bincode::deserialize::<L2Record>(&raw) {
                Ok(record) => {
                    let wall_now = self.clock.wall().timestamp_millis();
                    !record.expires_wall_ms.map_or(false, |e| wall_now >= e)
                }
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// Wipe the tier
    pub fn clear(&self) -> Result<()> {
        self.entries.clear()?;
        self.current_size.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Keys matching a pattern (expired records excluded)
    pub fn keys_matching(&self, pattern: &KeyPattern) -> Vec<String> {
        let wall_now = self.clock.wall().timestamp_millis();
        let mut out = Vec::new();
        for item in self.entries.iter() {
            let Ok((key, raw)) = item else { continue };
            let Ok(key) = String::from_utf8(key.to_vec()) else {
                continue;
            };
            if !pattern.matches(&key) {
                continue;
            }
            if let Ok(record) = bincode::deserialize::<L2Record>(&raw) {
                if !record.expires_wall_ms.map_or(false, |e| wall_now >= e) {
                    out.push(key);
                }
            }
        }
        out
    }

    /// Remove every key matching the pattern; returns how many were removed
    pub fn invalidate_pattern(&self, pattern: &KeyPattern) -> usize {
        self.remove_where(|key, _| pattern.matches(key))
    }

    /// Remove every record carrying the tag; returns how many were removed
    pub fn invalidate_tag(&self, tag: &str) -> usize {
        self.remove_where(|_, record| record.tag.as_deref() == Some(tag))
    }

    fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&str, &L2Record) -> bool,
    {
        let mut doomed: Vec<(Vec<u8>, u64)> = Vec::new();
        for item in self.entries.iter() {
            let Ok((key, raw)) = item else { continue };
            let Ok(key_str) = std::str::from_utf8(&key) else {
                continue;
            };
            if let Ok(record) = bincode::deserialize::<L2Record>(&raw) {
                if predicate(key_str, &record) {
                    doomed.push((key.to_vec(), record.size));
                }
            }
        }

        let mut removed = 0usize;
        for (key, size) in doomed {
            if matches!(self.entries.remove(&key), Ok(Some(_))) {
                self.current_size.fetch_sub(size, Ordering::Relaxed);
                removed += 1;
            }
        }
        self.deletes.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Shrink back inside the budget: expired records first, then strict
    /// LRU by recorded access time
    fn evict_to_budget(&self, protect: Option<&str>) {
        let wall_now = self.clock.wall().timestamp_millis();

        let mut candidates: Vec<(Vec<u8>, i64, u64, bool)> = Vec::new();
        for item in self.entries.iter() {
            let Ok((key, raw)) = item else { continue };
            if let Some(protected) = protect {
                if key.as_ref() == protected.as_bytes() {
                    continue;
                }
            }
            if let Ok(record) = bincode::deserialize::<L2Record>(&raw) {
                let expired = record.expires_wall_ms.map_or(false, |e| wall_now >= e);
                candidates.push((key.to_vec(), record.last_access_ms, record.size, expired));
            } else {
                // Undecodable records evict unconditionally
                candidates.push((key.to_vec(), i64::MIN, 0, true));
            }
        }

        // Expired first, then oldest access
        candidates.sort_by(|a, b| b.3.cmp(&a.3).then(a.1.cmp(&b.1)));

        let mut evicted = 0u64;
        for (key, _, size, expired) in candidates {
            if !expired && self.current_size.load(Ordering::Relaxed) <= self.config.max_bytes {
                break;
            }
            if matches!(self.entries.remove(&key), Ok(Some(_))) {
                self.current_size.fetch_sub(size, Ordering::Relaxed);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!(evicted, "l2 eviction pass");
        }
    }

    /// Force pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    pub fn size_bytes(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    pub fn max_bytes(&self) -> u64 {
        self.config.max_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fraction of the byte budget in use (feeds the health monitor)
    pub fn disk_usage_fraction(&self) -> f64 {
        if self.config.max_bytes == 0 {
            return 0.0;
        }
        self.size_bytes() as f64 / self.config.max_bytes as f64
    }

    /// Snapshot tier statistics
    pub fn stats(&self) -> L2Stats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        L2Stats {
            size_bytes: self.size_bytes(),
            max_bytes: self.config.max_bytes,
            entries: self.len(),
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            utilization: self.disk_usage_fraction(),
        }
    }
}

/// Retry transient sled I/O failures: up to 3 attempts inside a 500 ms
/// budget. Corruption and logic errors surface immediately.
fn with_io_retries<T, F>(mut op: F) -> Result<T>
where
    F: FnMut() -> sled::Result<T>,
{
    let mut delay = Duration::from_millis(50);
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(sled::Error::Io(e)) if attempt < 2 => {
                attempt += 1;
                debug!(attempt, error = %e, "transient store I/O failure, retrying");
                std::thread::sleep(delay);
                delay *= 2;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
