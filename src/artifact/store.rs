//! Artifact Store
//!
//! Content-addressed storage for large immutable blobs. Blobs live at
//! `artifacts/{hh}/{hash}` where `hh` is the first two hex characters of
//! the SHA-256 of the contents; identical contents stored under any number
//! of ids share one blob. An id → hash index (one JSON file per id) makes
//! lookups cheap and drives garbage collection.
//!
//! # Guarantees
//!
//! - Blob and index writes are atomic (temp file + rename); blobs are
//!   never mutated in place
//! - Reads verify the content hash at least once per artifact per process;
//!   a mismatch quarantines the blob with a `.corrupt` suffix
//! - Disk usage stays inside `size_limit_bytes`; LRU garbage collection
//!   drives utilization back to the configured target

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use fs2::FileExt;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::index::{ArtifactIndex, ArtifactMetadata};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::monitoring::{LatencyTracker, Metrics};

const LOCKFILE: &str = "lockfile";
const BLOBS_DIR: &str = "artifacts";
const INDEX_DIR: &str = "index";

/// Default disk quota (10 GiB)
pub const DEFAULT_ARTIFACT_SIZE_LIMIT: u64 = 10 * 1024 * 1024 * 1024;

/// Default post-GC utilization target
pub const DEFAULT_GC_TARGET_UTILIZATION: f64 = 0.8;

/// Artifact store configuration
#[derive(Debug, Clone)]
pub struct ArtifactConfig {
    /// Root directory (blobs, index, and lockfile live below it)
    pub base_dir: PathBuf,
    /// Hard disk quota in bytes
    pub size_limit_bytes: u64,
    /// Fraction of the quota GC shrinks usage down to
    pub gc_target_utilization: f64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./cache/artifacts"),
            size_limit_bytes: DEFAULT_ARTIFACT_SIZE_LIMIT,
            gc_target_utilization: DEFAULT_GC_TARGET_UTILIZATION,
        }
    }
}

/// Optional upstream metadata supplied at store time
#[derive(Debug, Clone, Default)]
pub struct ArtifactPut {
    pub mime_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Result of a store operation
#[derive(Debug, Clone)]
pub struct StoreOutcome {
    pub metadata: ArtifactMetadata,
    /// True when the blob already existed and only the index was written
    pub deduplicated: bool,
}

/// Disk usage summary
#[derive(Debug, Clone)]
pub struct DiskUsage {
    /// Bytes occupied by blobs
    pub total_bytes: u64,
    /// Number of distinct blobs
    pub artifact_count: usize,
    /// Number of index records
    pub index_count: usize,
    pub size_limit_bytes: u64,
    /// total / limit
    pub utilization: f64,
}

/// Result of a compaction sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactReport {
    pub orphans_removed: usize,
    pub bytes_reclaimed: u64,
}

/// Content-addressed blob store
pub struct ArtifactStore {
    config: ArtifactConfig,
    clock: Arc<Clock>,
    metrics: Arc<Metrics>,
    index: ArtifactIndex,
    blobs_dir: PathBuf,
    /// Blob bytes currently on disk
    total_bytes: AtomicU64,
    /// Hashes whose contents were verified this process lifetime
    verified: DashMap<String, ()>,
    /// Serializes store/GC/compact so the quota invariant holds
    sweep_lock: Mutex<()>,
    _lock: File,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("config", &self.config)
            .field("blobs_dir", &self.blobs_dir)
            .field("total_bytes", &self.total_bytes.load(Ordering::Relaxed))
            .finish()
    }
}

impl ArtifactStore {
    /// Open the store, creating directories as needed
    pub fn open(config: ArtifactConfig, clock: Arc<Clock>, metrics: Arc<Metrics>) -> Result<Self> {
        fs::create_dir_all(&config.base_dir).map_err(|e| Error::ArtifactIo(e.to_string()))?;

        let lock_path = config.base_dir.join(LOCKFILE);
        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::ArtifactIo(e.to_string()))?;
        lock.try_lock_exclusive()
            .map_err(|_| Error::DirectoryLocked(lock_path.display().to_string()))?;

        let blobs_dir = config.base_dir.join(BLOBS_DIR);
        fs::create_dir_all(&blobs_dir).map_err(|e| Error::ArtifactIo(e.to_string()))?;
        let index = ArtifactIndex::open(config.base_dir.join(INDEX_DIR))?;

        let store = Self {
            config,
            clock,
            metrics,
            index,
            blobs_dir,
            total_bytes: AtomicU64::new(0),
            verified: DashMap::new(),
            sweep_lock: Mutex::new(()),
            _lock: lock,
        };

        let total = store.scan_blob_bytes();
        store.total_bytes.store(total, Ordering::Relaxed);
        info!(total_bytes = total, "artifact store opened");

        Ok(store)
    }

    /// Hash contents and return the hex digest
    pub fn content_hash(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    fn blob_path(&self, hash: &str) -> PathBuf {
        self.blobs_dir.join(&hash[..2]).join(hash)
    }

    /// Store contents under an artifact id. Identical contents already on
    /// disk are reused (deduplication); the index record is always written.
    /// Runs garbage collection first when the write would breach the quota.
    pub fn store(
        &self,
        artifact_id: &str,
        content: &[u8],
        put: ArtifactPut,
    ) -> Result<StoreOutcome> {
        if artifact_id.is_empty() {
            return Err(Error::Validation("artifact id must not be empty".into()));
        }
        let size = content.len() as u64;
        if size > self.config.size_limit_bytes {
            return Err(Error::ArtifactQuota {
                needed: size,
                limit: self.config.size_limit_bytes,
            });
        }

        let hash = Self::content_hash(content);
        let path = self.blob_path(&hash);

        let _guard = self.sweep_lock.lock();

        let deduplicated = path.exists();
        if !deduplicated {
            let projected = self.total_bytes.load(Ordering::Relaxed) + size;
            if projected > self.config.size_limit_bytes {
                let freed = self.collect_locked(projected - self.config.size_limit_bytes)?;
                debug!(freed, "pre-store garbage collection");
                if self.total_bytes.load(Ordering::Relaxed) + size > self.config.size_limit_bytes {
                    self.metrics.artifact().record_error();
                    return Err(Error::ArtifactQuota {
                        needed: size,
                        limit: self.config.size_limit_bytes,
                    });
                }
            }

            self.write_blob(&path, content)?;
            self.total_bytes.fetch_add(size, Ordering::Relaxed);
            // Contents were hashed on the way in; no need to re-verify
            self.verified.insert(hash.clone(), ());
        }

        let now = self.clock.wall();
        let metadata = ArtifactMetadata {
            artifact_id: artifact_id.to_string(),
            hash,
            size,
            mime_type: put.mime_type,
            etag: put.etag,
            last_modified: put.last_modified,
            created_at: now,
            last_access: now,
        };
        self.index.write(&metadata)?;
        self.metrics.artifact().record_set();

        Ok(StoreOutcome {
            metadata,
            deduplicated,
        })
    }

    fn write_blob(&self, path: &Path, content: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::ArtifactIo("blob path has no parent".into()))?;
        fs::create_dir_all(parent).map_err(|e| Error::ArtifactIo(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| Error::ArtifactIo(e.to_string()))?;
        tmp.write_all(content)
            .map_err(|e| Error::ArtifactIo(e.to_string()))?;
        tmp.persist(path)
            .map_err(|e| Error::ArtifactIo(e.to_string()))?;
        Ok(())
    }

    /// Retrieve contents and metadata by artifact id. Returns `None` when
    /// either the index record or the blob is missing. The first read of a
    /// blob per process verifies its content hash; a mismatch quarantines
    /// the blob and fails only that artifact.
    pub fn retrieve(&self, artifact_id: &str) -> Result<Option<(Bytes, ArtifactMetadata)>> {
        let tracker = LatencyTracker::start();

        let Some(mut metadata) = self.index.read(artifact_id)? else {
            self.metrics.artifact().record_miss();
            return Ok(None);
        };

        let path = self.blob_path(&metadata.hash);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Index record survived its blob
                warn!(artifact_id, hash = %metadata.hash, "blob missing for index record");
                self.metrics.record_blob_orphan();
                self.metrics.artifact().record_miss();
                return Ok(None);
            }
            Err(e) => {
                self.metrics.artifact().record_error();
                return Err(Error::ArtifactIo(e.to_string()));
            }
        };

        if !self.verified.contains_key(&metadata.hash) {
            let actual = Self::content_hash(&content);
            if actual != metadata.hash {
                self.quarantine(&path, &metadata.hash);
                self.metrics.artifact().record_error();
                return Err(Error::ArtifactIntegrity {
                    artifact_id: artifact_id.to_string(),
                    expected: metadata.hash,
                    actual,
                });
            }
            self.verified.insert(metadata.hash.clone(), ());
        }

        metadata.last_access = self.clock.wall();
        if let Err(e) = self.index.write(&metadata) {
            warn!(artifact_id, error = %e, "refreshing access time failed");
        }

        self.metrics.artifact().record_hit(tracker.elapsed_ms());
        Ok(Some((Bytes::from(content), metadata)))
    }

    fn quarantine(&self, path: &Path, hash: &str) {
        let corrupt = path.with_extension("corrupt");
        warn!(hash, quarantine = %corrupt.display(), "integrity mismatch, quarantining blob");
        if fs::rename(path, &corrupt).is_ok() {
            if let Ok(meta) = fs::metadata(&corrupt) {
                self.total_bytes.fetch_sub(meta.len(), Ordering::Relaxed);
            }
        }
        self.verified.remove(hash);
    }

    /// Whether the artifact id resolves to an existing blob
    pub fn exists(&self, artifact_id: &str) -> bool {
        match self.index.read(artifact_id) {
            Ok(Some(metadata)) => self.blob_path(&metadata.hash).exists(),
            _ => false,
        }
    }

    /// Remove an artifact id. The blob is deleted as well once no other id
    /// references its hash.
    pub fn delete(&self, artifact_id: &str) -> Result<bool> {
        let _guard = self.sweep_lock.lock();

        let Some(metadata) = self.index.read(artifact_id)? else {
            return Ok(false);
        };
        self.index.remove(artifact_id)?;
        self.metrics.artifact().record_delete();

        let still_referenced = self
            .index
            .list()?
            .iter()
            .any(|m| m.hash == metadata.hash);
        if !still_referenced {
            let path = self.blob_path(&metadata.hash);
            if let Ok(meta) = fs::metadata(&path) {
                if fs::remove_file(&path).is_ok() {
                    self.total_bytes.fetch_sub(meta.len(), Ordering::Relaxed);
                }
            }
            self.verified.remove(&metadata.hash);
        }

        Ok(true)
    }

    /// All artifact ids, sorted; optionally filtered by prefix
    pub fn list_ids(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .index
            .list()?
            .into_iter()
            .map(|m| m.artifact_id)
            .filter(|id| prefix.map_or(true, |p| id.starts_with(p)))
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Current disk usage
    pub fn disk_usage(&self) -> DiskUsage {
        let total = self.total_bytes.load(Ordering::Relaxed);
        DiskUsage {
            total_bytes: total,
            artifact_count: self.count_blobs(),
            index_count: self.index.len(),
            size_limit_bytes: self.config.size_limit_bytes,
            utilization: if self.config.size_limit_bytes == 0 {
                0.0
            } else {
                total as f64 / self.config.size_limit_bytes as f64
            },
        }
    }

    /// Reclaim space: orphan blobs first, then referenced blobs by
    /// ascending last access (their index records go too). Runs until at
    /// least `bytes_to_free` were freed and utilization is back at the
    /// configured target. Returns bytes freed.
    pub fn garbage_collect(&self, bytes_to_free: u64) -> Result<u64> {
        let _guard = self.sweep_lock.lock();
        self.collect_locked(bytes_to_free)
    }

    fn collect_locked(&self, bytes_to_free: u64) -> Result<u64> {
        let records = self.index.list()?;

        // hash → (referrers, most recent access among them)
        let mut referenced: std::collections::HashMap<String, (Vec<String>, chrono::DateTime<chrono::Utc>)> =
            std::collections::HashMap::new();
        for record in &records {
            let slot = referenced
                .entry(record.hash.clone())
                .or_insert_with(|| (Vec::new(), record.last_access));
            slot.0.push(record.artifact_id.clone());
            if record.last_access > slot.1 {
                slot.1 = record.last_access;
            }
        }

        let target_bytes =
            (self.config.size_limit_bytes as f64 * self.config.gc_target_utilization) as u64;
        let mut freed = 0u64;
        let mut evicted_blobs = 0usize;

        let done = |freed: u64, total: u64| freed >= bytes_to_free && total <= target_bytes;

        // Orphans go first, unconditionally ahead of referenced blobs
        for (hash, path, size) in self.blobs_on_disk() {
            if done(freed, self.total_bytes.load(Ordering::Relaxed)) {
                break;
            }
            if referenced.contains_key(&hash) {
                continue;
            }
            if fs::remove_file(&path).is_ok() {
                self.total_bytes.fetch_sub(size, Ordering::Relaxed);
                self.verified.remove(&hash);
                freed += size;
                evicted_blobs += 1;
                self.metrics.record_index_orphan();
            }
        }

        // Referenced blobs by ascending last access
        let mut candidates: Vec<(&String, &(Vec<String>, chrono::DateTime<chrono::Utc>))> =
            referenced.iter().collect();
        candidates.sort_by_key(|(_, (_, last_access))| *last_access);

        for (hash, (ids, _)) in candidates {
            if done(freed, self.total_bytes.load(Ordering::Relaxed)) {
                break;
            }
            let path = self.blob_path(hash);
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

            for id in ids {
                let _ = self.index.remove(id);
            }
            if fs::remove_file(&path).is_ok() {
                self.total_bytes.fetch_sub(size, Ordering::Relaxed);
                self.verified.remove(hash.as_str());
                freed += size;
                evicted_blobs += 1;
            }
        }

        if evicted_blobs > 0 {
            self.metrics
                .artifact()
                .record_evictions(evicted_blobs as u64);
            info!(freed, evicted_blobs, "garbage collection pass");
        }

        Ok(freed)
    }

    /// Full orphan sweep: remove blobs without index referrers and index
    /// records without blobs. Afterwards every blob has at least one
    /// referencing index entry.
    pub fn compact(&self) -> Result<CompactReport> {
        let _guard = self.sweep_lock.lock();

        let records = self.index.list()?;
        let referenced: std::collections::HashSet<&str> =
            records.iter().map(|m| m.hash.as_str()).collect();

        let mut orphans_removed = 0usize;
        let mut bytes_reclaimed = 0u64;

        for (hash, path, size) in self.blobs_on_disk() {
            if referenced.contains(hash.as_str()) {
                continue;
            }
            if fs::remove_file(&path).is_ok() {
                self.total_bytes.fetch_sub(size, Ordering::Relaxed);
                self.verified.remove(&hash);
                orphans_removed += 1;
                bytes_reclaimed += size;
                self.metrics.record_index_orphan();
            }
        }

        // Dangling index records (blob vanished) are dead weight too
        for record in &records {
            if !self.blob_path(&record.hash).exists() {
                if self.index.remove(&record.artifact_id).unwrap_or(false) {
                    self.metrics.record_blob_orphan();
                }
            }
        }
        self.index.remove_undecodable();

        debug!(orphans_removed, bytes_reclaimed, "compaction sweep");
        Ok(CompactReport {
            orphans_removed,
            bytes_reclaimed,
        })
    }

    /// Utilization fraction for the health monitor
    pub fn utilization(&self) -> f64 {
        self.disk_usage().utilization
    }

    fn scan_blob_bytes(&self) -> u64 {
        self.blobs_on_disk().iter().map(|(_, _, size)| size).sum()
    }

    fn count_blobs(&self) -> usize {
        self.blobs_on_disk().len()
    }

    /// Every valid blob on disk as (hash, path, size). Quarantined and
    /// foreign files are ignored.
    fn blobs_on_disk(&self) -> Vec<(String, PathBuf, u64)> {
        let mut out = Vec::new();
        let Ok(shards) = fs::read_dir(&self.blobs_dir) else {
            return out;
        };
        for shard in shards.filter_map(|e| e.ok()) {
            let Ok(files) = fs::read_dir(shard.path()) else {
                continue;
            };
            for file in files.filter_map(|e| e.ok()) {
                let path = file.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name.len() != 64 || !name.chars().all(|c| c.is_ascii_hexdigit()) {
                    continue;
                }
                let size = file.metadata().map(|m| m.len()).unwrap_or(0);
                out.push((name.to_string(), path, size));
            }
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================
