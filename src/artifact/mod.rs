//! Content-Addressed Artifact Store
//!
//! Storage for large immutable blobs (PDFs, XML bundles) addressed by the
//! SHA-256 of their contents. An id → hash index provides stable lookup
//! names and deduplication; LRU garbage collection keeps disk usage inside
//! a configured quota.
//!
//! ```text
//! base_dir/
//!   artifacts/{hh}/{hash}       first two hex chars shard the blobs
//!   index/{safe_id}.json        one record per artifact id
//!   lockfile                    single-process advisory lock
//! ```

mod index;
mod store;

pub use index::{safe_file_name, ArtifactIndex, ArtifactMetadata};
pub use store::{
    ArtifactConfig, ArtifactPut, ArtifactStore, CompactReport, DiskUsage, StoreOutcome,
    DEFAULT_ARTIFACT_SIZE_LIMIT, DEFAULT_GC_TARGET_UTILIZATION,
};
