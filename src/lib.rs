//! litcache - Multi-Layer Cache Engine for Literature API Clients
//!
//! A reusable caching subsystem that accelerates access to
//! scientific-literature metadata and artifacts while minimizing redundant
//! calls to slow, rate-limited upstream APIs. Payloads are opaque bytes;
//! fetching, parsing, and mapping stay with the embedding application.
//!
//! # Architecture
//!
//! ```text
//! consumer ──▶ key normalizer ──▶ coordinator ──▶ L1 (RAM)
//!                                          └───▶ L2 (disk, on L1 miss; promote on hit)
//!                                          └───▶ metrics (latency + outcome)
//! artifact consumer ──▶ artifact store (SHA-256 addressed, deduped, GC'd)
//! paginator ──▶ coordinator (durable checkpoints by query key)
//! error recorder ──▶ error cache ──▶ coordinator (status-specific jittered TTL)
//! health monitor ──▶ metrics + L2 disk usage ──▶ report ──▶ alert callbacks
//! ```
//!
//! # Modules
//!
//! - [`artifact`] - Content-addressed blob storage with LRU garbage collection
//! - [`cache`] - Tiered key/value cache (L1 memory, L2 persistent) behind one coordinator
//! - [`clock`] - Shared monotonic time source
//! - [`config`] - Engine configuration and TTL policy table
//! - [`engine`] - Façade wiring every subsystem together
//! - [`error`] - Error types
//! - [`error_cache`] - Negative and transient-error caching with TTL jitter
//! - [`key`] - Query canonicalization, versioned keys, pattern matching
//! - [`monitoring`] - Metrics, latency percentiles, health reports
//! - [`pagination`] - Resumable cursor pagination with durable checkpoints

pub mod artifact;
pub mod cache;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod error_cache;
pub mod key;
pub mod monitoring;
pub mod pagination;

// Re-export commonly used types
pub use artifact::{ArtifactMetadata, ArtifactPut, ArtifactStore, CompactReport, DiskUsage};
pub use cache::{CacheCoordinator, CacheTarget, SetOptions};
pub use clock::Clock;
pub use config::CacheEngineConfig;
pub use engine::{CacheEngine, EngineStats};
pub use error::{Error, Result};
pub use error_cache::{CachedError, ErrorCache, ErrorCachePolicy};
pub use key::{normalize_query_key, DataType, KeyPattern, ParamValue};
pub use monitoring::{HealthReport, HealthStatus, HealthThresholds, MetricsSnapshot};
pub use pagination::{CursorPaginator, PageUpdate, PaginationCheckpoint, PaginationState};
