//! Tiered Key/Value Cache
//!
//! Two-tier hierarchy behind one coordinator:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Cache Coordinator                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  L1 Cache (RAM)              │  L2 Cache (Disk)             │
//! │  ┌────────────────────┐      │  ┌────────────────────────┐  │
//! │  │ Sharded hashmap    │      │  │ Embedded ordered store │  │
//! │  │ TTL + strict LRU   │      │  │ TTL + LRU, durable     │  │
//! │  └────────────────────┘      │  └────────────────────────┘  │
//! │            │                 │              │               │
//! │            └── write-through ┴── promotion ─┘               │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Reads walk L1 then L2, promoting L2 hits. Writes go through both tiers
//! unless the caller targets one. All keys share the colon-segmented
//! versioned grammar built by [`crate::key`].

mod coordinator;
mod entry;
mod l1;
mod l2;
mod shard;

pub use coordinator::{CacheCoordinator, CacheTarget, CoordinatorStats, SetOptions};
pub use entry::CacheEntry;
pub use l1::{L1Cache, L1Config, L1Stats, DEFAULT_L1_MAX_BYTES};
pub use l2::{L2Cache, L2Config, L2Stats, DEFAULT_L2_MAX_BYTES};
pub use shard::{Shard, ShardedMap};
