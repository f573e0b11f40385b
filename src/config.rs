//! Engine Configuration
//!
//! One top-level configuration struct assembled by the application and
//! validated at startup. Sub-structs mirror the components they configure.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::artifact::ArtifactConfig;
use crate::cache::{L1Config, L2Config};
use crate::error::{Error, Result};
use crate::error_cache::ErrorCachePolicy;
use crate::key::DataType;
use crate::monitoring::{HealthThresholds, DEFAULT_SAMPLE_WINDOW};

/// Default TTLs per data type (seconds)
const DEFAULT_TTL_SEARCH: u64 = 300;
const DEFAULT_TTL_RECORD: u64 = 86_400;
const DEFAULT_TTL_FULLTEXT: u64 = 2_592_000;
const DEFAULT_TTL_ERROR: u64 = 30;
const DEFAULT_TTL_CHECKPOINT: u64 = 604_800;

/// Fallback TTL when neither the caller nor the type table decides
const DEFAULT_TTL_FALLBACK: u64 = 3_600;

/// TTL policy table: data type → lifetime, with a fallback
#[derive(Debug, Clone)]
pub struct TtlTable {
    by_type: HashMap<DataType, Duration>,
    default: Duration,
}

impl TtlTable {
    /// Build a table from overrides on top of the built-in defaults
    pub fn new(overrides: HashMap<DataType, Duration>, default_ttl: Duration) -> Self {
        let mut by_type = HashMap::from([
            (DataType::Search, Duration::from_secs(DEFAULT_TTL_SEARCH)),
            (DataType::Record, Duration::from_secs(DEFAULT_TTL_RECORD)),
            (
                DataType::Fulltext,
                Duration::from_secs(DEFAULT_TTL_FULLTEXT),
            ),
            (DataType::Error, Duration::from_secs(DEFAULT_TTL_ERROR)),
            (
                DataType::Checkpoint,
                Duration::from_secs(DEFAULT_TTL_CHECKPOINT),
            ),
        ]);
        by_type.extend(overrides);
        Self {
            by_type,
            default: default_ttl,
        }
    }

    /// Lifetime for a data type; the fallback covers unlisted types
    pub fn ttl_for(&self, data_type: Option<DataType>) -> Duration {
        data_type
            .and_then(|t| self.by_type.get(&t).copied())
            .unwrap_or(self.default)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default
    }
}

impl Default for TtlTable {
    fn default() -> Self {
        Self::new(HashMap::new(), Duration::from_secs(DEFAULT_TTL_FALLBACK))
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct CacheEngineConfig {
    /// In-memory tier
    pub l1: L1Config,
    /// Persistent tier
    pub l2: L2Config,
    /// Artifact store
    pub artifact: ArtifactConfig,
    /// Integer folded into every key built through the engine
    pub namespace_version: u32,
    /// TTL overrides per data type
    pub ttl_by_type: HashMap<DataType, Duration>,
    /// Fallback TTL
    pub default_ttl: Duration,
    /// Per-key lock shards in the coordinator (also sizes the L1 map shards)
    pub shard_count: usize,
    /// Latency ring size per layer
    pub latency_sample_window: usize,
    /// Whether 404/410 responses are cached
    pub enable_negative_caching: bool,
    /// Error-caching TTL policy overrides
    pub error_cache: ErrorCachePolicy,
    /// Health evaluation thresholds
    pub health_thresholds: HealthThresholds,
}

impl Default for CacheEngineConfig {
    fn default() -> Self {
        Self {
            l1: L1Config::default(),
            l2: L2Config::default(),
            artifact: ArtifactConfig::default(),
            namespace_version: 1,
            ttl_by_type: HashMap::new(),
            default_ttl: Duration::from_secs(DEFAULT_TTL_FALLBACK),
            shard_count: 64,
            latency_sample_window: DEFAULT_SAMPLE_WINDOW,
            enable_negative_caching: true,
            error_cache: ErrorCachePolicy::default(),
            health_thresholds: HealthThresholds::default(),
        }
    }
}

impl CacheEngineConfig {
    /// Convenience constructor rooting both on-disk stores under one path
    pub fn with_root_dir(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut config = Self::default();
        config.l2.cache_dir = root.join("l2");
        config.artifact.base_dir = root.join("artifacts");
        config
    }

    /// Validate the configuration; every violation is a startup error
    pub fn validate(&self) -> Result<()> {
        if self.l1.max_bytes == 0 {
            return Err(Error::Config("l1.max_bytes must be nonzero".into()));
        }
        if self.l2.enabled && self.l2.max_bytes == 0 {
            return Err(Error::Config("l2.max_bytes must be nonzero".into()));
        }
        if self.shard_count == 0 {
            return Err(Error::Config("shard_count must be nonzero".into()));
        }
        if self.latency_sample_window == 0 {
            return Err(Error::Config(
                "latency_sample_window must be nonzero".into(),
            ));
        }
        if self.default_ttl.is_zero() {
            return Err(Error::Config("default_ttl must be positive".into()));
        }
        if let Some((t, _)) = self.ttl_by_type.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::Config(format!("ttl override for {} must be positive", t)));
        }
        if self.artifact.size_limit_bytes == 0 {
            return Err(Error::Config(
                "artifact.size_limit_bytes must be nonzero".into(),
            ));
        }
        if !(self.artifact.gc_target_utilization > 0.0
            && self.artifact.gc_target_utilization <= 1.0)
        {
            return Err(Error::Config(
                "artifact.gc_target_utilization must be in (0, 1]".into(),
            ));
        }
        Ok(())
    }

    /// Assemble the TTL table from the configured overrides
    pub fn ttl_table(&self) -> TtlTable {
        TtlTable::new(self.ttl_by_type.clone(), self.default_ttl)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CacheEngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_ttl_defaults() {
        let table = TtlTable::default();
        assert_eq!(
            table.ttl_for(Some(DataType::Search)),
            Duration::from_secs(300)
        );
        assert_eq!(
            table.ttl_for(Some(DataType::Record)),
            Duration::from_secs(86_400)
        );
        assert_eq!(
            table.ttl_for(Some(DataType::Fulltext)),
            Duration::from_secs(2_592_000)
        );
        assert_eq!(table.ttl_for(Some(DataType::Error)), Duration::from_secs(30));
        assert_eq!(
            table.ttl_for(Some(DataType::Checkpoint)),
            Duration::from_secs(604_800)
        );
    }

    #[test]
    fn test_ttl_fallback() {
        let table = TtlTable::default();
        // Index has no dedicated default, so the fallback applies
        assert_eq!(
            table.ttl_for(Some(DataType::Index)),
            Duration::from_secs(3_600)
        );
        assert_eq!(table.ttl_for(None), Duration::from_secs(3_600));
    }

    #[test]
    fn test_ttl_overrides() {
        let overrides = HashMap::from([(DataType::Search, Duration::from_secs(60))]);
        let table = TtlTable::new(overrides, Duration::from_secs(10));
        assert_eq!(
            table.ttl_for(Some(DataType::Search)),
            Duration::from_secs(60)
        );
        // Non-overridden types keep their defaults
        assert_eq!(table.ttl_for(Some(DataType::Error)), Duration::from_secs(30));
    }

    #[test]
    fn test_validation_rejects_zero_budget() {
        let mut config = CacheEngineConfig::default();
        config.l1.max_bytes = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_zero_shards() {
        let mut config = CacheEngineConfig::default();
        config.shard_count = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_gc_target() {
        let mut config = CacheEngineConfig::default();
        config.artifact.gc_target_utilization = 1.5;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.artifact.gc_target_utilization = 0.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_zero_ttl_override() {
        let mut config = CacheEngineConfig::default();
        config
            .ttl_by_type
            .insert(DataType::Search, Duration::from_secs(0));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_with_root_dir() {
        let config = CacheEngineConfig::with_root_dir("/tmp/engine");
        assert_eq!(config.l2.cache_dir, PathBuf::from("/tmp/engine/l2"));
        assert_eq!(
            config.artifact.base_dir,
            PathBuf::from("/tmp/engine/artifacts")
        );
    }

    #[test]
    fn test_disabled_l2_skips_budget_check() {
        let mut config = CacheEngineConfig::default();
        config.l2.enabled = false;
        config.l2.max_bytes = 0;
        assert!(config.validate().is_ok());
    }
}
