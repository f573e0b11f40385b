//! Cache Engine Façade
//!
//! Assembles the subsystems from one validated configuration and hands out
//! the handles consumers work with: the coordinator for key/value caching,
//! the artifact store for blobs, the error cache for failure suppression,
//! and the health monitor for threshold alerts. No global state; embedding
//! applications own the engine and pass handles around.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::artifact::{ArtifactStore, DiskUsage};
use crate::cache::{CacheCoordinator, CoordinatorStats, L1Cache};
use crate::cache::L2Cache;
use crate::clock::Clock;
use crate::config::CacheEngineConfig;
use crate::error::Result;
use crate::error_cache::ErrorCache;
use crate::key::{DataType, ParamValue};
use crate::monitoring::{HealthMonitor, HealthReport, Metrics, MetricsSnapshot};
use crate::pagination::CursorPaginator;

/// Aggregate statistics across every subsystem
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub cache: CoordinatorStats,
    pub artifacts: DiskUsage,
    pub metrics: MetricsSnapshot,
}

/// The assembled cache engine
pub struct CacheEngine {
    config: CacheEngineConfig,
    clock: Arc<Clock>,
    metrics: Arc<Metrics>,
    coordinator: Arc<CacheCoordinator>,
    artifacts: Arc<ArtifactStore>,
    errors: ErrorCache,
    health: HealthMonitor,
}

impl CacheEngine {
    /// Validate the configuration and bring every subsystem up
    pub fn new(config: CacheEngineConfig) -> Result<Self> {
        config.validate()?;

        let clock = Arc::new(Clock::new());
        let metrics = Arc::new(Metrics::new(config.latency_sample_window));

        let l1 = Arc::new(L1Cache::new(config.l1.clone(), Arc::clone(&clock)));
        let l2 = if config.l2.enabled {
            Some(Arc::new(L2Cache::open(
                config.l2.clone(),
                Arc::clone(&clock),
            )?))
        } else {
            None
        };

        let coordinator = Arc::new(CacheCoordinator::new(
            l1,
            l2.clone(),
            Arc::clone(&metrics),
            Arc::clone(&clock),
            config.ttl_table(),
            config.namespace_version,
            config.shard_count,
        ));

        let artifacts = Arc::new(ArtifactStore::open(
            config.artifact.clone(),
            Arc::clone(&clock),
            Arc::clone(&metrics),
        )?);

        let errors = ErrorCache::new(
            Arc::clone(&coordinator),
            Arc::clone(&clock),
            Arc::clone(&metrics),
            config.error_cache.clone(),
            config.enable_negative_caching,
        );

        let health = HealthMonitor::new(
            Arc::clone(&metrics),
            config.health_thresholds.clone(),
        );
        if let Some(l2) = &l2 {
            let l2 = Arc::clone(l2);
            health.set_disk_usage_probe(Box::new(move || l2.disk_usage_fraction()));
        }

        info!(
            namespace_version = config.namespace_version,
            l2_enabled = config.l2.enabled,
            "cache engine initialized"
        );

        Ok(Self {
            config,
            clock,
            metrics,
            coordinator,
            artifacts,
            errors,
            health,
        })
    }

    /// Tiered key/value cache
    pub fn coordinator(&self) -> &Arc<CacheCoordinator> {
        &self.coordinator
    }

    /// Content-addressed blob store
    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    /// Negative/transient error cache
    pub fn errors(&self) -> &ErrorCache {
        &self.errors
    }

    /// Threshold monitor and alert dispatch
    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn clock(&self) -> &Arc<Clock> {
        &self.clock
    }

    pub fn config(&self) -> &CacheEngineConfig {
        &self.config
    }

    /// Build a versioned cache key from canonicalized query parameters
    pub fn query_key(
        &self,
        data_type: DataType,
        prefix: &str,
        params: &BTreeMap<String, ParamValue>,
    ) -> String {
        self.coordinator.query_key(data_type, prefix, params)
    }

    /// Cursor paginator for a query, optionally resuming its checkpoint
    pub fn paginator(
        &self,
        query: impl Into<String>,
        page_size: u64,
        resume: bool,
    ) -> CursorPaginator {
        CursorPaginator::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.clock),
            query,
            page_size,
            resume,
        )
    }

    /// Aggregate statistics
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cache: self.coordinator.stats(),
            artifacts: self.artifacts.disk_usage(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Evaluate health thresholds and dispatch alerts
    pub fn check_health(&self) -> HealthReport {
        self.health.check_health()
    }

    /// Durability point: push pending persistent-tier writes to disk
    pub fn flush(&self) -> Result<()> {
        if let Some(l2) = self.coordinator.l2() {
            l2.flush()?;
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
