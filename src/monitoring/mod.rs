//! Metrics and Health Monitoring
//!
//! Observers over the cache tiers: per-layer counters, latency percentile
//! windows, and threshold-driven health reports with alert callbacks.
//! Nothing in this module mutates cached data.

mod health;
mod metrics;
mod stats;

pub use health::{
    AlertCallback, CallbackToken, HealthIssue, HealthMonitor, HealthReport, HealthStatus,
    HealthThresholds,
};
pub use metrics::{Layer, LayerMetrics, LayerSnapshot, LatencyTracker, Metrics, MetricsSnapshot, ScopedTimer};
pub use stats::{LatencyStats, LatencySummary, DEFAULT_SAMPLE_WINDOW};
