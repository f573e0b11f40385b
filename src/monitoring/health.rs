//! Health Monitoring
//!
//! Periodic threshold evaluation over the metrics registry, producing
//! reports that are fanned out to registered alert callbacks. Scheduling is
//! the caller's responsibility; `check_health` is cheap enough to run on a
//! timer thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::metrics::{Layer, Metrics};

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All thresholds satisfied
    Healthy,
    /// Degraded but operational
    Warning,
    /// Requires intervention
    Critical,
}

impl HealthStatus {
    fn rank(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Warning => 1,
            HealthStatus::Critical => 2,
        }
    }

    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Warning)
    }

    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Warning => write!(f, "warning"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Thresholds evaluated on every health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Minimum acceptable combined hit rate across tiers
    pub min_hit_rate: f64,
    /// Maximum acceptable per-layer error rate; twice this value is critical
    pub max_error_rate: f64,
    /// Maximum acceptable L1 hit latency P99 in milliseconds
    pub max_l1_latency_p99_ms: f64,
    /// Maximum acceptable L2 hit latency P99 in milliseconds
    pub max_l2_latency_p99_ms: f64,
    /// Disk usage fraction above which L2 is critical
    pub max_l2_disk_usage_fraction: f64,
    /// Minimum acceptable L2 hit rate
    pub min_l2_hit_rate: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            min_hit_rate: 0.5,
            max_error_rate: 0.05,
            max_l1_latency_p99_ms: 10.0,
            max_l2_latency_p99_ms: 100.0,
            max_l2_disk_usage_fraction: 0.90,
            min_l2_hit_rate: 0.3,
        }
    }
}

/// A single threshold violation
#[derive(Debug, Clone, Serialize)]
pub struct HealthIssue {
    pub severity: HealthStatus,
    pub layer: Layer,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
}

/// Result of one health check
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    pub issues: Vec<HealthIssue>,
    pub uptime_secs: u64,
}

/// Consumer of health reports
pub type AlertCallback = Box<dyn Fn(&HealthReport) + Send + Sync>;

/// Handle returned by `add_alert_callback`, accepted by `remove_alert_callback`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackToken(u64);

/// Health monitor over the metrics registry.
///
/// The L2 disk usage probe is injected by the engine so the monitor stays
/// an observer and never touches tier internals.
pub struct HealthMonitor {
    metrics: Arc<Metrics>,
    thresholds: HealthThresholds,
    disk_probe: Mutex<Option<Box<dyn Fn() -> f64 + Send + Sync>>>,
    callbacks: Mutex<Vec<(u64, AlertCallback)>>,
    next_token: AtomicU64,
}

impl HealthMonitor {
    /// Create a monitor with the given thresholds
    pub fn new(metrics: Arc<Metrics>, thresholds: HealthThresholds) -> Self {
        Self {
            metrics,
            thresholds,
            disk_probe: Mutex::new(None),
            callbacks: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Install the L2 disk-usage probe (fraction of budget in use)
    pub fn set_disk_usage_probe(&self, probe: Box<dyn Fn() -> f64 + Send + Sync>) {
        *self.disk_probe.lock() = Some(probe);
    }

    /// Register an alert callback; callbacks run synchronously on each
    /// health check in registration order
    pub fn add_alert_callback(&self, callback: AlertCallback) -> CallbackToken {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push((token, callback));
        CallbackToken(token)
    }

    /// Remove a previously registered callback
    pub fn remove_alert_callback(&self, token: CallbackToken) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != token.0);
        callbacks.len() != before
    }

    /// Evaluate all thresholds and dispatch the report to every callback
    pub fn check_health(&self) -> HealthReport {
        let mut issues = Vec::new();
        let snapshot = self.metrics.snapshot();
        let t = &self.thresholds;

        // Combined hit rate across tiers; only meaningful once lookups exist
        let total_hits = snapshot.l1.hits + snapshot.l2.hits;
        let final_misses = if snapshot.l2.hits + snapshot.l2.misses > 0 {
            snapshot.l2.misses
        } else {
            snapshot.l1.misses
        };
        let total_lookups = total_hits + final_misses;
        if total_lookups > 0 {
            let hit_rate = total_hits as f64 / total_lookups as f64;
            if hit_rate < t.min_hit_rate {
                issues.push(HealthIssue {
                    severity: HealthStatus::Warning,
                    layer: Layer::L1,
                    message: format!("combined hit rate {:.3} below minimum", hit_rate),
                    value: hit_rate,
                    threshold: t.min_hit_rate,
                });
            }
        }

        // Per-layer error rates; double the threshold escalates to critical
        for layer in [Layer::L1, Layer::L2] {
            let error_rate = self.metrics.layer(layer).error_rate();
            if error_rate > t.max_error_rate {
                let severity = if error_rate > t.max_error_rate * 2.0 {
                    HealthStatus::Critical
                } else {
                    HealthStatus::Warning
                };
                issues.push(HealthIssue {
                    severity,
                    layer,
                    message: format!("error rate {:.3} above maximum", error_rate),
                    value: error_rate,
                    threshold: t.max_error_rate,
                });
            }
        }

        // Hit latency ceilings
        let l1_p99 = self.metrics.l1().latency().percentile(99.0);
        if l1_p99 > t.max_l1_latency_p99_ms {
            issues.push(HealthIssue {
                severity: HealthStatus::Warning,
                layer: Layer::L1,
                message: format!("hit latency p99 {:.2}ms above maximum", l1_p99),
                value: l1_p99,
                threshold: t.max_l1_latency_p99_ms,
            });
        }
        let l2_p99 = self.metrics.l2().latency().percentile(99.0);
        if l2_p99 > t.max_l2_latency_p99_ms {
            issues.push(HealthIssue {
                severity: HealthStatus::Warning,
                layer: Layer::L2,
                message: format!("hit latency p99 {:.2}ms above maximum", l2_p99),
                value: l2_p99,
                threshold: t.max_l2_latency_p99_ms,
            });
        }

        // Disk exhaustion stops the tier, so exceeding the fraction is critical
        if let Some(probe) = self.disk_probe.lock().as_ref() {
            let usage = probe();
            if usage > t.max_l2_disk_usage_fraction {
                issues.push(HealthIssue {
                    severity: HealthStatus::Critical,
                    layer: Layer::L2,
                    message: format!("disk usage fraction {:.3} above maximum", usage),
                    value: usage,
                    threshold: t.max_l2_disk_usage_fraction,
                });
            }
        }

        // L2 effectiveness
        let l2 = self.metrics.l2();
        if l2.hits() + l2.misses() > 0 && l2.hit_rate() < t.min_l2_hit_rate {
            issues.push(HealthIssue {
                severity: HealthStatus::Warning,
                layer: Layer::L2,
                message: format!("hit rate {:.3} below minimum", l2.hit_rate()),
                value: l2.hit_rate(),
                threshold: t.min_l2_hit_rate,
            });
        }

        let status = issues
            .iter()
            .map(|i| i.severity)
            .max_by_key(|s| s.rank())
            .unwrap_or(HealthStatus::Healthy);

        let report = HealthReport {
            timestamp: Utc::now(),
            status,
            issues,
            uptime_secs: self.metrics.uptime_secs(),
        };

        self.dispatch(&report);
        report
    }

    /// Current thresholds
    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    fn dispatch(&self, report: &HealthReport) {
        let callbacks = self.callbacks.lock();
        for (token, callback) in callbacks.iter() {
            if catch_unwind(AssertUnwindSafe(|| callback(report))).is_err() {
                warn!(callback = token, "alert callback panicked");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
