//! Cache Metrics Collection
//!
//! Per-layer counters and hit-latency sampling for monitoring cache health.
//! Counters are plain relaxed atomics; latency samples feed the rolling
//! window in [`LatencyStats`]. Metrics paths never fail.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::stats::{LatencyStats, LatencySummary};

/// Cache layer identifier used in metrics and health reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    L1,
    L2,
    Artifact,
    ErrorCache,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::L1 => write!(f, "l1"),
            Layer::L2 => write!(f, "l2"),
            Layer::Artifact => write!(f, "artifact"),
            Layer::ErrorCache => write!(f, "error_cache"),
        }
    }
}

/// Counters and hit latencies for one cache layer
#[derive(Debug)]
pub struct LayerMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    evictions: AtomicU64,
    /// Latency window for hits only
    latency: LatencyStats,
}

impl LayerMetrics {
    fn new(sample_window: usize) -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            latency: LatencyStats::with_window(sample_window),
        }
    }

    /// Record a hit together with its latency in milliseconds
    pub fn record_hit(&self, latency_ms: f64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.latency.add_sample(latency_ms);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// hits / (hits + misses); 0 when no lookups were recorded
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// errors / total operations; 0 when nothing was recorded
    pub fn error_rate(&self) -> f64 {
        let errors = self.errors() as f64;
        let total = (self.hits()
            + self.misses()
            + self.sets.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)) as f64;
        if total == 0.0 {
            0.0
        } else {
            errors / total
        }
    }

    /// Hit-latency window
    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }

    fn snapshot(&self) -> LayerSnapshot {
        LayerSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors(),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            error_rate: self.error_rate(),
            latency: self.latency.summary(),
        }
    }
}

/// Point-in-time view of one layer's metrics
#[derive(Debug, Clone, Serialize)]
pub struct LayerSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub evictions: u64,
    pub hit_rate: f64,
    pub error_rate: f64,
    pub latency: LatencySummary,
}

/// Engine-wide metrics registry
#[derive(Debug)]
pub struct Metrics {
    l1: LayerMetrics,
    l2: LayerMetrics,
    artifact: LayerMetrics,
    error_cache: LayerMetrics,
    bytes_downloaded: AtomicU64,
    index_orphans: AtomicU64,
    blob_orphans: AtomicU64,
    started_instant: Instant,
    started_at: DateTime<Utc>,
}

impl Metrics {
    /// Create a metrics registry; `sample_window` sizes every latency ring
    pub fn new(sample_window: usize) -> Self {
        Self {
            l1: LayerMetrics::new(sample_window),
            l2: LayerMetrics::new(sample_window),
            artifact: LayerMetrics::new(sample_window),
            error_cache: LayerMetrics::new(sample_window),
            bytes_downloaded: AtomicU64::new(0),
            index_orphans: AtomicU64::new(0),
            blob_orphans: AtomicU64::new(0),
            started_instant: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// Metrics for a layer
    pub fn layer(&self, layer: Layer) -> &LayerMetrics {
        match layer {
            Layer::L1 => &self.l1,
            Layer::L2 => &self.l2,
            Layer::Artifact => &self.artifact,
            Layer::ErrorCache => &self.error_cache,
        }
    }

    pub fn l1(&self) -> &LayerMetrics {
        &self.l1
    }

    pub fn l2(&self) -> &LayerMetrics {
        &self.l2
    }

    pub fn artifact(&self) -> &LayerMetrics {
        &self.artifact
    }

    /// Account bytes fetched from upstream and fed into the cache
    pub fn add_bytes_downloaded(&self, n: u64) {
        self.bytes_downloaded.fetch_add(n, Ordering::Relaxed);
    }

    /// Index record present but the referenced blob is missing
    pub fn record_blob_orphan(&self) {
        self.blob_orphans.fetch_add(1, Ordering::Relaxed);
    }

    /// Blob present without a referencing index record
    pub fn record_index_orphan(&self) {
        self.index_orphans.fetch_add(1, Ordering::Relaxed);
    }

    /// Seconds since the registry was created
    pub fn uptime_secs(&self) -> u64 {
        self.started_instant.elapsed().as_secs()
    }

    /// Snapshot all counters and derived rates
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            l1: self.l1.snapshot(),
            l2: self.l2.snapshot(),
            artifact: self.artifact.snapshot(),
            error_cache: self.error_cache.snapshot(),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            index_orphans: self.index_orphans.load(Ordering::Relaxed),
            blob_orphans: self.blob_orphans.load(Ordering::Relaxed),
            uptime_secs: self.uptime_secs(),
            started_at: self.started_at,
        }
    }
}

/// Snapshot of all engine metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub l1: LayerSnapshot,
    pub l2: LayerSnapshot,
    pub artifact: LayerSnapshot,
    pub error_cache: LayerSnapshot,
    pub bytes_downloaded: u64,
    pub index_orphans: u64,
    pub blob_orphans: u64,
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Elapsed milliseconds since the tracker started
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

/// Scoped timer that reports its measurement when dropped.
///
/// The elapsed time reaches the layer's hit-latency window on every exit
/// path (normal, early return, panic unwind) unless `cancel` was called.
pub struct ScopedTimer<'m> {
    metrics: &'m LayerMetrics,
    start: Instant,
    armed: bool,
}

impl<'m> ScopedTimer<'m> {
    /// Start timing against a layer's hit path
    pub fn hit(metrics: &'m LayerMetrics) -> Self {
        Self {
            metrics,
            start: Instant::now(),
            armed: true,
        }
    }

    /// Suppress recording; used when the outcome turned out not to be a hit
    pub fn cancel(mut self) {
        self.armed = false;
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        if self.armed {
            let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
            self.metrics.record_hit(elapsed_ms);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new(100);
        assert_eq!(metrics.l1().hits(), 0);
        assert_eq!(metrics.l2().hits(), 0);
    }

    #[test]
    fn test_hit_tracking_with_latency() {
        let metrics = Metrics::new(100);

        metrics.l1().record_hit(0.5);
        metrics.l1().record_hit(1.5);
        metrics.l1().record_miss();

        assert_eq!(metrics.l1().hits(), 2);
        assert_eq!(metrics.l1().misses(), 1);
        assert!((metrics.l1().hit_rate() - 0.666).abs() < 0.01);
        assert_eq!(metrics.l1().latency().count(), 2);
        assert!((metrics.l1().latency().mean() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_rate() {
        let metrics = Metrics::new(100);

        metrics.l2().record_hit(1.0);
        metrics.l2().record_miss();
        metrics.l2().record_set();
        metrics.l2().record_error();

        // 1 error over 3 operations
        assert!((metrics.l2().error_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rates_zero_when_idle() {
        let metrics = Metrics::new(100);
        assert_eq!(metrics.l1().hit_rate(), 0.0);
        assert_eq!(metrics.l1().error_rate(), 0.0);
    }

    #[test]
    fn test_layer_dispatch() {
        let metrics = Metrics::new(100);
        metrics.layer(Layer::Artifact).record_hit(2.0);
        assert_eq!(metrics.artifact().hits(), 1);
    }

    #[test]
    fn test_snapshot() {
        let metrics = Metrics::new(100);

        metrics.l1().record_hit(1.0);
        metrics.l1().record_evictions(1);
        metrics.add_bytes_downloaded(4096);
        metrics.record_blob_orphan();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.l1.hits, 1);
        assert_eq!(snapshot.l1.evictions, 1);
        assert_eq!(snapshot.bytes_downloaded, 4096);
        assert_eq!(snapshot.blob_orphans, 1);
    }

    #[test]
    fn test_latency_tracker() {
        let tracker = LatencyTracker::start();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(tracker.elapsed_ms() >= 5.0);
    }

    #[test]
    fn test_scoped_timer_records_on_drop() {
        let metrics = Metrics::new(100);
        {
            let _timer = ScopedTimer::hit(metrics.l1());
        }
        assert_eq!(metrics.l1().hits(), 1);
        assert_eq!(metrics.l1().latency().count(), 1);
    }

    #[test]
    fn test_scoped_timer_cancel() {
        let metrics = Metrics::new(100);
        let timer = ScopedTimer::hit(metrics.l1());
        timer.cancel();
        assert_eq!(metrics.l1().hits(), 0);
    }

    #[test]
    fn test_scoped_timer_records_on_early_return() {
        fn lookup(metrics: &Metrics, found: bool) -> Option<u32> {
            let timer = ScopedTimer::hit(metrics.l1());
            if !found {
                timer.cancel();
                return None;
            }
            Some(7)
        }

        let metrics = Metrics::new(100);
        assert_eq!(lookup(&metrics, false), None);
        assert_eq!(metrics.l1().hits(), 0);
        assert_eq!(lookup(&metrics, true), Some(7));
        assert_eq!(metrics.l1().hits(), 1);
    }

    #[test]
    fn test_layer_display() {
        assert_eq!(format!("{}", Layer::L1), "l1");
        assert_eq!(format!("{}", Layer::ErrorCache), "error_cache");
    }

    #[test]
    fn test_concurrent_counting() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new(1000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.l1().record_hit(0.1);
                        metrics.l1().record_miss();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.l1().hits(), 8000);
        assert_eq!(metrics.l1().misses(), 8000);
        assert_eq!(metrics.l1().hit_rate(), 0.5);
    }
}
