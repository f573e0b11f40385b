//! Latency Statistics
//!
//! Rolling sample window over the most recent N latency observations with
//! nearest-rank percentiles. Empty windows report 0 for every statistic so
//! metrics paths never fail.

use parking_lot::Mutex;

/// Default number of samples retained in the rolling window
pub const DEFAULT_SAMPLE_WINDOW: usize = 1000;

/// Rolling-window latency sampler (milliseconds)
#[derive(Debug)]
pub struct LatencyStats {
    inner: Mutex<Ring>,
}

#[derive(Debug)]
struct Ring {
    samples: Vec<f64>,
    capacity: usize,
    /// Next write position once the ring is full
    cursor: usize,
}

impl LatencyStats {
    /// Create with the default window size
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SAMPLE_WINDOW)
    }

    /// Create with a custom window size (minimum 1)
    pub fn with_window(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Ring {
                samples: Vec::with_capacity(capacity.min(4096)),
                capacity,
                cursor: 0,
            }),
        }
    }

    /// Record one latency sample in milliseconds
    pub fn add_sample(&self, ms: f64) {
        let mut ring = self.inner.lock();
        if ring.samples.len() < ring.capacity {
            ring.samples.push(ms);
        } else {
            let pos = ring.cursor;
            ring.samples[pos] = ms;
            ring.cursor = (pos + 1) % ring.capacity;
        }
    }

    /// Number of samples currently in the window
    pub fn count(&self) -> usize {
        self.inner.lock().samples.len()
    }

    /// Nearest-rank percentile: `rank = ceil(p/100 * count)`
    pub fn percentile(&self, p: f64) -> f64 {
        let ring = self.inner.lock();
        if ring.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = ring.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        let idx = rank.clamp(1, sorted.len()) - 1;
        sorted[idx]
    }

    /// Arithmetic mean of the window
    pub fn mean(&self) -> f64 {
        let ring = self.inner.lock();
        if ring.samples.is_empty() {
            return 0.0;
        }
        ring.samples.iter().sum::<f64>() / ring.samples.len() as f64
    }

    /// Population standard deviation of the window
    pub fn stddev(&self) -> f64 {
        let ring = self.inner.lock();
        if ring.samples.is_empty() {
            return 0.0;
        }
        let n = ring.samples.len() as f64;
        let mean = ring.samples.iter().sum::<f64>() / n;
        let variance = ring
            .samples
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f64>()
            / n;
        variance.sqrt()
    }

    /// Smallest sample in the window
    pub fn min(&self) -> f64 {
        let ring = self.inner.lock();
        if ring.samples.is_empty() {
            return 0.0;
        }
        ring.samples.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Largest sample in the window
    pub fn max(&self) -> f64 {
        let ring = self.inner.lock();
        if ring.samples.is_empty() {
            return 0.0;
        }
        ring.samples
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Point-in-time summary of the window
    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            count: self.count(),
            mean_ms: self.mean(),
            stddev_ms: self.stddev(),
            min_ms: self.min(),
            max_ms: self.max(),
            p50_ms: self.percentile(50.0),
            p95_ms: self.percentile(95.0),
            p99_ms: self.percentile(99.0),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of latency statistics
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct LatencySummary {
    pub count: usize,
    pub mean_ms: f64,
    pub stddev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

// =============================================================================
// Tests
// =============================================================================
