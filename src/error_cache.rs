//! Error Caching
//!
//! Suppresses retry storms against the upstream API by remembering recent
//! failures. Missing resources (404/410) are negative-cached for a long
//! time; transient failures (429/5xx) for a short one. TTLs carry uniform
//! jitter so synchronized clients do not stampede the upstream when an
//! entry lapses, and 429 responses honor `Retry-After` when it outlasts
//! the jittered policy TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheCoordinator, CacheTarget, SetOptions};
use crate::clock::Clock;
use crate::error::Result;
use crate::key::DataType;
use crate::monitoring::{Layer, Metrics};

/// TTL policy for one status code
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorTtlPolicy {
    /// Base lifetime in seconds
    pub base_secs: u64,
    /// Uniform jitter half-range in seconds
    pub jitter_secs: u64,
    /// Whether an upstream `Retry-After` can extend the lifetime
    pub honors_retry_after: bool,
}

impl ErrorTtlPolicy {
    pub const fn new(base_secs: u64, jitter_secs: u64, honors_retry_after: bool) -> Self {
        Self {
            base_secs,
            jitter_secs,
            honors_retry_after,
        }
    }
}

/// Per-status TTL policy table
#[derive(Debug, Clone)]
pub struct ErrorCachePolicy {
    by_status: HashMap<u16, ErrorTtlPolicy>,
    /// Lifetime for statuses outside the table, without jitter
    pub default_ttl_secs: u64,
}

impl Default for ErrorCachePolicy {
    fn default() -> Self {
        Self {
            by_status: HashMap::from([
                (404, ErrorTtlPolicy::new(600, 300, false)),
                (410, ErrorTtlPolicy::new(5400, 1800, false)),
                (429, ErrorTtlPolicy::new(45, 15, true)),
                (502, ErrorTtlPolicy::new(15, 5, false)),
                (503, ErrorTtlPolicy::new(30, 10, false)),
                (504, ErrorTtlPolicy::new(22, 7, false)),
            ]),
            default_ttl_secs: 30,
        }
    }
}

impl ErrorCachePolicy {
    /// Replace the policy for a status code
    pub fn with_override(mut self, status: u16, policy: ErrorTtlPolicy) -> Self {
        self.by_status.insert(status, policy);
        self
    }

    pub fn policy_for(&self, status: u16) -> Option<&ErrorTtlPolicy> {
        self.by_status.get(&status)
    }
}

/// A remembered upstream failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedError {
    pub key: String,
    pub status_code: u16,
    pub message: String,
    /// Upstream `Retry-After` in seconds, when one was sent
    pub retry_after: Option<u64>,
    pub cached_at: DateTime<Utc>,
}

/// Negative and transient-error cache over the coordinator
pub struct ErrorCache {
    coordinator: Arc<CacheCoordinator>,
    policy: ErrorCachePolicy,
    /// When false, 404/410 are not recorded; transient errors still are
    negative_caching: bool,
    clock: Arc<Clock>,
    metrics: Arc<Metrics>,
}

impl ErrorCache {
    pub fn new(
        coordinator: Arc<CacheCoordinator>,
        clock: Arc<Clock>,
        metrics: Arc<Metrics>,
        policy: ErrorCachePolicy,
        negative_caching: bool,
    ) -> Self {
        Self {
            coordinator,
            policy,
            negative_caching,
            clock,
            metrics,
        }
    }

    fn is_negative(status: u16) -> bool {
        matches!(status, 404 | 410)
    }

    fn error_key(&self, key: &str, status: u16) -> String {
        format!(
            "error:{}:v{}:{}",
            status,
            self.coordinator.namespace_version(),
            key
        )
    }

    /// Pick the effective TTL for a status: uniform jitter over the policy
    /// range, with `Retry-After` taking over on 429 when it is larger
    fn effective_ttl(&self, status: u16, retry_after: Option<u64>) -> Duration {
        let Some(policy) = self.policy.policy_for(status) else {
            return Duration::from_secs(self.policy.default_ttl_secs);
        };

        let jitter = policy.jitter_secs as i64;
        let offset = if jitter > 0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0
        };
        let jittered = (policy.base_secs as i64 + offset).max(1) as u64;

        let secs = match retry_after {
            Some(retry) if policy.honors_retry_after => jittered.max(retry),
            _ => jittered,
        };
        Duration::from_secs(secs)
    }

    /// Record an upstream failure. Returns the TTL the record was cached
    /// with, or `None` when negative caching is disabled for the status.
    pub fn cache_error(
        &self,
        key: &str,
        status: u16,
        message: impl Into<String>,
        retry_after: Option<u64>,
    ) -> Result<Option<Duration>> {
        if Self::is_negative(status) && !self.negative_caching {
            debug!(status, "negative caching disabled, not recording");
            return Ok(None);
        }

        let record = CachedError {
            key: key.to_string(),
            status_code: status,
            message: message.into(),
            retry_after,
            cached_at: self.clock.wall(),
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| crate::error::Error::Validation(e.to_string()))?;
        let size = json.len() as u64;

        let ttl = self.effective_ttl(status, retry_after);
        self.coordinator.set(
            &self.error_key(key, status),
            Bytes::from(json),
            SetOptions {
                ttl: Some(ttl),
                data_type: Some(DataType::Error),
                ..SetOptions::sized(size)
            },
        )?;
        self.metrics.layer(Layer::ErrorCache).record_set();

        Ok(Some(ttl))
    }

    /// Fast pre-check used by consumers to skip an upstream call
    pub fn is_error_cached(&self, key: &str, status: u16) -> bool {
        let cached = self
            .coordinator
            .get(&self.error_key(key, status), CacheTarget::Auto)
            .is_some();
        let layer = self.metrics.layer(Layer::ErrorCache);
        if cached {
            layer.record_hit(0.0);
        } else {
            layer.record_miss();
        }
        cached
    }

    /// Full record, when one is cached
    pub fn get_cached_error(&self, key: &str, status: u16) -> Option<CachedError> {
        let raw = self
            .coordinator
            .get(&self.error_key(key, status), CacheTarget::Auto)?;
        serde_json::from_slice(&raw).ok()
    }

    /// Drop the cached error for a key, for one status or all of them
    pub fn clear_error(&self, key: &str, status: Option<u16>) -> usize {
        match status {
            Some(status) => {
                if self
                    .coordinator
                    .delete(&self.error_key(key, status), CacheTarget::Auto)
                {
                    1
                } else {
                    0
                }
            }
            None => {
                let pattern = format!(
                    "error:*:v{}:{}",
                    self.coordinator.namespace_version(),
                    key
                );
                self.coordinator.invalidate_pattern(&pattern)
            }
        }
    }

    /// Drop every cached error
    pub fn clear_all_errors(&self) -> usize {
        self.coordinator.invalidate_pattern("error:*")
    }

    pub fn policy(&self) -> &ErrorCachePolicy {
        &self.policy
    }
}

// =============================================================================
// Tests
// =============================================================================
