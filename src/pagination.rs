//! Resumable Pagination
//!
//! Cursor-driven crawls checkpoint their progress through the cache so a
//! crashed or restarted process picks up where it left off. State snapshots
//! are immutable; every progress update persists the new snapshot under a
//! checkpoint key derived from the normalized query.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{CacheCoordinator, CacheTarget, SetOptions};
use crate::clock::Clock;
use crate::error::Result;
use crate::key::{fingerprint, versioned_key, DataType, ParamValue};

/// Progress reported after fetching one page
#[derive(Debug, Clone, Default)]
pub struct PageUpdate {
    /// Continuation token handed back by the upstream
    pub cursor: Option<String>,
    /// Number of results in the fetched page
    pub results: u64,
    /// Total result count when the upstream reports one
    pub total_count: Option<u64>,
    /// Identifier of the last document seen
    pub last_doc_id: Option<String>,
}

/// Immutable snapshot of a paginated crawl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationState {
    pub query: String,
    pub cursor: Option<String>,
    pub page: u64,
    pub page_size: u64,
    pub fetched_count: u64,
    pub total_count: Option<u64>,
    pub last_doc_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed: bool,
}

impl PaginationState {
    /// Fresh state at page 1 with no cursor
    pub fn new(query: impl Into<String>, page_size: u64, now: DateTime<Utc>) -> Self {
        Self {
            query: query.into(),
            cursor: None,
            page: 1,
            page_size,
            fetched_count: 0,
            total_count: None,
            last_doc_id: None,
            started_at: now,
            updated_at: now,
            completed: false,
        }
    }

    /// Produce the next snapshot after a fetched page
    pub fn update(&self, update: PageUpdate, now: DateTime<Utc>) -> Self {
        Self {
            query: self.query.clone(),
            cursor: update.cursor,
            page: self.page + 1,
            page_size: self.page_size,
            fetched_count: self.fetched_count + update.results,
            total_count: update.total_count.or(self.total_count),
            last_doc_id: update.last_doc_id.or_else(|| self.last_doc_id.clone()),
            started_at: self.started_at,
            updated_at: now,
            completed: self.completed,
        }
    }

    /// Snapshot with the completed flag set
    pub fn complete(&self, now: DateTime<Utc>) -> Self {
        Self {
            completed: true,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Progress in percent; 0 while the total is unknown
    pub fn progress_percent(&self) -> f64 {
        match self.total_count {
            Some(total) if total > 0 => {
                (self.fetched_count as f64 / total as f64 * 100.0).min(100.0)
            }
            _ => 0.0,
        }
    }

    /// Estimated seconds until the crawl finishes at the observed rate;
    /// `None` until anything was fetched or while the total is unknown
    pub fn estimated_remaining_secs(&self, now: DateTime<Utc>) -> Option<f64> {
        let total = self.total_count?;
        if self.fetched_count == 0 {
            return None;
        }
        let elapsed = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return None;
        }
        let rate = self.fetched_count as f64 / elapsed;
        let remaining = total.saturating_sub(self.fetched_count) as f64;
        Some(remaining / rate)
    }
}

/// Durable checkpoint persistence through the coordinator
pub struct PaginationCheckpoint {
    coordinator: Arc<CacheCoordinator>,
}

impl PaginationCheckpoint {
    pub fn new(coordinator: Arc<CacheCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Checkpoint key for a query: the query is fingerprinted so arbitrary
    /// text never lands inside the key grammar
    pub fn key_for(&self, query: &str) -> String {
        let params: BTreeMap<String, ParamValue> =
            BTreeMap::from([("query".to_string(), ParamValue::from(query))]);
        versioned_key(
            DataType::Checkpoint,
            self.coordinator.namespace_version(),
            "pagination",
            &fingerprint(&params),
        )
    }

    /// Persist a state snapshot (canonical JSON, checkpoint TTL)
    pub fn save(&self, state: &PaginationState) -> Result<()> {
        let key = self.key_for(&state.query);
        let json = serde_json::to_vec(state)
            .map_err(|e| crate::error::Error::Validation(e.to_string()))?;
        let size = json.len() as u64;
        self.coordinator.set(
            &key,
            Bytes::from(json),
            SetOptions {
                data_type: Some(DataType::Checkpoint),
                ..SetOptions::sized(size)
            },
        )
    }

    /// Load the last persisted snapshot for a query
    pub fn load(&self, query: &str) -> Option<PaginationState> {
        let key = self.key_for(query);
        let raw = self.coordinator.get(&key, CacheTarget::Auto)?;
        match serde_json::from_slice(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(error = %e, "undecodable checkpoint, ignoring");
                None
            }
        }
    }

    pub fn exists(&self, query: &str) -> bool {
        self.load(query).is_some()
    }

    /// Drop the checkpoint for a query
    pub fn delete(&self, query: &str) -> bool {
        let key = self.key_for(query);
        self.coordinator.delete(&key, CacheTarget::Auto)
    }
}

/// Cursor-driven paginator with durable resume
pub struct CursorPaginator {
    state: PaginationState,
    checkpoint: PaginationCheckpoint,
    clock: Arc<Clock>,
}

impl CursorPaginator {
    /// Create a paginator. With `resume` set, a previously persisted,
    /// uncompleted crawl for the same query continues where it stopped;
    /// otherwise the crawl starts fresh at page 1.
    pub fn new(
        coordinator: Arc<CacheCoordinator>,
        clock: Arc<Clock>,
        query: impl Into<String>,
        page_size: u64,
        resume: bool,
    ) -> Self {
        let query = query.into();
        let checkpoint = PaginationCheckpoint::new(coordinator);

        let state = if resume {
            match checkpoint.load(&query) {
                Some(prior) if !prior.completed => {
                    debug!(
                        page = prior.page,
                        fetched = prior.fetched_count,
                        "resuming crawl from checkpoint"
                    );
                    prior
                }
                _ => PaginationState::new(query, page_size, clock.wall()),
            }
        } else {
            PaginationState::new(query, page_size, clock.wall())
        };

        Self {
            state,
            checkpoint,
            clock,
        }
    }

    /// Current snapshot
    pub fn state(&self) -> &PaginationState {
        &self.state
    }

    /// Continuation cursor to send upstream for the next page
    pub fn cursor(&self) -> Option<&str> {
        self.state.cursor.as_deref()
    }

    /// Record a fetched page and persist the new snapshot
    pub fn update_progress(&mut self, update: PageUpdate) -> Result<()> {
        self.state = self.state.update(update, self.clock.wall());
        self.checkpoint.save(&self.state)
    }

    /// Whether the crawl is done: the completed flag is set, or the total
    /// is known and reached
    pub fn is_complete(&self) -> bool {
        if self.state.completed {
            return true;
        }
        match self.state.total_count {
            Some(total) => self.state.fetched_count >= total,
            None => false,
        }
    }

    /// Mark the crawl finished and drop its checkpoint. Calling this on an
    /// empty page or upstream exhaustion is the caller's responsibility.
    pub fn mark_complete(&mut self) {
        self.state = self.state.complete(self.clock.wall());
        self.checkpoint.delete(&self.state.query);
    }

    /// Discard progress and the checkpoint, restarting at page 1
    pub fn reset(&mut self) {
        self.checkpoint.delete(&self.state.query);
        self.state = PaginationState::new(
            self.state.query.clone(),
            self.state.page_size,
            self.clock.wall(),
        );
    }

    pub fn progress_percent(&self) -> f64 {
        self.state.progress_percent()
    }

    pub fn estimated_remaining_secs(&self) -> Option<f64> {
        self.state.estimated_remaining_secs(self.clock.wall())
    }
}

// =============================================================================
// Tests
// =============================================================================
