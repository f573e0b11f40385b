//! Cache Entry Types
//!
//! An entry carries an opaque payload plus the bookkeeping the tiers need:
//! caller-supplied size, monotonic creation/expiry instants, an optional tag
//! for bulk eviction, the value's data type, and atomic access tracking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;

use crate::key::DataType;

/// A single cached value with its metadata.
///
/// Timestamps are monotonic nanoseconds from the engine's shared clock.
/// Payloads are opaque bytes; serialization is the caller's concern.
#[derive(Debug)]
pub struct CacheEntry {
    value: Bytes,
    /// Logical size in bytes, supplied by the caller at `set` time
    size: u64,
    created_at: u64,
    /// `None` means the entry never expires
    expires_at: Option<u64>,
    tag: Option<String>,
    data_type: Option<DataType>,
    /// Last access in monotonic nanoseconds
    last_access: AtomicU64,
    /// Insertion sequence, assigned by the owning tier; breaks LRU ties
    seq: u64,
}

impl CacheEntry {
    /// Create an entry. `now` is the current monotonic reading; `ttl`
    /// of `None` means no expiry.
    pub fn new(
        value: Bytes,
        size: u64,
        now: u64,
        ttl: Option<Duration>,
        tag: Option<String>,
        data_type: Option<DataType>,
    ) -> Self {
        let expires_at = ttl.map(|t| now + t.as_nanos() as u64);
        Self {
            value,
            size,
            created_at: now,
            expires_at,
            tag,
            data_type,
            last_access: AtomicU64::new(now),
            seq: 0,
        }
    }

    /// Payload (zero-copy clone)
    #[inline]
    pub fn value(&self) -> Bytes {
        self.value.clone()
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    #[inline]
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    #[inline]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    #[inline]
    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    /// Check expiry against a monotonic reading
    #[inline]
    pub fn is_expired(&self, now: u64) -> bool {
        match self.expires_at {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }

    /// Remaining lifetime at `now`; `None` when the entry never expires,
    /// zero when it already has
    pub fn remaining_ttl(&self, now: u64) -> Option<Duration> {
        self.expires_at
            .map(|deadline| Duration::from_nanos(deadline.saturating_sub(now)))
    }

    /// Record an access at the given monotonic reading
    #[inline]
    pub fn record_access(&self, now: u64) {
        self.last_access.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Assign the insertion sequence; called once by the owning tier
    #[inline]
    pub fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            size: self.size,
            created_at: self.created_at,
            expires_at: self.expires_at,
            tag: self.tag.clone(),
            data_type: self.data_type,
            last_access: AtomicU64::new(self.last_access.load(Ordering::Relaxed)),
            seq: self.seq,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_ttl(now: u64, ttl_secs: u64) -> CacheEntry {
        CacheEntry::new(
            Bytes::from_static(b"payload"),
            7,
            now,
            Some(Duration::from_secs(ttl_secs)),
            None,
            Some(DataType::Search),
        )
    }

    #[test]
    fn test_entry_creation() {
        let entry = entry_with_ttl(1_000, 60);
        assert_eq!(entry.size(), 7);
        assert_eq!(entry.created_at(), 1_000);
        assert_eq!(entry.value().as_ref(), b"payload");
        assert_eq!(entry.data_type(), Some(DataType::Search));
        assert_eq!(entry.last_access(), 1_000);
    }

    #[test]
    fn test_expiry_is_strictly_after_creation() {
        let entry = entry_with_ttl(1_000, 60);
        assert!(entry.expires_at().unwrap() > entry.created_at());
    }

    #[test]
    fn test_is_expired() {
        let entry = entry_with_ttl(0, 1);
        let one_sec = Duration::from_secs(1).as_nanos() as u64;

        assert!(!entry.is_expired(one_sec - 1));
        // A hit must not be served at exactly the expiry instant
        assert!(entry.is_expired(one_sec));
        assert!(entry.is_expired(one_sec + 1));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let entry = CacheEntry::new(Bytes::from_static(b"x"), 1, 0, None, None, None);
        assert!(!entry.is_expired(u64::MAX));
        assert_eq!(entry.remaining_ttl(u64::MAX), None);
    }

    #[test]
    fn test_remaining_ttl() {
        let entry = entry_with_ttl(0, 10);
        let five = Duration::from_secs(5).as_nanos() as u64;
        assert_eq!(entry.remaining_ttl(five), Some(Duration::from_secs(5)));
        // Past expiry the remainder saturates at zero
        let twenty = Duration::from_secs(20).as_nanos() as u64;
        assert_eq!(entry.remaining_ttl(twenty), Some(Duration::from_secs(0)));
    }

    #[test]
    fn test_access_tracking() {
        let entry = entry_with_ttl(100, 60);
        assert_eq!(entry.last_access(), 100);
        entry.record_access(500);
        assert_eq!(entry.last_access(), 500);
    }

    #[test]
    fn test_tag() {
        let entry = CacheEntry::new(
            Bytes::from_static(b"x"),
            1,
            0,
            None,
            Some("bulk-import".to_string()),
            None,
        );
        assert_eq!(entry.tag(), Some("bulk-import"));
    }

    #[test]
    fn test_clone_preserves_access_time() {
        let entry = entry_with_ttl(0, 60);
        entry.record_access(42);
        let cloned = entry.clone();
        assert_eq!(cloned.last_access(), 42);
        assert_eq!(cloned.size(), entry.size());
    }

    #[test]
    fn test_seq_assignment() {
        let mut entry = entry_with_ttl(0, 60);
        assert_eq!(entry.seq(), 0);
        entry.set_seq(9);
        assert_eq!(entry.seq(), 9);
    }
}
