//! Key Normalization
//!
//! Canonicalizes query parameters into deterministic fingerprints and
//! composes versioned cache keys of the form
//! `{data_type}:v{namespace_version}:{prefix}:{fingerprint}`.
//!
//! # Design
//!
//! - Parameters are sorted lexicographically before hashing, so the same
//!   logical query always produces the same key regardless of insertion
//!   order, process, or platform.
//! - Fingerprints are the first 16 hex characters of a SHA-256 digest.
//! - Pattern matching over keys is a tiny matcher on the colon-segmented
//!   grammar, not a regex engine.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Families of cached values; each carries its own default TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Search result pages
    Search,
    /// Individual record metadata
    Record,
    /// Full-text bundles
    Fulltext,
    /// Cached upstream errors
    Error,
    /// Pagination checkpoints
    Checkpoint,
    /// Index/lookup structures
    Index,
}

impl DataType {
    /// Canonical lowercase name used inside keys
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Search => "search",
            DataType::Record => "record",
            DataType::Fulltext => "fulltext",
            DataType::Error => "error",
            DataType::Checkpoint => "checkpoint",
            DataType::Index => "index",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query parameter value with a canonical rendering
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ParamValue {
    /// Render the value canonically:
    /// strings trimmed (internal whitespace kept), integers without leading
    /// zeros, floats without a trailing `.0` when integral, booleans as
    /// `true`/`false`.
    pub fn canonical(&self) -> String {
        match self {
            ParamValue::Str(s) => s.trim().to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() && f.abs() < 9.0e15 {
                    format!("{}", *f as i64)
                } else {
                    format!("{}", f)
                }
            }
            ParamValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Serialize a parameter map in canonical order
fn canonical_serialization(params: &BTreeMap<String, ParamValue>) -> String {
    let mut out = String::new();
    for (i, (k, v)) in params.iter().enumerate() {
        if i > 0 {
            out.push('&');
        }
        out.push_str(k);
        out.push('=');
        out.push_str(&v.canonical());
    }
    out
}

/// Hash a canonicalized parameter map into a 16-hex-char fingerprint
pub fn fingerprint(params: &BTreeMap<String, ParamValue>) -> String {
    let serialized = canonical_serialization(params);
    let digest = Sha256::digest(serialized.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Compose a versioned cache key from a canonicalized parameter map.
///
/// Key layout: `{data_type}:v{version}:{prefix}:{fingerprint}`.
pub fn normalize_query_key(
    data_type: DataType,
    prefix: &str,
    namespace_version: u32,
    params: &BTreeMap<String, ParamValue>,
) -> String {
    format!(
        "{}:v{}:{}:{}",
        data_type.as_str(),
        namespace_version,
        prefix,
        fingerprint(params)
    )
}

/// Compose a versioned key from an already-fingerprinted suffix
pub fn versioned_key(data_type: DataType, namespace_version: u32, prefix: &str, suffix: &str) -> String {
    format!("{}:v{}:{}:{}", data_type.as_str(), namespace_version, prefix, suffix)
}

// =============================================================================
// Pattern Matching
// =============================================================================

/// Matcher over the colon-segmented key grammar.
///
/// Each `*` matches exactly one segment; a trailing `*` matches one or more
/// remaining segments (prefix invalidation). Literal segments match exactly.
#[derive(Debug, Clone)]
pub struct KeyPattern {
    segments: Vec<PatternSegment>,
}

#[derive(Debug, Clone, PartialEq)]
enum PatternSegment {
    Literal(String),
    Wildcard,
}

impl KeyPattern {
    /// Parse a pattern string such as `search:v1:*` or `error:*:v2:*`
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split(':')
            .map(|s| {
                if s == "*" {
                    PatternSegment::Wildcard
                } else {
                    PatternSegment::Literal(s.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Check whether a key matches this pattern
    pub fn matches(&self, key: &str) -> bool {
        let key_segments: Vec<&str> = key.split(':').collect();

        if key_segments.len() < self.segments.len() {
            return false;
        }
        if key_segments.len() > self.segments.len() {
            // Extra key segments are only allowed when the pattern ends in
            // a wildcard, which then swallows the remainder.
            if self.segments.last() != Some(&PatternSegment::Wildcard) {
                return false;
            }
        }

        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PatternSegment::Wildcard => continue,
                PatternSegment::Literal(lit) => {
                    if key_segments.get(i).copied() != Some(lit.as_str()) {
                        return false;
                    }
                }
            }
        }
        true
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .segments
            .iter()
            .map(|s| match s {
                PatternSegment::Literal(l) => l.clone(),
                PatternSegment::Wildcard => "*".to_string(),
            })
            .collect();
        f.write_str(&parts.join(":"))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, ParamValue)]) -> BTreeMap<String, ParamValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!(DataType::Search.as_str(), "search");
        assert_eq!(DataType::Fulltext.as_str(), "fulltext");
        assert_eq!(format!("{}", DataType::Checkpoint), "checkpoint");
    }

    #[test]
    fn test_canonical_string_trimming() {
        assert_eq!(ParamValue::from("  covid 19  ").canonical(), "covid 19");
        // Internal whitespace preserved
        assert_eq!(ParamValue::from("a  b").canonical(), "a  b");
    }

    #[test]
    fn test_canonical_numbers() {
        assert_eq!(ParamValue::Int(42).canonical(), "42");
        assert_eq!(ParamValue::Int(-7).canonical(), "-7");
        assert_eq!(ParamValue::Float(3.0).canonical(), "3");
        assert_eq!(ParamValue::Float(3.25).canonical(), "3.25");
    }

    #[test]
    fn test_canonical_bools() {
        assert_eq!(ParamValue::Bool(true).canonical(), "true");
        assert_eq!(ParamValue::Bool(false).canonical(), "false");
    }

    #[test]
    fn test_fingerprint_is_order_independent() {
        let a = params(&[
            ("query", "malaria".into()),
            ("page", ParamValue::Int(2)),
            ("sort", "date".into()),
        ]);
        // BTreeMap sorts for us; build in a different textual order to prove
        // the serialization is the same.
        let b = params(&[
            ("sort", "date".into()),
            ("query", "malaria".into()),
            ("page", ParamValue::Int(2)),
        ]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_length_and_charset() {
        let p = params(&[("q", "x".into())]);
        let fp = fingerprint(&p);
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_distinguishes_values() {
        let a = params(&[("q", "alpha".into())]);
        let b = params(&[("q", "beta".into())]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_equivalent_renderings_share_fingerprint() {
        let a = params(&[("limit", ParamValue::Int(10))]);
        let b = params(&[("limit", ParamValue::Float(10.0))]);
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let c = params(&[("q", "  trimmed ".into())]);
        let d = params(&[("q", "trimmed".into())]);
        assert_eq!(fingerprint(&c), fingerprint(&d));
    }

    #[test]
    fn test_normalize_query_key_layout() {
        let p = params(&[("query", "covid".into())]);
        let key = normalize_query_key(DataType::Search, "q", 1, &p);
        assert!(key.starts_with("search:v1:q:"));
        assert_eq!(key.split(':').count(), 4);
    }

    #[test]
    fn test_versioned_key() {
        let key = versioned_key(DataType::Checkpoint, 3, "pagination", "abcd1234");
        assert_eq!(key, "checkpoint:v3:pagination:abcd1234");
    }

    #[test]
    fn test_pattern_literal_match() {
        let p = KeyPattern::parse("search:v1:q:abcd");
        assert!(p.matches("search:v1:q:abcd"));
        assert!(!p.matches("search:v1:q:efgh"));
        assert!(!p.matches("record:v1:q:abcd"));
    }

    #[test]
    fn test_pattern_wildcard_single_segment() {
        let p = KeyPattern::parse("search:*:q:abcd");
        assert!(p.matches("search:v1:q:abcd"));
        assert!(p.matches("search:v2:q:abcd"));
        assert!(!p.matches("search:v1:r:abcd"));
    }

    #[test]
    fn test_pattern_trailing_wildcard_prefix_match() {
        let p = KeyPattern::parse("error:*");
        assert!(p.matches("error:404:v1:somekey"));
        assert!(p.matches("error:429:v2:another"));
        assert!(!p.matches("search:v1:q:abcd"));
        // A bare data type without further segments is not matched: the
        // wildcard must consume at least one segment.
        assert!(!p.matches("error"));
    }

    #[test]
    fn test_pattern_arity() {
        let p = KeyPattern::parse("search:v1:*:abcd");
        assert!(p.matches("search:v1:q:abcd"));
        // Not a trailing wildcard, so extra segments do not match
        assert!(!p.matches("search:v1:q:abcd:extra"));
        assert!(!p.matches("search:v1:q"));
    }

    #[test]
    fn test_pattern_display_roundtrip() {
        let p = KeyPattern::parse("search:v1:*");
        assert_eq!(format!("{}", p), "search:v1:*");
    }
}
