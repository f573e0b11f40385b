//! Error types for the cache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied a malformed key, negative TTL, or oversized value
    #[error("Validation error: {0}")]
    Validation(String),

    // =========================================================================
    // Persistent Tier Errors
    // =========================================================================
    /// L2 store I/O failure
    #[error("Persistence I/O error: {0}")]
    PersistenceIo(String),

    /// L2 store returned data that could not be decoded
    #[error("Persistence corruption: {0}")]
    PersistenceCorruption(String),

    /// L2 store could not satisfy a write within its size budget
    #[error("Persistence quota exceeded: {0}")]
    PersistenceQuota(String),

    // =========================================================================
    // Artifact Store Errors
    // =========================================================================
    /// Artifact store I/O failure
    #[error("Artifact I/O error: {0}")]
    ArtifactIo(String),

    /// Stored blob no longer hashes to its content address
    #[error("Artifact integrity failure for {artifact_id}: expected {expected}, got {actual}")]
    ArtifactIntegrity {
        artifact_id: String,
        expected: String,
        actual: String,
    },

    /// Garbage collection could not free enough space for a write
    #[error("Artifact quota exceeded: need {needed} bytes, limit {limit}")]
    ArtifactQuota { needed: u64, limit: u64 },

    /// Another process holds the directory lock
    #[error("Directory already locked: {0}")]
    DirectoryLocked(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::PersistenceIo(e.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        match e {
            sled::Error::Io(io) => Error::PersistenceIo(io.to_string()),
            sled::Error::Corruption { .. } => Error::PersistenceCorruption(e.to_string()),
            other => Error::PersistenceIo(other.to_string()),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
