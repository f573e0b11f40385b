//! Artifact Index
//!
//! One JSON file per artifact id mapping it to a content hash plus
//! metadata. Writes are atomic (temp file + rename). Filenames keep
//! `[A-Za-z0-9._-]` and percent-encode everything else; names over 240
//! bytes are truncated with a short hash suffix to stay unique.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::{Error, Result};

/// Longest allowed index filename in bytes (without the `.json` suffix)
const MAX_SAFE_NAME_BYTES: usize = 240;

/// Metadata stored per artifact id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub artifact_id: String,
    /// 64-hex-char SHA-256 of the blob contents
    pub hash: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub etag: Option<String>,
    /// Caller-supplied upstream timestamp, ISO-8601
    pub last_modified: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// Encode an artifact id into a filesystem-safe name.
///
/// Unreserved characters pass through; everything else percent-encodes.
/// `~` is folded into the encoded set so the output alphabet is exactly
/// `[A-Za-z0-9._%-]`.
pub fn safe_file_name(artifact_id: &str) -> String {
    let encoded = urlencoding::encode(artifact_id).replace('~', "%7E");

    if encoded.len() <= MAX_SAFE_NAME_BYTES {
        return encoded;
    }

    // Truncate at a boundary that does not split a percent triple, then
    // append a digest suffix so distinct long ids stay distinct
    let digest = Sha256::digest(artifact_id.as_bytes());
    let suffix = format!("-{}", &hex::encode(digest)[..12]);

    let mut cut = MAX_SAFE_NAME_BYTES - suffix.len();
    while cut > 0 && !encoded.is_char_boundary(cut) {
        cut -= 1;
    }
    // Back out of a partially included %XX sequence
    for back in 1..3 {
        if cut >= back && encoded.as_bytes()[cut - back] == b'%' {
            cut -= back;
            break;
        }
    }

    format!("{}{}", &encoded[..cut], suffix)
}

/// Directory of per-artifact JSON records
pub struct ArtifactIndex {
    dir: PathBuf,
}

impl ArtifactIndex {
    /// Open (creating the directory when absent)
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path of the record file for an artifact id
    pub fn path_for(&self, artifact_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_file_name(artifact_id)))
    }

    /// Atomically write (or overwrite) a record
    pub fn write(&self, metadata: &ArtifactMetadata) -> Result<()> {
        let path = self.path_for(&metadata.artifact_id);
        let json = serde_json::to_vec(metadata)
            .map_err(|e| Error::ArtifactIo(format!("encoding index record: {}", e)))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| Error::ArtifactIo(e.to_string()))?;
        tmp.write_all(&json)
            .map_err(|e| Error::ArtifactIo(e.to_string()))?;
        tmp.persist(&path)
            .map_err(|e| Error::ArtifactIo(e.to_string()))?;
        Ok(())
    }

    /// Read a record; `None` when the artifact id has no index entry
    pub fn read(&self, artifact_id: &str) -> Result<Option<ArtifactMetadata>> {
        let path = self.path_for(artifact_id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::ArtifactIo(e.to_string())),
        };
        let metadata = serde_json::from_slice(&raw)
            .map_err(|e| Error::ArtifactIo(format!("decoding index record: {}", e)))?;
        Ok(Some(metadata))
    }

    /// Remove a record; false when it did not exist
    pub fn remove(&self, artifact_id: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(artifact_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::ArtifactIo(e.to_string())),
        }
    }

    pub fn exists(&self, artifact_id: &str) -> bool {
        self.path_for(artifact_id).exists()
    }

    /// Load every readable record. Unreadable files are skipped with a
    /// warning; the orphan sweep deals with them.
    pub fn list(&self) -> Result<Vec<ArtifactMetadata>> {
        let mut out = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let dirent = match dirent {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "unreadable index directory entry");
                    continue;
                }
            };
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).ok().and_then(|raw| {
                serde_json::from_slice::<ArtifactMetadata>(&raw).ok()
            }) {
                Some(metadata) => out.push(metadata),
                None => warn!(path = %path.display(), "skipping undecodable index record"),
            }
        }
        Ok(out)
    }

    /// Count of index records
    pub fn len(&self) -> usize {
        fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("json"))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove record files that cannot be decoded; returns how many
    pub fn remove_undecodable(&self) -> usize {
        let mut removed = 0;
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for dirent in entries.filter_map(|e| e.ok()) {
                let path = dirent.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let ok = fs::read(&path)
                    .ok()
                    .map(|raw| serde_json::from_slice::<ArtifactMetadata>(&raw).is_ok())
                    .unwrap_or(false);
                if !ok && fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// =============================================================================
// Tests
// =============================================================================
