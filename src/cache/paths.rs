// Cache path utilities.
// Resolves the default cache root and derives deterministic on-disk keys
// from request identifiers.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use sha2::{Digest, Sha256};

use crate::error::PolicyError;

/// Extension of the informational sidecar written next to each body file.
pub const META_EXTENSION: &str = "meta.json";

/// Get the default cache root (~/.cache/niced-request on Linux).
pub fn default_cache_root() -> Option<PathBuf> {
    ProjectDirs::from("", "", "niced-request").map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Location of one cache entry relative to a cache root: an organizer-chosen
/// sub-directory (possibly empty, meaning the root itself) plus a hashed
/// file stem.
///
/// Derivation is deterministic: the same request identifier under the same
/// organizer segment always lands on the same paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    segment: String,
    stem: String,
}

impl CacheKey {
    /// Derive the key for a request under an organizer-provided segment.
    ///
    /// The segment is sanitized rather than trusted: characters that are
    /// problematic on common filesystems are replaced, and segments that
    /// would escape the cache root are rejected.
    pub fn derive(segment: &str, request: &str) -> Result<Self, PolicyError> {
        Ok(Self {
            segment: sanitize_segment(segment)?,
            stem: hash_stem(request),
        })
    }

    /// The sanitized sub-directory, empty when the entry sits at the root.
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Path of the body file under `root`.
    pub fn body_path(&self, root: &Path) -> PathBuf {
        self.dir(root).join(&self.stem)
    }

    /// Path of the meta sidecar under `root`.
    pub fn meta_path(&self, root: &Path) -> PathBuf {
        self.dir(root).join(format!("{}.{}", self.stem, META_EXTENSION))
    }

    /// Directory holding both files of this entry.
    pub fn dir(&self, root: &Path) -> PathBuf {
        if self.segment.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&self.segment)
        }
    }
}

/// Lowercase hex SHA-256 of the request identifier: stable, filename-safe,
/// collision-resistant.
fn hash_stem(request: &str) -> String {
    format!("{:x}", Sha256::digest(request.as_bytes()))
}

/// Sanitize an organizer segment for use as a single path component.
/// Problematic characters become underscores; traversal segments are
/// rejected. The empty segment is allowed and means "no sub-directory".
fn sanitize_segment(segment: &str) -> Result<String, PolicyError> {
    if segment.contains('\0') {
        return Err(PolicyError(
            "segment contains a NUL character".to_string(),
        ));
    }

    let sanitized: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    if sanitized == "." || sanitized == ".." {
        return Err(PolicyError(format!(
            "segment {segment:?} is a path traversal component"
        )));
    }

    Ok(sanitized)
}
