// Cache store for persisting fetched response bodies.
// One body file per key, published atomically, with an informational JSON
// sidecar mapping the hashed filename back to the original request.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Error, Result};

use super::paths::CacheKey;

/// Sidecar metadata stored next to each body file.
///
/// Never consulted when deciding whether an entry is valid; it exists so a
/// human poking at the cache directory can tell which request a hashed
/// filename belongs to, and when it was fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    /// The request identifier this entry was fetched for.
    pub request: String,
    /// When the body was stored.
    pub cached_at: DateTime<Utc>,
}

/// Filesystem-backed store, owning all entries under one cache root.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a fully written entry exists for `key`.
    ///
    /// Bodies are published by atomic rename, so presence implies the entry
    /// was completely written; in-progress temp files are never visible here.
    pub fn exists(&self, key: &CacheKey) -> bool {
        key.body_path(&self.root).exists()
    }

    /// Read the stored body for `key`.
    ///
    /// The entry is expected to exist; any failure to read it back is
    /// reported as [`Error::CacheCorrupt`] so the caller can treat it as a
    /// miss and re-fetch.
    pub fn read(&self, key: &CacheKey) -> Result<Vec<u8>> {
        let path = key.body_path(&self.root);
        fs::read(&path).map_err(|source| Error::CacheCorrupt { path, source })
    }

    /// Persist `body` for `key`, replacing any prior entry atomically.
    ///
    /// The sidecar lands first; the body rename is the publish point, so a
    /// crash mid-write leaves either the old entry intact or the new one
    /// fully visible, never a partial file.
    pub fn write(&self, key: &CacheKey, request: &str, body: &[u8]) -> Result<()> {
        fs::create_dir_all(key.dir(&self.root))?;

        let meta = EntryMeta {
            request: request.to_string(),
            cached_at: Utc::now(),
        };
        // Sidecar failures are not fatal: the body is the entry.
        if let Err(err) = self.write_meta(key, &meta) {
            warn!(request, error = %err, "failed to write cache sidecar");
        }

        write_atomic(&key.body_path(&self.root), body)?;
        Ok(())
    }

    /// Remove the entry for `key`, if present.
    pub fn remove(&self, key: &CacheKey) -> Result<()> {
        for path in [key.body_path(&self.root), key.meta_path(&self.root)] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Read the sidecar for `key`, if present and parseable.
    pub fn read_meta(&self, key: &CacheKey) -> Result<Option<EntryMeta>> {
        let path = key.meta_path(&self.root);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents).ok())
    }

    fn write_meta(&self, key: &CacheKey, meta: &EntryMeta) -> Result<()> {
        let json = serde_json::to_string_pretty(meta)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        write_atomic(&key.meta_path(&self.root), json.as_bytes())
    }
}

/// Write via temp file, sync, then rename, so readers only ever observe a
/// complete file. The temp name carries the pid so two processes sharing a
/// cache root cannot interleave writes into one temp file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("entry")
        .to_string();
    name.push_str(&format!(".tmp{}", std::process::id()));
    let temp_path = path.with_file_name(name);

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    // A directory squatting on the entry path would make the rename fail
    // forever; clear it so a re-fetch can heal the entry.
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    }
    fs::rename(&temp_path, path)?;
    Ok(())
}
