//! On-disk cache for the duplicate detector.
//!
//! A single JSON document holds the three hash sets and two timestamps. Writes
//! go to a temporary file in the same directory which is then renamed over the
//! target, so readers never observe a partial file.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while reading or writing the cache file.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error on cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to replace cache file {path}: {reason}")]
    Persist { path: PathBuf, reason: String },
}

/// Serialized cache document.
///
/// Sets are ordered so repeated writes of the same state are byte-identical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheContents {
    /// Accepts the older single-set layout under `hashes`.
    #[serde(default, alias = "hashes")]
    pub confirmed: BTreeSet<String>,
    #[serde(default)]
    pub pending: BTreeSet<String>,
    #[serde(default)]
    pub session: BTreeSet<String>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_write: Option<DateTime<Utc>>,
    #[serde(default)]
    pub total_count: usize,
}

/// Handle to the cache file location.
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Reads the cache. Returns `Ok(None)` if the file does not exist.
    pub fn load(&self) -> Result<Option<CacheContents>, CacheError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let contents = serde_json::from_slice(&bytes).map_err(|source| CacheError::Json {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(contents))
    }

    /// Writes the cache atomically (temp file in the same directory, then rename).
    pub fn save(&self, contents: &CacheContents) -> Result<(), CacheError> {
        let io_err = |source: std::io::Error| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let json = serde_json::to_vec_pretty(contents).map_err(|source| CacheError::Json {
            path: self.path.clone(),
            source,
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| CacheError::Persist {
            path: self.path.clone(),
            reason: e.error.to_string(),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        let cache = CacheFile::new(dir.path().join("cache.json"));
        assert!(cache.load().unwrap().is_none());
        assert!(!cache.exists());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let cache = CacheFile::new(dir.path().join("nested").join("cache.json"));
        let contents = CacheContents {
            confirmed: ["a".to_string()].into_iter().collect(),
            pending: ["b".to_string()].into_iter().collect(),
            session: ["c".to_string()].into_iter().collect(),
            last_sync: Some(Utc::now()),
            last_write: Some(Utc::now()),
            total_count: 1,
        };
        cache.save(&contents).unwrap();
        assert_eq!(cache.load().unwrap(), Some(contents));

        // No temp files left behind.
        let entries = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_legacy_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(
            &path,
            r#"{"hashes": ["x", "y"], "last_sync": null, "total_count": 2, "created_at": "2024-01-01"}"#,
        )
        .unwrap();
        let contents = CacheFile::new(&path).load().unwrap().unwrap();
        assert_eq!(contents.confirmed.len(), 2);
        assert!(contents.pending.is_empty());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = CacheFile::new(&path).load().unwrap_err();
        assert!(matches!(err, CacheError::Json { .. }));
    }
}
