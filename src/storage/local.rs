//! Content-addressed directory store.
//!
//! Layout: `<root>/<hash>/circuit.json` and `<root>/<hash>/meta.json`. An
//! artifact directory is assembled under a temporary name and renamed into
//! place, so a directory named after a hash is always complete.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::{CleanupReport, LocalStore, StorageError, StoredArtifact};
use crate::circuit::Circuit;

pub const CIRCUIT_FILE: &str = "circuit.json";
pub const META_FILE: &str = "meta.json";
const TEMP_PREFIX: &str = ".tmp-";

/// Stores each artifact in its own directory under `root`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.artifact_dir(hash).is_dir()
    }

    async fn ensure_root(&self) -> Result<(), StorageError> {
        if !self.root.exists() {
            fs::create_dir_all(&self.root).await.map_err(|e| {
                StorageError::DirectoryCreationFailed(format!(
                    "Failed to create store root {:?}: {}",
                    self.root, e
                ))
            })?;
        }
        Ok(())
    }

    async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let mut file = fs::File::create(path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for DirectoryStore {
    async fn store(
        &self,
        hash: &str,
        circuit: &Circuit,
        meta: &serde_json::Value,
    ) -> Result<StoredArtifact, StorageError> {
        let target = self.artifact_dir(hash);
        if target.exists() {
            debug!(hash, "Artifact already stored locally");
            return Ok(StoredArtifact {
                hash: hash.to_string(),
                written: false,
                path: target,
            });
        }

        self.ensure_root().await?;
        let staging = self
            .root
            .join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4()));
        fs::create_dir_all(&staging).await?;

        let staged = async {
            Self::write_file(&staging.join(CIRCUIT_FILE), &serde_json::to_vec(circuit)?).await?;
            Self::write_file(&staging.join(META_FILE), &serde_json::to_vec_pretty(meta)?).await?;
            Ok::<(), StorageError>(())
        }
        .await;
        if let Err(e) = staged {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        match fs::rename(&staging, &target).await {
            Ok(()) => Ok(StoredArtifact {
                hash: hash.to_string(),
                written: true,
                path: target,
            }),
            Err(e) if target.exists() => {
                // Lost a race with another writer of the same hash.
                debug!(hash, error = %e, "Artifact appeared while staging");
                let _ = fs::remove_dir_all(&staging).await;
                Ok(StoredArtifact {
                    hash: hash.to_string(),
                    written: false,
                    path: target,
                })
            }
            Err(e) => {
                let _ = fs::remove_dir_all(&staging).await;
                Err(StorageError::Io(e))
            }
        }
    }

    async fn cleanup_older_than(&self, max_age: Duration) -> Result<CleanupReport, StorageError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || cleanup_blocking(&root, max_age))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter_map(|entry| entry.metadata().ok())
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
        .sum()
}

fn cleanup_blocking(root: &Path, max_age: Duration) -> Result<CleanupReport, StorageError> {
    let mut report = CleanupReport::default();
    if !root.exists() {
        return Ok(report);
    }
    let now = SystemTime::now();

    for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry during cleanup");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(modified) => modified,
            None => continue,
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age < max_age {
            continue;
        }

        let bytes = dir_size(entry.path());
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => {
                report.deleted += 1;
                report.freed_bytes += bytes;
            }
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove old artifact");
                report.errors += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::Instruction;
    use tempfile::TempDir;

    fn circuit() -> Circuit {
        let mut c = Circuit::new("stored", 2, 0);
        c.push(Instruction::new("cx", vec![0, 1])).unwrap();
        c
    }

    #[tokio::test]
    async fn test_store_writes_once() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path().join("circuits"));
        let meta = serde_json::json!({"depth": 1});

        let first = store.store("abc", &circuit(), &meta).await.unwrap();
        assert!(first.written);
        assert!(first.path.join(CIRCUIT_FILE).is_file());
        assert!(first.path.join(META_FILE).is_file());

        let second = store.store("abc", &circuit(), &meta).await.unwrap();
        assert!(!second.written);
        assert_eq!(second.hash, "abc");

        // Only the artifact directory remains; no staging leftovers.
        let entries = std::fs::read_dir(store.root()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_stored_circuit_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path());
        let stored = store
            .store("h1", &circuit(), &serde_json::json!({}))
            .await
            .unwrap();
        let bytes = std::fs::read(stored.path.join(CIRCUIT_FILE)).unwrap();
        let loaded: Circuit = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(loaded, circuit());
    }

    #[tokio::test]
    async fn test_cleanup_by_age() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path());
        store.store("old", &circuit(), &serde_json::json!({})).await.unwrap();

        let report = store.cleanup_older_than(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(report.deleted, 0);
        assert!(store.contains("old"));

        let report = store.cleanup_older_than(Duration::ZERO).await.unwrap();
        assert_eq!(report.deleted, 1);
        assert!(report.freed_bytes > 0);
        assert!(!store.contains("old"));
    }

    #[tokio::test]
    async fn test_cleanup_missing_root() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(dir.path().join("never-created"));
        let report = store.cleanup_older_than(Duration::ZERO).await.unwrap();
        assert_eq!(report, CleanupReport::default());
    }
}
