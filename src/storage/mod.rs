//! Local artifact persistence.
//!
//! Workers store every new circuit locally before it is queued for upload.
//! Storage is idempotent per hash: storing a hash that is already present is a
//! no-op reported as `written = false`, not an error.

pub mod local;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::circuit::Circuit;

pub use local::{DirectoryStore, CIRCUIT_FILE, META_FILE};

/// Errors that can occur during local storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to create storage directory: {0}")]
    DirectoryCreationFailed(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Where an artifact ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub hash: String,
    /// False if the artifact was already present.
    pub written: bool,
    pub path: PathBuf,
}

/// Outcome of an age-based cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub deleted: usize,
    pub freed_bytes: u64,
    pub errors: usize,
}

#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Stores `circuit` with its metadata under `hash`.
    async fn store(
        &self,
        hash: &str,
        circuit: &Circuit,
        meta: &serde_json::Value,
    ) -> Result<StoredArtifact, StorageError>;

    /// Deletes artifacts last modified more than `max_age` ago.
    async fn cleanup_older_than(&self, max_age: Duration) -> Result<CleanupReport, StorageError>;
}
