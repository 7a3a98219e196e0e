//! End-to-end pipeline runs against an in-memory remote store.
//!
//! Run with: cargo test --test pipeline_integration

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use circuit_forge::dedup::{DuplicateDetector, HashRecordState};
use circuit_forge::pipeline::{PipelineConfig, PipelineManager, PipelineState};
use circuit_forge::remote::{InMemoryRemoteStore, RemoteStore};
use circuit_forge::storage::{CIRCUIT_FILE, META_FILE};
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> PipelineConfig {
    PipelineConfig::new()
        .with_num_workers(3)
        .with_batch_size(6)
        .with_max_iterations(2)
        .with_seed(424_242)
        .with_width_range(1, 5)
        .with_depth_range(1, 6)
        .with_upload_threshold(3)
        .with_cache_file(dir.path().join("hashes.json"))
        .with_local_dir(dir.path().join("circuits"))
}

/// Stored artifact directories, staging directories excluded.
fn artifact_dirs(root: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .filter(|p| {
            !p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'))
        })
        .collect()
}

async fn load_detector(path: &Path) -> DuplicateDetector {
    let mut detector = DuplicateDetector::new(path);
    let report = detector.initialize(None, false).await;
    assert!(report.loaded_from_cache, "cache file should be readable");
    detector
}

#[tokio::test]
async fn test_full_run_uploads_and_persists() {
    let dir = TempDir::new().expect("temp dir");
    let config = test_config(&dir);
    let remote = Arc::new(InMemoryRemoteStore::new());

    let mut manager = PipelineManager::from_config(config.clone())
        .expect("valid config")
        .with_remote(remote.clone());
    let state = manager.subscribe_state();

    let stats = manager.run().await.expect("run should finish");

    assert_eq!(*state.borrow(), PipelineState::Stopped);
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.processed, 12);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.succeeded, 12);
    assert_eq!(stats.upload_failed, 0);
    assert!(stats.uploaded > 0);
    assert!(stats.uploaded + stats.duplicates <= stats.processed);
    assert!(stats.finished_at >= stats.started_at);
    assert!(manager.buffered().is_empty(), "drain should flush the buffer");

    // Everything written locally made it to the remote store.
    let artifacts = artifact_dirs(&config.local_dir);
    assert_eq!(artifacts.len() as u64, stats.uploaded);
    assert_eq!(remote.hash_count() as u64, stats.uploaded);
    for artifact in &artifacts {
        assert!(artifact.join(CIRCUIT_FILE).exists());
        assert!(artifact.join(META_FILE).exists());
        let hash = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .expect("hash directory name");
        assert!(remote.contains(hash));
        assert_eq!(
            manager.detector().state_of(hash),
            Some(HashRecordState::Confirmed)
        );
        let record = remote.record(hash).expect("record");
        assert!(record["blob_url"].is_string());
        assert!(record["n_qubits"].as_u64().is_some());
    }

    // The cache on disk matches the detector.
    let reloaded = load_detector(&config.cache_file).await;
    let stats_on_disk = reloaded.stats();
    assert_eq!(stats_on_disk.confirmed as u64, stats.uploaded);
    assert_eq!(stats_on_disk.pending, 0);
    assert_eq!(stats_on_disk.total, manager.detector().stats().total);
}

#[tokio::test]
async fn test_restart_treats_previous_circuits_as_duplicates() {
    let dir = TempDir::new().expect("temp dir");
    let config = test_config(&dir);
    let remote = Arc::new(InMemoryRemoteStore::new());

    let first = PipelineManager::from_config(config.clone())
        .expect("valid config")
        .with_remote(remote.clone())
        .run()
        .await
        .expect("first run");
    let lists_after_first = remote.list_calls();
    assert_eq!(lists_after_first, 1, "empty cache should trigger one sync");

    // Same seed and sizing reproduce the same circuits.
    let second = PipelineManager::from_config(config)
        .expect("valid config")
        .with_remote(remote.clone())
        .run()
        .await
        .expect("second run");

    assert_eq!(second.processed, first.processed);
    assert_eq!(second.duplicates, second.processed);
    assert_eq!(second.uploaded, 0);
    assert_eq!(remote.hash_count() as u64, first.uploaded);
    assert_eq!(
        remote.list_calls(),
        lists_after_first,
        "a loaded cache should not be resynced"
    );
}

#[tokio::test]
async fn test_remote_outage_leaves_items_pending() {
    let dir = TempDir::new().expect("temp dir");
    let config = test_config(&dir).with_upload_threshold(1);
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.fail_after_uploads(2);

    let mut manager = PipelineManager::from_config(config.clone())
        .expect("valid config")
        .with_remote(remote.clone());
    let stats = manager.run().await.expect("an outage is not fatal");

    assert_eq!(stats.processed, 12);
    assert_eq!(stats.failed, 0);
    assert!(stats.uploaded <= 2);
    assert_eq!(remote.hash_count() as u64, stats.uploaded);

    // Every new circuit was either uploaded or left Pending for a later sync.
    let written = artifact_dirs(&config.local_dir).len() as u64;
    assert_eq!(stats.uploaded + stats.upload_failed, written);
    if written > 2 {
        assert!(stats.upload_failed > 0);
    }

    let detector = load_detector(&config.cache_file).await;
    assert_eq!(detector.stats().confirmed as u64, stats.uploaded);
    assert_eq!(detector.stats().pending as u64, stats.upload_failed);
}

#[tokio::test]
async fn test_reconcile_demotes_unconfirmed_pending() {
    let dir = TempDir::new().expect("temp dir");
    let config = test_config(&dir).with_upload_threshold(1);
    let remote = Arc::new(InMemoryRemoteStore::new());
    remote.fail_after_uploads(0);

    let stats = PipelineManager::from_config(config.clone())
        .expect("valid config")
        .with_remote(remote.clone())
        .run()
        .await
        .expect("run");
    assert_eq!(stats.uploaded, 0);

    // The store comes back; a forced refresh finds none of the pending hashes.
    remote.set_unavailable(false);
    let store: &dyn RemoteStore = &*remote;
    let mut detector = DuplicateDetector::new(&config.cache_file);
    let report = detector.initialize(Some(store), true).await;
    assert_eq!(report.fetched_from_remote, Some(0));

    let after = detector.stats();
    assert_eq!(after.pending, 0);
    assert_eq!(after.confirmed, 0);
    assert!(after.session as u64 >= stats.upload_failed);
}

#[tokio::test]
async fn test_local_only_run() {
    let dir = TempDir::new().expect("temp dir");
    let config = test_config(&dir).with_max_iterations(1);

    let mut manager = PipelineManager::from_config(config.clone()).expect("valid config");
    let stats = manager.run().await.expect("run");

    assert_eq!(stats.processed, 6);
    assert_eq!(stats.uploaded, 0);
    assert_eq!(stats.upload_failed, 0);
    assert!(manager.buffered().is_empty());

    let detector = manager.detector().stats();
    assert!(!detector.remote_connected);
    assert_eq!(detector.confirmed, 0);
    assert_eq!(detector.pending, 0);
    assert!(detector.session > 0);
    assert!(!artifact_dirs(&config.local_dir).is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_unbounded_run() {
    let dir = TempDir::new().expect("temp dir");
    let config = PipelineConfig::new()
        .with_num_workers(2)
        .with_batch_size(2)
        .with_width_range(1, 3)
        .with_depth_range(1, 3)
        .with_cache_file(dir.path().join("hashes.json"))
        .with_local_dir(dir.path().join("circuits"));

    let mut manager = PipelineManager::from_config(config).expect("valid config");
    let mut state = manager.subscribe_state();
    let shutdown = manager.shutdown_handle();
    tokio::spawn(async move {
        if state.wait_for(|s| *s == PipelineState::Running).await.is_ok() {
            shutdown.shutdown();
        }
    });

    let stats = tokio::time::timeout(Duration::from_secs(60), manager.run())
        .await
        .expect("shutdown should stop the run")
        .expect("run");

    assert_eq!(manager.state(), PipelineState::Stopped);
    assert_eq!(stats.processed, stats.succeeded + stats.failed);
    assert!(stats.processed <= 2 * stats.batches.max(1));
}
