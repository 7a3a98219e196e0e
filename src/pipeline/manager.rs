//! Pipeline manager.
//!
//! Runs the batch loop: scatter `batch_size` worker tasks over a pool of
//! `num_workers`, gather all of them, fold the results into statistics, the
//! duplicate detector and the upload buffer, then start the next batch.
//! Batches are strictly sequential; tasks inside a batch finish in any order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::config::{ConfigError, PipelineConfig};
use super::upload::{UploadCoordinator, UploadReport};
use super::worker::{summarize, task_seed, BatchResult, WorkerContext};
use crate::composer::{Composer, RuleTable};
use crate::dedup::{DetectorView, DuplicateDetector, InitReport};
use crate::error::RuleError;
use crate::features::{DisabledMeasurer, FeatureExtractor, Measurer, StaticFeatureExtractor};
use crate::generators::GeneratorRegistry;
use crate::metrics::{MetricsCollector, ResourceMonitor, ResourceSnapshot, TaskStatus};
use crate::remote::RemoteStore;
use crate::storage::{CleanupReport, DirectoryStore, LocalStore};

/// Errors that stop the pipeline before it starts.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule table error: {0}")]
    Rules(#[from] RuleError),

    #[error("Generator registry is empty")]
    EmptyRegistry,

    #[error("Pipeline has already been started")]
    AlreadyStarted,
}

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Initializing => write!(f, "initializing"),
            PipelineState::Running => write!(f, "running"),
            PipelineState::Draining => write!(f, "draining"),
            PipelineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Cooperative stop signal.
///
/// Checked between batches and between task submissions. In-flight tasks
/// always run to completion.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests a stop after the current batch.
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub processed: u64,
    /// Tasks that completed, duplicates included.
    pub succeeded: u64,
    pub failed: u64,
    pub duplicates: u64,
    pub uploaded: u64,
    pub upload_failed: u64,
    pub batches: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineStats {
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.processed as f64
    }

    /// Processed tasks per minute of wall time.
    pub fn rate_per_minute(&self) -> f64 {
        let Some(started) = self.started_at else {
            return 0.0;
        };
        let end = self.finished_at.unwrap_or_else(Utc::now);
        let minutes = (end - started).num_milliseconds() as f64 / 60_000.0;
        if minutes <= 0.0 {
            return 0.0;
        }
        self.processed as f64 / minutes
    }

    pub fn upload_success_rate(&self) -> f64 {
        let attempts = self.uploaded + self.upload_failed;
        if attempts == 0 {
            return 0.0;
        }
        self.uploaded as f64 / attempts as f64
    }
}

/// What one gather contributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duplicates: usize,
    /// Results added to the upload buffer.
    pub buffered: usize,
    /// Worker session hashes new to the detector.
    pub merged_hashes: usize,
}

pub struct PipelineManager {
    config: PipelineConfig,
    composer: Arc<Composer>,
    extractor: Arc<dyn FeatureExtractor>,
    measurer: Arc<dyn Measurer>,
    store: Arc<dyn LocalStore>,
    remote: Option<Arc<dyn RemoteStore>>,
    uploader: Option<UploadCoordinator>,
    detector: DuplicateDetector,
    state: watch::Sender<PipelineState>,
    shutdown: ShutdownHandle,
    stats: PipelineStats,
    buffer: Vec<BatchResult>,
    cleanup_mark: u64,
    metrics: MetricsCollector,
    resources: ResourceMonitor,
}

impl PipelineManager {
    /// Creates a manager with the built-in collaborators: static features,
    /// no measurement backend, a directory store under `local_dir` and no
    /// remote store.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the registry is empty.
    pub fn new(
        config: PipelineConfig,
        registry: Arc<GeneratorRegistry>,
        rules: Arc<RuleTable>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if registry.is_empty() {
            return Err(PipelineError::EmptyRegistry);
        }

        let composer = Composer::new(registry, rules)
            .with_stopping_prob(config.stopping_prob)
            .with_max_steps(config.max_steps);
        let detector =
            DuplicateDetector::new(&config.cache_file).with_page_size(config.remote_page_size);
        let store = DirectoryStore::new(&config.local_dir);
        let resources = ResourceMonitor::new(&config.local_dir);
        let (state, _) = watch::channel(PipelineState::Idle);

        Ok(Self {
            config,
            composer: Arc::new(composer),
            extractor: Arc::new(StaticFeatureExtractor),
            measurer: Arc::new(DisabledMeasurer::default()),
            store: Arc::new(store),
            remote: None,
            uploader: None,
            detector,
            state,
            shutdown: ShutdownHandle::new(),
            stats: PipelineStats::default(),
            buffer: Vec::new(),
            cleanup_mark: 0,
            metrics: MetricsCollector::new(),
            resources,
        })
    }

    /// Creates a manager over every built-in template, with the rule table
    /// from `config.rules_file` when set.
    pub fn from_config(config: PipelineConfig) -> Result<Self, PipelineError> {
        let rules = match &config.rules_file {
            Some(path) => RuleTable::from_file(path)?,
            None => RuleTable::default(),
        };
        Self::new(
            config,
            Arc::new(GeneratorRegistry::with_default_templates()),
            Arc::new(rules),
        )
    }

    /// Attaches a remote store. Without one the pipeline runs local-only and
    /// buffers nothing for upload.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.uploader = Some(UploadCoordinator::new(Arc::clone(&remote)));
        self.remote = Some(remote);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FeatureExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_measurer(mut self, measurer: Arc<dyn Measurer>) -> Self {
        self.measurer = measurer;
        self
    }

    pub fn with_local_store(mut self, store: Arc<dyn LocalStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_detector(mut self, detector: DuplicateDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownHandle) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn detector(&self) -> &DuplicateDetector {
        &self.detector
    }

    /// Results waiting for upload.
    pub fn buffered(&self) -> &[BatchResult] {
        &self.buffer
    }

    fn set_state(&self, state: PipelineState) {
        let previous = self.state.send_replace(state);
        debug!(from = %previous, to = %state, "Pipeline state change");
    }

    fn worker_context(&self) -> WorkerContext {
        let ctx = WorkerContext::new(
            Arc::clone(&self.composer),
            Arc::clone(&self.extractor),
            Arc::clone(&self.measurer),
            Arc::clone(&self.store),
            self.config.base_params.clone(),
            self.config.measurement_timeout,
        );
        if self.uploader.is_some() {
            ctx
        } else {
            ctx.without_payloads()
        }
    }

    /// Loads the duplicate cache and syncs it with the remote store.
    pub async fn initialize(&mut self) -> InitReport {
        self.set_state(PipelineState::Initializing);
        let report = self
            .detector
            .initialize(self.remote.as_deref(), self.config.force_refresh)
            .await;
        self.metrics.update_detector(&self.detector.stats());
        info!(
            loaded_from_cache = report.loaded_from_cache,
            fetched_from_remote = ?report.fetched_from_remote,
            remote_connected = self.detector.remote_connected(),
            "Duplicate detector ready"
        );
        report
    }

    /// Runs batches until shutdown or `max_iterations`, then drains the
    /// upload buffer and returns the final statistics.
    pub async fn run(&mut self) -> Result<PipelineStats, PipelineError> {
        if self.state() != PipelineState::Idle {
            return Err(PipelineError::AlreadyStarted);
        }

        self.initialize().await;
        self.stats.started_at = Some(Utc::now());
        self.set_state(PipelineState::Running);
        info!(
            workers = self.config.num_workers,
            batch_size = self.config.batch_size,
            max_iterations = ?self.config.max_iterations,
            remote = ?self.remote.as_ref().map(|r| r.describe()),
            "Pipeline started"
        );
        let host = self.resources.host_info();
        info!(
            cpu_count = host.cpu_count,
            memory_total_gb = %format!("{:.1}", host.memory_total_gb),
            disk_free_gb = ?host.disk_free_gb.map(|gb| (gb * 10.0).round() / 10.0),
            workers = self.config.num_workers,
            "Host resources"
        );

        let ctx = Arc::new(self.worker_context());
        let mut iteration = 0u64;
        while !self.shutdown.is_shutdown() {
            if self.config.max_iterations.is_some_and(|max| iteration >= max) {
                break;
            }

            let started = Instant::now();
            let results = self.run_batch(&ctx, iteration).await;
            let summary = self.absorb_batch(results).await;
            let elapsed = started.elapsed();
            self.metrics.record_batch(elapsed.as_secs_f64());
            let resources = self.resources.sample();
            self.metrics.update_resources(&resources);
            self.log_status(iteration, &summary, elapsed, &resources);
            self.maybe_cleanup().await;
            iteration += 1;
        }

        self.set_state(PipelineState::Draining);
        if !self.buffer.is_empty() {
            info!(buffered = self.buffer.len(), "Flushing upload buffer");
            self.flush_uploads().await;
        }
        if let Err(e) = self.detector.persist() {
            warn!(error = %e, "Failed to persist duplicate cache on shutdown");
        }
        self.metrics.update_detector(&self.detector.stats());

        self.stats.finished_at = Some(Utc::now());
        self.set_state(PipelineState::Stopped);
        info!(
            processed = self.stats.processed,
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            duplicates = self.stats.duplicates,
            uploaded = self.stats.uploaded,
            upload_failed = self.stats.upload_failed,
            batches = self.stats.batches,
            "Pipeline stopped"
        );
        Ok(self.stats.clone())
    }

    /// Scatters one batch over the pool and waits for every task.
    async fn run_batch(&self, ctx: &Arc<WorkerContext>, iteration: u64) -> Vec<BatchResult> {
        let batch_size = self.config.batch_size;
        let semaphore = Arc::new(Semaphore::new(self.config.num_workers));
        let snapshot = self.detector.snapshot();
        let mut tasks = JoinSet::new();
        let mut outstanding = BTreeMap::new();

        for slot in 0..batch_size {
            if self.shutdown.is_shutdown() {
                debug!(submitted = slot, "Shutdown requested, stopping submissions");
                break;
            }
            let worker_id = slot % self.config.num_workers;
            let task_index = iteration * batch_size as u64 + slot as u64;
            let ctx = Arc::clone(ctx);
            let semaphore = Arc::clone(&semaphore);
            let view = DetectorView::new(Arc::clone(&snapshot));

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                ctx.run_task(worker_id, task_index, view).await
            });
            outstanding.insert(task_index, worker_id);
        }

        let mut results = Vec::with_capacity(outstanding.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    outstanding.remove(&result.task_index);
                    results.push(result);
                }
                Err(e) => error!(error = %e, "Worker task panicked"),
            }
        }

        // Whatever never reported back panicked.
        for (task_index, worker_id) in outstanding {
            let seed = task_seed(self.config.base_params.seed, task_index, worker_id);
            results.push(BatchResult::failed(
                worker_id,
                task_index,
                seed,
                "worker task panicked",
            ));
        }
        results
    }

    /// Folds one gathered batch into the run state.
    ///
    /// Session hashes from every task are merged into the detector, then
    /// successful, non-duplicate, newly written results are marked Pending
    /// and buffered when a remote store is attached. Reaching the upload
    /// threshold triggers an upload.
    pub async fn absorb_batch(&mut self, results: Vec<BatchResult>) -> BatchSummary {
        let mut summary = BatchSummary {
            merged_hashes: self
                .detector
                .merge_session_hashes(results.iter().flat_map(|r| r.session_hashes.iter())),
            ..BatchSummary::default()
        };

        for result in results {
            summary.processed += 1;
            let status = if !result.success {
                summary.failed += 1;
                TaskStatus::Failed
            } else if result.is_duplicate {
                summary.succeeded += 1;
                summary.duplicates += 1;
                TaskStatus::Duplicate
            } else if result.written {
                summary.succeeded += 1;
                TaskStatus::New
            } else {
                summary.succeeded += 1;
                TaskStatus::Existing
            };
            self.metrics.record_task(status);
            if status == TaskStatus::Failed {
                debug!(result = %summarize(&result), "Task failed");
            }

            if self.uploader.is_some() && result.is_uploadable() {
                if let Some(hash) = result.digest() {
                    self.detector.mark_pending_upload(hash);
                }
                self.buffer.push(result);
                summary.buffered += 1;
            }
        }

        self.stats.processed += summary.processed as u64;
        self.stats.succeeded += summary.succeeded as u64;
        self.stats.failed += summary.failed as u64;
        self.stats.duplicates += summary.duplicates as u64;
        self.stats.batches += 1;

        if self.buffer.len() >= self.config.upload_threshold {
            self.flush_uploads().await;
        }
        self.metrics.update_upload_buffer(self.buffer.len());
        self.metrics.update_detector(&self.detector.stats());
        summary
    }

    /// Uploads and clears the buffer.
    async fn flush_uploads(&mut self) -> Option<UploadReport> {
        let uploader = self.uploader.as_ref()?;
        if self.buffer.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.buffer);
        let report = uploader.upload_batch(&batch, &mut self.detector).await;
        self.stats.uploaded += report.uploaded as u64;
        self.stats.upload_failed += report.failed as u64;
        self.metrics.update_upload_buffer(0);
        Some(report)
    }

    /// Removes old local artifacts every `cleanup_interval` processed tasks.
    async fn maybe_cleanup(&mut self) -> Option<CleanupReport> {
        if self.stats.processed - self.cleanup_mark < self.config.cleanup_interval {
            return None;
        }
        self.cleanup_mark = self.stats.processed;

        match self.store.cleanup_older_than(self.config.max_artifact_age).await {
            Ok(report) => {
                info!(
                    deleted = report.deleted,
                    freed_bytes = report.freed_bytes,
                    errors = report.errors,
                    "Local cleanup finished"
                );
                self.metrics.record_cleanup(report.deleted);
                Some(report)
            }
            Err(e) => {
                warn!(error = %e, "Local cleanup failed");
                None
            }
        }
    }

    fn log_status(
        &self,
        iteration: u64,
        summary: &BatchSummary,
        elapsed: Duration,
        resources: &ResourceSnapshot,
    ) {
        let detector = self.detector.stats();
        info!(
            batch = iteration,
            batch_processed = summary.processed,
            batch_failed = summary.failed,
            batch_duplicates = summary.duplicates,
            elapsed_ms = elapsed.as_millis() as u64,
            processed = self.stats.processed,
            success_rate = %format!("{:.1}%", self.stats.success_rate() * 100.0),
            rate_per_minute = %format!("{:.1}", self.stats.rate_per_minute()),
            uploaded = self.stats.uploaded,
            buffered = self.buffer.len(),
            known_hashes = detector.total,
            cpu_percent = %format!("{:.1}", resources.cpu_percent),
            memory_percent = %format!("{:.1}", resources.memory_percent),
            memory_available_gb = %format!("{:.1}", resources.memory_available_gb),
            "Batch complete"
        );
    }
}

impl std::fmt::Debug for PipelineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineManager")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("stats", &self.stats)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{content_hash, Circuit, Instruction};
    use crate::dedup::HashRecordState;
    use crate::pipeline::worker::UploadPayload;
    use crate::remote::InMemoryRemoteStore;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig::default()
            .with_num_workers(2)
            .with_batch_size(4)
            .with_width_range(1, 4)
            .with_depth_range(1, 4)
            .with_cache_file(dir.path().join("cache.json"))
            .with_local_dir(dir.path().join("circuits"))
    }

    fn manager(config: PipelineConfig) -> PipelineManager {
        PipelineManager::new(
            config,
            Arc::new(GeneratorRegistry::with_default_templates()),
            Arc::new(RuleTable::default()),
        )
        .unwrap()
    }

    /// A stored, uploadable result for a distinct circuit.
    fn stored_result(index: u64) -> BatchResult {
        let width = index as usize + 1;
        let mut c = Circuit::new("r", width, 0);
        c.push(Instruction::new("x", vec![width - 1])).unwrap();
        let hash = content_hash(&c);

        let mut result = BatchResult::new(0, index, 0);
        result.success = true;
        result.written = true;
        result.session_hashes = vec![hash.digest.clone()];
        result.hash = Some(hash);
        result.payload = Some(UploadPayload {
            bytes: serde_json::to_vec(&c).unwrap(),
            fields: serde_json::json!({}),
        });
        result
    }

    #[test]
    fn test_empty_registry_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = PipelineManager::new(
            config(&dir),
            Arc::new(GeneratorRegistry::new()),
            Arc::new(RuleTable::default()),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyRegistry));
    }

    #[test]
    fn test_zero_workers_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = PipelineManager::new(
            config(&dir).with_num_workers(0),
            Arc::new(GeneratorRegistry::with_default_templates()),
            Arc::new(RuleTable::default()),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("num_workers"));
    }

    #[test]
    fn test_stats_rates() {
        let stats = PipelineStats {
            processed: 10,
            succeeded: 7,
            failed: 3,
            uploaded: 3,
            upload_failed: 1,
            ..PipelineStats::default()
        };
        assert!((stats.success_rate() - 0.7).abs() < 1e-12);
        assert!((stats.upload_success_rate() - 0.75).abs() < 1e-12);
        assert_eq!(stats.rate_per_minute(), 0.0);
        assert_eq!(PipelineStats::default().success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_shutdown_handle() {
        let handle = ShutdownHandle::new();
        assert!(!handle.is_shutdown());
        let waiter = handle.clone();
        let wait = tokio::spawn(async move { waiter.wait().await });
        handle.shutdown();
        wait.await.unwrap();
        assert!(handle.is_shutdown());
    }

    #[tokio::test]
    async fn test_absorb_batch_with_failures() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(config(&dir).with_upload_threshold(100))
            .with_remote(Arc::new(InMemoryRemoteStore::new()));

        let mut results: Vec<BatchResult> = (0..7).map(stored_result).collect();
        // Already on disk from an earlier task: succeeds but is not uploaded.
        results[6].written = false;
        results[6].payload = None;
        let existing = results[6].digest().unwrap().to_string();
        for index in 7..10 {
            results.push(BatchResult::failed(1, index, 0, "boom"));
        }

        let summary = manager.absorb_batch(results).await;
        assert_eq!(summary.processed, 10);
        assert_eq!(summary.succeeded, 7);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.buffered, 6);
        assert_eq!(manager.stats().processed, 10);
        assert_eq!(manager.stats().succeeded, 7);
        assert_eq!(manager.stats().failed, 3);
        assert!((manager.stats().success_rate() - 0.7).abs() < 1e-9);
        assert_eq!(manager.buffered().len(), 6);
        assert!(manager
            .buffered()
            .iter()
            .all(|r| r.success && !r.is_duplicate && r.written));

        let hash = manager.buffered()[0].digest().unwrap().to_string();
        assert_eq!(manager.detector().state_of(&hash), Some(HashRecordState::Pending));
        assert_eq!(manager.detector().state_of(&existing), Some(HashRecordState::Session));
    }

    #[tokio::test]
    async fn test_local_only_buffers_nothing() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(config(&dir));

        let summary = manager.absorb_batch((0..3).map(stored_result).collect()).await;
        assert_eq!(summary.buffered, 0);
        assert!(manager.buffered().is_empty());

        // Session hashes are still merged.
        assert_eq!(summary.merged_hashes, 3);
        let hash = stored_result(0).digest().unwrap().to_string();
        assert_eq!(manager.detector().state_of(&hash), Some(HashRecordState::Session));
    }

    #[tokio::test]
    async fn test_threshold_triggers_upload() {
        let dir = TempDir::new().unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let mut manager = manager(config(&dir).with_upload_threshold(3))
            .with_remote(remote.clone());

        manager.absorb_batch((0..2).map(stored_result).collect()).await;
        assert_eq!(manager.buffered().len(), 2);
        assert_eq!(manager.stats().uploaded, 0);

        manager.absorb_batch((2..4).map(stored_result).collect()).await;
        assert!(manager.buffered().is_empty());
        assert_eq!(manager.stats().uploaded, 4);
        assert_eq!(remote.hash_count(), 4);
    }

    #[tokio::test]
    async fn test_duplicates_are_counted_not_buffered() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(config(&dir).with_upload_threshold(100))
            .with_remote(Arc::new(InMemoryRemoteStore::new()));

        let mut duplicate = stored_result(0);
        duplicate.is_duplicate = true;
        duplicate.written = false;
        duplicate.session_hashes.clear();

        let summary = manager.absorb_batch(vec![duplicate]).await;
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.buffered, 0);
    }

    #[tokio::test]
    async fn test_run_bounded_iterations() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(config(&dir).with_max_iterations(2));
        let mut states = manager.subscribe_state();
        assert_eq!(manager.state(), PipelineState::Idle);

        let stats = manager.run().await.unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.processed, 8);
        assert_eq!(stats.succeeded + stats.failed, 8);
        assert!(stats.finished_at.is_some());
        assert_eq!(manager.state(), PipelineState::Stopped);
        assert_eq!(*states.borrow_and_update(), PipelineState::Stopped);

        assert!(matches!(manager.run().await, Err(PipelineError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_shutdown_before_run() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(config(&dir));
        manager.shutdown_handle().shutdown();

        let stats = manager.run().await.unwrap();
        assert_eq!(stats.batches, 0);
        assert_eq!(stats.processed, 0);
        assert_eq!(manager.state(), PipelineState::Stopped);
    }

    #[tokio::test]
    async fn test_cleanup_runs_on_interval() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(
            config(&dir)
                .with_cleanup_interval(5)
                .with_max_artifact_age(Duration::ZERO),
        );

        manager.absorb_batch((0..3).map(stored_result).collect()).await;
        assert!(manager.maybe_cleanup().await.is_none());

        manager.absorb_batch((3..6).map(stored_result).collect()).await;
        assert!(manager.maybe_cleanup().await.is_some());
        assert_eq!(manager.cleanup_mark, 6);
        assert!(manager.maybe_cleanup().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_max_steps_runs_empty_composites() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager(config(&dir).with_max_steps(0).with_max_iterations(2));

        let stats = manager.run().await.unwrap();
        assert_eq!(stats.processed, 8);
        assert_eq!(stats.failed, 0);
        // Every task builds the same empty circuit; the second batch sees it.
        assert_eq!(stats.duplicates, 4);
        let empty = content_hash(&Circuit::empty()).digest;
        assert_eq!(manager.detector().state_of(&empty), Some(HashRecordState::Session));
        assert_eq!(manager.detector().stats().total, 1);
    }
}
