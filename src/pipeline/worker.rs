//! Worker task: compose, check, describe, store.
//!
//! A task never fails. Anything that goes wrong is captured in its
//! [`BatchResult`] with `success = false`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::circuit::{Circuit, ContentHash};
use crate::composer::{Composer, Composition};
use crate::dedup::DetectorView;
use crate::features::{unavailable, FeatureExtractor, FeatureMap, Measurer};
use crate::generators::{BaseParams, GeneratorId};
use crate::storage::{LocalStore, StorageError};

/// Seed spacing between workers, so two workers never share a seed for the
/// same task index.
pub const WORKER_SEED_STRIDE: u64 = 1000;

/// Seed for one task. Depends only on the base seed, the task index and the
/// worker slot, so reruns with the same base seed reproduce every task.
pub fn task_seed(base_seed: u64, task_index: u64, worker_id: usize) -> u64 {
    base_seed
        .wrapping_add(task_index)
        .wrapping_add((worker_id as u64).wrapping_mul(WORKER_SEED_STRIDE))
}

#[derive(Debug, Error)]
enum TaskError {
    #[error("composition task failed: {0}")]
    Compose(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to encode circuit: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What the upload coordinator sends to the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPayload {
    /// Serialized circuit.
    pub bytes: Vec<u8>,
    /// Record fields upserted next to the blob.
    pub fields: Value,
}

/// Outcome of one worker task.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub worker_id: usize,
    pub task_index: u64,
    pub seed: u64,
    pub success: bool,
    pub hash: Option<ContentHash>,
    pub is_duplicate: bool,
    /// True if the artifact was newly written to the local store.
    pub written: bool,
    pub generators: Vec<GeneratorId>,
    pub width: usize,
    pub depth: usize,
    pub size: usize,
    pub features_count: usize,
    pub payload: Option<UploadPayload>,
    pub error: Option<String>,
    /// Hashes this task added to its session view.
    pub session_hashes: Vec<String>,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
}

impl BatchResult {
    /// An empty, unsuccessful result for one task slot.
    pub fn new(worker_id: usize, task_index: u64, seed: u64) -> Self {
        Self {
            worker_id,
            task_index,
            seed,
            success: false,
            hash: None,
            is_duplicate: false,
            written: false,
            generators: Vec::new(),
            width: 0,
            depth: 0,
            size: 0,
            features_count: 0,
            payload: None,
            error: None,
            session_hashes: Vec::new(),
            duration: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// A result for a task that died before reporting, e.g. a panic.
    pub fn failed(worker_id: usize, task_index: u64, seed: u64, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::new(worker_id, task_index, seed)
        }
    }

    /// Digest of the produced circuit, if any.
    pub fn digest(&self) -> Option<&str> {
        self.hash.as_ref().map(|h| h.digest.as_str())
    }

    /// True if this result belongs in the upload buffer.
    pub fn is_uploadable(&self) -> bool {
        self.success && !self.is_duplicate && self.written && self.payload.is_some()
    }
}

/// Record fields stored next to each artifact.
#[derive(Debug, Serialize)]
struct ArtifactMeta<'a> {
    hash: &'a str,
    hash_method: String,
    name: &'a str,
    n_qubits: usize,
    n_clbits: usize,
    depth: usize,
    size: usize,
    generators: &'a [GeneratorId],
    selected: &'a [GeneratorId],
    dropped_steps: usize,
    seed: u64,
    worker_id: usize,
    timestamp: String,
    features: &'a FeatureMap,
    measurements: &'a FeatureMap,
}

/// Everything a worker needs, shared by all tasks of a run.
pub struct WorkerContext {
    composer: Arc<Composer>,
    extractor: Arc<dyn FeatureExtractor>,
    measurer: Arc<dyn Measurer>,
    store: Arc<dyn LocalStore>,
    base: BaseParams,
    measurement_timeout: Duration,
    build_payload: bool,
}

impl WorkerContext {
    pub fn new(
        composer: Arc<Composer>,
        extractor: Arc<dyn FeatureExtractor>,
        measurer: Arc<dyn Measurer>,
        store: Arc<dyn LocalStore>,
        base: BaseParams,
        measurement_timeout: Duration,
    ) -> Self {
        Self {
            composer,
            extractor,
            measurer,
            store,
            base,
            measurement_timeout,
            build_payload: true,
        }
    }

    /// Skip serializing upload payloads, for runs without a remote store.
    pub fn without_payloads(mut self) -> Self {
        self.build_payload = false;
        self
    }

    /// Runs one task against `view`.
    pub async fn run_task(&self, worker_id: usize, task_index: u64, mut view: DetectorView) -> BatchResult {
        let started = Instant::now();
        let seed = task_seed(self.base.seed, task_index, worker_id);
        let mut result = BatchResult::new(worker_id, task_index, seed);

        if let Err(e) = self.execute(&mut result, &mut view).await {
            warn!(worker_id, task_index, error = %e, "Worker task failed");
            result.success = false;
            result.error = Some(e.to_string());
        }

        result.session_hashes = view.into_session_hashes();
        result.duration = started.elapsed();
        result.timestamp = Utc::now();
        result
    }

    async fn execute(&self, result: &mut BatchResult, view: &mut DetectorView) -> Result<(), TaskError> {
        let composition = self.compose(result.seed).await?;
        let circuit = &composition.circuit;
        result.generators = composition.merged.clone();
        result.width = circuit.width();
        result.depth = circuit.depth();
        result.size = circuit.size();

        let outcome = view.check(circuit);
        result.is_duplicate = outcome.is_duplicate;
        result.hash = Some(outcome.hash.clone());
        if outcome.is_duplicate {
            debug!(worker_id = result.worker_id, hash = %outcome.hash, "Duplicate circuit skipped");
            result.success = true;
            return Ok(());
        }

        let features = self.extract(circuit);
        let measurements = self.measure(circuit).await;
        result.features_count = features.len();

        let meta = ArtifactMeta {
            hash: &outcome.hash.digest,
            hash_method: outcome.hash.method.to_string(),
            name: circuit.name(),
            n_qubits: circuit.width(),
            n_clbits: circuit.secondary_width(),
            depth: result.depth,
            size: result.size,
            generators: &composition.merged,
            selected: &composition.selected,
            dropped_steps: composition.dropped.len(),
            seed: result.seed,
            worker_id: result.worker_id,
            timestamp: Utc::now().to_rfc3339(),
            features: &features,
            measurements: &measurements,
        };
        let fields = serde_json::to_value(&meta)?;

        let stored = self.store.store(&outcome.hash.digest, circuit, &fields).await?;
        result.written = stored.written;
        if stored.written && self.build_payload {
            result.payload = Some(UploadPayload {
                bytes: serde_json::to_vec(circuit)?,
                fields,
            });
        }
        result.success = true;
        Ok(())
    }

    /// Selection and construction are CPU-bound; keep them off the runtime.
    async fn compose(&self, seed: u64) -> Result<Composition, TaskError> {
        let composer = Arc::clone(&self.composer);
        let base = self.base.with_seed(seed);
        tokio::task::spawn_blocking(move || {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            composer.generate(&base, &mut rng)
        })
        .await
        .map_err(|e| TaskError::Compose(e.to_string()))
    }

    fn extract(&self, circuit: &Circuit) -> FeatureMap {
        match self.extractor.extract(circuit) {
            Ok(features) => features,
            Err(e) => {
                warn!(error = %e, "Feature extraction failed");
                let mut features = FeatureMap::new();
                features.insert("static".to_string(), unavailable(e.to_string()));
                features
            }
        }
    }

    async fn measure(&self, circuit: &Circuit) -> FeatureMap {
        let timeout = self.measurement_timeout;
        if timeout.is_zero() {
            return self.measurer.unavailable_all("measurement disabled");
        }
        match tokio::time::timeout(timeout, self.measurer.measure(circuit, timeout)).await {
            Ok(Ok(measurements)) => measurements,
            Ok(Err(e)) => {
                warn!(error = %e, "Measurement failed");
                self.measurer.unavailable_all(&e.to_string())
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Measurement timed out");
                self.measurer
                    .unavailable_all(&format!("timed out after {}s", timeout.as_secs()))
            }
        }
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("base", &self.base)
            .field("measurement_timeout", &self.measurement_timeout)
            .field("build_payload", &self.build_payload)
            .finish_non_exhaustive()
    }
}

/// Summary fields used in log lines.
pub fn summarize(result: &BatchResult) -> Value {
    json!({
        "worker_id": result.worker_id,
        "task_index": result.task_index,
        "success": result.success,
        "duplicate": result.is_duplicate,
        "written": result.written,
        "hash": result.digest(),
        "error": result.error,
    })
}
