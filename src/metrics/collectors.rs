//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library users that never export metrics pay nothing.

use super::prometheus::{
    ARTIFACTS_TOTAL, BATCHES_TOTAL, BATCH_DURATION, CLEANUP_DELETED, DETECTOR_HASHES,
    HOST_RESOURCES, UPLOADS_TOTAL, UPLOAD_BUFFER_DEPTH,
};
use super::system::ResourceSnapshot;
use crate::dedup::DetectorStats;

/// Outcome label for a finished worker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Stored locally for the first time.
    New,
    /// Rejected by the duplicate check.
    Duplicate,
    /// Passed the check but was already on disk.
    Existing,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Duplicate => "duplicate",
            TaskStatus::Existing => "existing",
            TaskStatus::Failed => "failed",
        }
    }
}

/// Outcome label for an upload attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    Rejected,
    Aborted,
}

impl UploadOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadOutcome::Uploaded => "uploaded",
            UploadOutcome::Rejected => "rejected",
            UploadOutcome::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_task(&self, status: TaskStatus) {
        if let Some(artifacts) = ARTIFACTS_TOTAL.get() {
            artifacts.with_label_values(&[status.as_str()]).inc();
        }
        tracing::trace!(status = status.as_str(), "Recorded task metric");
    }

    pub fn record_uploads(&self, outcome: UploadOutcome, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(uploads) = UPLOADS_TOTAL.get() {
            uploads
                .with_label_values(&[outcome.as_str()])
                .inc_by(count as f64);
        }
    }

    pub fn record_batch(&self, duration_secs: f64) {
        if let Some(histogram) = BATCH_DURATION.get() {
            histogram.observe(duration_secs);
        }
        if let Some(batches) = BATCHES_TOTAL.get() {
            batches.inc();
        }
    }

    pub fn update_detector(&self, stats: &DetectorStats) {
        if let Some(gauge) = DETECTOR_HASHES.get() {
            gauge
                .with_label_values(&["confirmed"])
                .set(stats.confirmed as f64);
            gauge.with_label_values(&["pending"]).set(stats.pending as f64);
            gauge.with_label_values(&["session"]).set(stats.session as f64);
        }
    }

    pub fn update_upload_buffer(&self, depth: usize) {
        if let Some(gauge) = UPLOAD_BUFFER_DEPTH.get() {
            gauge.set(depth as f64);
        }
    }

    pub fn record_cleanup(&self, deleted: usize) {
        if let Some(counter) = CLEANUP_DELETED.get() {
            counter.inc_by(deleted as u64);
        }
    }

    pub fn update_resources(&self, snapshot: &ResourceSnapshot) {
        if let Some(gauge) = HOST_RESOURCES.get() {
            gauge
                .with_label_values(&["cpu_percent"])
                .set(f64::from(snapshot.cpu_percent));
            gauge
                .with_label_values(&["memory_percent"])
                .set(snapshot.memory_percent);
            gauge
                .with_label_values(&["memory_available_bytes"])
                .set(snapshot.memory_available_gb * 1024.0 * 1024.0 * 1024.0);
            if let Some(free) = snapshot.disk_free_gb {
                gauge
                    .with_label_values(&["disk_free_bytes"])
                    .set(free * 1024.0 * 1024.0 * 1024.0);
            }
        }
    }
}
