//! Prometheus metrics registration and export.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all circuit_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Worker tasks, labeled by status (`new`, `duplicate`, `existing`, `failed`).
pub static ARTIFACTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Upload attempts, labeled by outcome (`uploaded`, `rejected`, `aborted`).
pub static UPLOADS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall time of one scatter/gather batch in seconds.
pub static BATCH_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Number of batches completed.
pub static BATCHES_TOTAL: OnceLock<IntCounter> = OnceLock::new();

/// Duplicate detector set sizes, labeled by state.
pub static DETECTOR_HASHES: OnceLock<GaugeVec> = OnceLock::new();

/// Results waiting in the upload buffer.
pub static UPLOAD_BUFFER_DEPTH: OnceLock<Gauge> = OnceLock::new();

/// Artifact directories removed by cleanup.
pub static CLEANUP_DELETED: OnceLock<IntCounter> = OnceLock::new();

/// Host usage sampled after each batch, labeled by resource
/// (`cpu_percent`, `memory_percent`, `memory_available_bytes`, `disk_free_bytes`).
pub static HOST_RESOURCES: OnceLock<GaugeVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling it more than once is harmless; later calls leave the first
/// registration in place.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let artifacts_total = CounterVec::new(
        Opts::new("circuit_forge_artifacts_total", "Worker tasks by outcome"),
        &["status"],
    )?;

    let uploads_total = CounterVec::new(
        Opts::new("circuit_forge_uploads_total", "Upload attempts by outcome"),
        &["outcome"],
    )?;

    let batch_duration = Histogram::with_opts(
        HistogramOpts::new(
            "circuit_forge_batch_duration_seconds",
            "Scatter/gather batch duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
    )?;

    let batches_total = IntCounter::new("circuit_forge_batches_total", "Batches completed")?;

    let detector_hashes = GaugeVec::new(
        Opts::new("circuit_forge_detector_hashes", "Known hashes by state"),
        &["state"],
    )?;

    let upload_buffer_depth = Gauge::new(
        "circuit_forge_upload_buffer_depth",
        "Results waiting for upload",
    )?;

    let cleanup_deleted = IntCounter::new(
        "circuit_forge_cleanup_deleted_total",
        "Local artifact directories removed by cleanup",
    )?;

    let host_resources = GaugeVec::new(
        Opts::new("circuit_forge_host_resources", "Host resource usage"),
        &["resource"],
    )?;

    registry.register(Box::new(artifacts_total.clone()))?;
    registry.register(Box::new(uploads_total.clone()))?;
    registry.register(Box::new(batch_duration.clone()))?;
    registry.register(Box::new(batches_total.clone()))?;
    registry.register(Box::new(detector_hashes.clone()))?;
    registry.register(Box::new(upload_buffer_depth.clone()))?;
    registry.register(Box::new(cleanup_deleted.clone()))?;
    registry.register(Box::new(host_resources.clone()))?;

    // Losing a race here means another caller already initialized.
    let _ = REGISTRY.set(registry);
    let _ = ARTIFACTS_TOTAL.set(artifacts_total);
    let _ = UPLOADS_TOTAL.set(uploads_total);
    let _ = BATCH_DURATION.set(batch_duration);
    let _ = BATCHES_TOTAL.set(batches_total);
    let _ = DETECTOR_HASHES.set(detector_hashes);
    let _ = UPLOAD_BUFFER_DEPTH.set(upload_buffer_depth);
    let _ = CLEANUP_DELETED.set(cleanup_deleted);
    let _ = HOST_RESOURCES.set(host_resources);

    tracing::debug!("Prometheus metrics initialized");
    Ok(())
}

/// Export all registered metrics in Prometheus text format.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
