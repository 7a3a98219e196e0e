//! Prometheus metrics for the generation pipeline.
//!
//! # Example
//!
//! ```ignore
//! use circuit_forge::metrics::{export_metrics, init_metrics, MetricsCollector, TaskStatus};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! MetricsCollector::new().record_task(TaskStatus::New);
//! let text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;
pub mod system;

pub use collectors::{MetricsCollector, TaskStatus, UploadOutcome};
pub use prometheus::{
    export_metrics, init_metrics, ARTIFACTS_TOTAL, BATCHES_TOTAL, BATCH_DURATION,
    CLEANUP_DELETED, DETECTOR_HASHES, HOST_RESOURCES, REGISTRY, UPLOADS_TOTAL,
    UPLOAD_BUFFER_DEPTH,
};
pub use system::{HostInfo, ResourceMonitor, ResourceSnapshot};
