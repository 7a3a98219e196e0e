//! Batch generation pipeline.
//!
//! # Architecture
//!
//! - **Manager**: owns the duplicate detector, runs the scatter/gather batch
//!   loop and the upload buffer
//! - **Worker**: one task per slot; compose, check, describe, store
//! - **Upload**: drains the buffer to the remote store
//! - **Config**: sizing, bounds and paths
//!
//! # Pipeline Flow
//!
//! 1. **Initialize**: load the hash cache, sync with the remote store if needed
//! 2. **Scatter**: submit `batch_size` tasks, at most `num_workers` running
//! 3. **Gather**: wait for every task in the batch
//! 4. **Fold**: update statistics, merge session hashes, buffer new artifacts
//! 5. **Upload**: drain the buffer once it reaches the threshold
//! 6. **Cleanup**: periodically drop old local artifacts
//! 7. **Drain**: on shutdown, flush the buffer and persist the cache
//!
//! # Example
//!
//! ```rust,ignore
//! use circuit_forge::pipeline::{PipelineConfig, PipelineManager};
//!
//! let config = PipelineConfig::new()
//!     .with_num_workers(4)
//!     .with_batch_size(16)
//!     .with_max_iterations(10);
//!
//! let mut manager = PipelineManager::from_config(config)?;
//! let stats = manager.run().await?;
//! println!("{} processed, {} uploaded", stats.processed, stats.uploaded);
//! ```

pub mod config;
pub mod manager;
pub mod upload;
pub mod worker;

pub use config::{ConfigError, PipelineConfig};
pub use manager::{
    BatchSummary, PipelineError, PipelineManager, PipelineState, PipelineStats, ShutdownHandle,
};
pub use upload::{UploadCoordinator, UploadReport};
pub use worker::{task_seed, BatchResult, UploadPayload, WorkerContext};
