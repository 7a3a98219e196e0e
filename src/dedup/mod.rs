//! Duplicate detection.
//!
//! Every content hash the pipeline has seen is in exactly one of three sets:
//!
//! - **Confirmed**: known to be in the remote store
//! - **Pending**: queued for upload
//! - **Session**: seen during this run (or returned after a failed upload)
//!
//! The sets are persisted together in one JSON cache file so that restarts do
//! not need a full remote listing.
//!
//! Duplicate suppression is exact across batches only. Workers in the same
//! batch check against the same snapshot and may each accept the same circuit.

pub mod cache;
pub mod detector;

pub use cache::{CacheContents, CacheError, CacheFile};
pub use detector::{
    CheckOutcome, DetectorStats, DetectorView, DuplicateDetector, HashRecordState, HashState,
    InitReport,
};
