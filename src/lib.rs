//! circuit-forge: synthetic quantum circuit corpus generator.
//!
//! Composes circuits from a registry of construction kinds, rejects
//! duplicates by content hash, stores new circuits locally and uploads them
//! to a remote store.

pub mod circuit;
pub mod cli;
pub mod composer;
pub mod dedup;
pub mod error;
pub mod features;
pub mod generators;
pub mod metrics;
pub mod pipeline;
pub mod remote;
pub mod storage;

// Re-export commonly used error types
pub use error::{CircuitError, CollaboratorError, RegistryError, RuleError, StepError};
