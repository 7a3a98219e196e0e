//! Measurement collaborator.
//!
//! Runs a circuit against one or more numeric backends and reports a value map
//! per backend. The worker caps every call with the configured timeout.

use std::time::Duration;

use async_trait::async_trait;

use super::{unavailable, FeatureMap};
use crate::circuit::Circuit;
use crate::error::CollaboratorError;

/// Backend names reported by the built-in measurer.
pub const SIMULATION_METHODS: [&str; 6] = [
    "statevector",
    "matrix_product_state",
    "unitary",
    "density_matrix",
    "stabilizer",
    "extended_stabilizer",
];

#[async_trait]
pub trait Measurer: Send + Sync {
    /// Backends this measurer reports on.
    fn backends(&self) -> Vec<String>;

    /// Measures `circuit`. Implementations should respect `timeout` but the
    /// caller enforces it regardless.
    async fn measure(&self, circuit: &Circuit, timeout: Duration) -> Result<FeatureMap, CollaboratorError>;

    /// A result with every backend marked unavailable.
    fn unavailable_all(&self, reason: &str) -> FeatureMap {
        self.backends()
            .into_iter()
            .map(|backend| (backend, unavailable(reason)))
            .collect()
    }
}

/// Reports every backend as unavailable. Used when no numeric backend is
/// attached to the pipeline.
#[derive(Debug, Clone)]
pub struct DisabledMeasurer {
    backends: Vec<String>,
}

impl Default for DisabledMeasurer {
    fn default() -> Self {
        Self {
            backends: SIMULATION_METHODS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl DisabledMeasurer {
    pub fn new(backends: Vec<String>) -> Self {
        Self { backends }
    }
}

#[async_trait]
impl Measurer for DisabledMeasurer {
    fn backends(&self) -> Vec<String> {
        self.backends.clone()
    }

    async fn measure(&self, _circuit: &Circuit, _timeout: Duration) -> Result<FeatureMap, CollaboratorError> {
        Ok(self.unavailable_all("no measurement backend configured"))
    }
}
