//! Error types for circuit-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Construction steps (parameter derivation and template builds)
//! - Circuit manipulation (instruction pushes and splices)
//! - Generator registry setup
//! - Rule table loading and validation
//! - Best-effort collaborators (feature extraction, measurement)
//!
//! Subsystem-local errors (cache, remote store, local storage, configuration,
//! pipeline) live next to the code that raises them.

use thiserror::Error;

use crate::generators::GeneratorId;

/// Errors raised by a single construction step.
///
/// A failing step is dropped by the composer; it never aborts a composition.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Parameter derivation failed for '{generator}': {reason}")]
    Parameters { generator: GeneratorId, reason: String },

    #[error("Build failed for '{generator}': {reason}")]
    Build { generator: GeneratorId, reason: String },

    #[error("Generator '{0}' is not registered")]
    NotRegistered(GeneratorId),

    #[error("Circuit error: {0}")]
    Circuit(#[from] CircuitError),
}

/// Errors that can occur while building or merging circuits.
#[derive(Debug, Error)]
pub enum CircuitError {
    #[error("Instruction '{op}' references primary slot {slot} but the circuit has {width}")]
    SlotOutOfRange { op: String, slot: usize, width: usize },

    #[error("Instruction '{op}' references secondary slot {slot} but the circuit has {width}")]
    SecondaryOutOfRange { op: String, slot: usize, width: usize },

    #[error("Instruction '{op}' repeats slot {slot}")]
    RepeatedSlot { op: String, slot: usize },

    #[error("Splice of '{name}' failed: {reason}")]
    Splice { name: String, reason: String },
}

/// Errors that can occur while populating the generator registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Generator '{0}' is already registered")]
    Duplicate(GeneratorId),

    #[error("Registry is empty")]
    Empty,

    #[error("Unknown generator '{0}'")]
    Unknown(String),
}

/// Errors that can occur while loading or validating a rule table.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("Invalid multiplier {multiplier} for rule triggered by '{trigger}': must be finite and > 0")]
    InvalidMultiplier { trigger: String, multiplier: f64 },

    #[error("Rule has no triggers")]
    NoTriggers,

    #[error("Rule triggered by '{0}' has no targets")]
    NoTargets(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors reported by best-effort collaborators.
///
/// The worker turns these into `Unavailable` markers instead of failing the task.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Feature extraction failed: {0}")]
    Extraction(String),

    #[error("Measurement on '{backend}' failed: {reason}")]
    Measurement { backend: String, reason: String },

    #[error("Measurement timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_error_display() {
        let err = StepError::Build {
            generator: GeneratorId::Qft,
            reason: "width too small".to_string(),
        };
        assert!(err.to_string().contains("qft"));
        assert!(err.to_string().contains("width too small"));
    }

    #[test]
    fn test_rule_error_display() {
        let err = RuleError::InvalidMultiplier {
            trigger: "ghz".to_string(),
            multiplier: -1.0,
        };
        assert!(err.to_string().contains("ghz"));
        assert!(err.to_string().contains("-1"));
    }

    #[test]
    fn test_circuit_error_from() {
        let err: StepError = CircuitError::SlotOutOfRange {
            op: "cx".to_string(),
            slot: 4,
            width: 3,
        }
        .into();
        assert!(matches!(err, StepError::Circuit(_)));
        assert!(err.to_string().contains("slot 4"));
    }
}
