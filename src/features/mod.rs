//! Feature extraction and measurement collaborators.
//!
//! Both are best effort. A failure never fails the task; the affected fields
//! are filled with an [`unavailable`] marker instead.

pub mod measure;

use std::collections::BTreeSet;

use serde_json::{json, Map, Value};

use crate::circuit::Circuit;
use crate::error::CollaboratorError;

pub use measure::{DisabledMeasurer, Measurer, SIMULATION_METHODS};

/// Named feature values.
pub type FeatureMap = Map<String, Value>;

/// Marker stored in place of a value that could not be computed.
pub fn unavailable(reason: impl Into<String>) -> Value {
    json!({ "status": "unavailable", "reason": reason.into() })
}

/// Returns true if `value` is an [`unavailable`] marker.
pub fn is_unavailable(value: &Value) -> bool {
    value.get("status").and_then(Value::as_str) == Some("unavailable")
}

pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, circuit: &Circuit) -> Result<FeatureMap, CollaboratorError>;
}

/// Structural features computed from the instruction list.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticFeatureExtractor;

impl FeatureExtractor for StaticFeatureExtractor {
    fn extract(&self, circuit: &Circuit) -> Result<FeatureMap, CollaboratorError> {
        let histogram = circuit.op_histogram();
        let count = |op: &str| histogram.get(op).copied().unwrap_or(0);

        let mut two_slot = 0usize;
        let mut multi_slot = 0usize;
        let mut edges = BTreeSet::new();
        for instruction in circuit.instructions().iter().filter(|i| !i.is_separator()) {
            match instruction.targets.len() {
                0 | 1 => {}
                2 => two_slot += 1,
                _ => multi_slot += 1,
            }
            for (i, &a) in instruction.targets.iter().enumerate() {
                for &b in &instruction.targets[i + 1..] {
                    edges.insert((a.min(b), a.max(b)));
                }
            }
        }

        let mut degrees = vec![0usize; circuit.width()];
        for &(a, b) in &edges {
            if let Some(d) = degrees.get_mut(a) {
                *d += 1;
            }
            if let Some(d) = degrees.get_mut(b) {
                *d += 1;
            }
        }
        let max_degree = degrees.iter().copied().max().unwrap_or(0);

        let mut features = FeatureMap::new();
        features.insert("n_qubits".into(), json!(circuit.width()));
        features.insert("n_clbits".into(), json!(circuit.secondary_width()));
        features.insert("depth".into(), json!(circuit.depth()));
        features.insert("size".into(), json!(circuit.size()));
        features.insert("separators".into(), json!(circuit.separator_count()));
        features.insert("two_qubit_gates".into(), json!(two_slot));
        features.insert("multi_qubit_gates".into(), json!(multi_slot));
        features.insert("t_count".into(), json!(count("t")));
        features.insert("h_count".into(), json!(count("h")));
        features.insert("parameters".into(), json!(circuit.param_count()));
        features.insert("free_parameters".into(), json!(circuit.free_symbols().len()));
        features.insert("interaction_edges".into(), json!(edges.len()));
        features.insert("max_degree".into(), json!(max_degree));
        features.insert("ops".into(), json!(histogram));
        Ok(features)
    }
}
