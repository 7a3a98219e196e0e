//! Generator registry.
//!
//! Every construction kind is identified by a stable [`GeneratorId`] and
//! exposes two fallible operations through [`CircuitBuilder`]: parameter
//! derivation from the run's [`BaseParams`], and a deterministic build from
//! the derived [`ParamSet`].
//!
//! The registry keeps entries in registration order. That order is the
//! index order of the probability vector used by the composer.

pub mod templates;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::circuit::Circuit;
use crate::error::{RegistryError, StepError};

pub use templates::Template;

/// Stable identifier for a construction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorId {
    // State preparation
    Ghz,
    WState,
    GraphState,
    RandomCircuit,
    EfficientSu2,
    RealAmplitudes,
    TwoLocal,
    // Algorithms
    AmplitudeEstimation,
    DeutschJozsa,
    GroverNoAncilla,
    GroverVChain,
    Qaoa,
    Qft,
    Qnn,
    QuantumWalk,
    Qpe,
    Vqe,
}

impl GeneratorId {
    /// All ids in default registration order.
    pub const ALL: [GeneratorId; 17] = [
        GeneratorId::Ghz,
        GeneratorId::WState,
        GeneratorId::GraphState,
        GeneratorId::RandomCircuit,
        GeneratorId::EfficientSu2,
        GeneratorId::RealAmplitudes,
        GeneratorId::TwoLocal,
        GeneratorId::AmplitudeEstimation,
        GeneratorId::DeutschJozsa,
        GeneratorId::GroverNoAncilla,
        GeneratorId::GroverVChain,
        GeneratorId::Qaoa,
        GeneratorId::Qft,
        GeneratorId::Qnn,
        GeneratorId::QuantumWalk,
        GeneratorId::Qpe,
        GeneratorId::Vqe,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GeneratorId::Ghz => "ghz",
            GeneratorId::WState => "w_state",
            GeneratorId::GraphState => "graph_state",
            GeneratorId::RandomCircuit => "random_circuit",
            GeneratorId::EfficientSu2 => "efficient_su2",
            GeneratorId::RealAmplitudes => "real_amplitudes",
            GeneratorId::TwoLocal => "two_local",
            GeneratorId::AmplitudeEstimation => "amplitude_estimation",
            GeneratorId::DeutschJozsa => "deutsch_jozsa",
            GeneratorId::GroverNoAncilla => "grover_no_ancilla",
            GeneratorId::GroverVChain => "grover_v_chain",
            GeneratorId::Qaoa => "qaoa",
            GeneratorId::Qft => "qft",
            GeneratorId::Qnn => "qnn",
            GeneratorId::QuantumWalk => "quantum_walk",
            GeneratorId::Qpe => "qpe",
            GeneratorId::Vqe => "vqe",
        }
    }

    /// Category used when the registry entry does not override it.
    pub fn default_category(&self) -> Category {
        match self {
            GeneratorId::Ghz
            | GeneratorId::WState
            | GeneratorId::GraphState
            | GeneratorId::RandomCircuit
            | GeneratorId::EfficientSu2
            | GeneratorId::RealAmplitudes
            | GeneratorId::TwoLocal => Category::StatePrep,
            _ => Category::Algorithm,
        }
    }
}

impl fmt::Display for GeneratorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GeneratorId {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        GeneratorId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| RegistryError::Unknown(s.to_string()))
    }
}

/// Coarse tag used only by the probability model's category rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    StatePrep,
    Algorithm,
    /// Not touched by category rules.
    Neutral,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::StatePrep => write!(f, "state_prep"),
            Category::Algorithm => write!(f, "algorithm"),
            Category::Neutral => write!(f, "neutral"),
        }
    }
}

/// Bounds shared by every construction step of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseParams {
    pub min_width: usize,
    pub max_width: usize,
    pub min_depth: usize,
    pub max_depth: usize,
    pub min_reps: usize,
    pub max_reps: usize,
    pub seed: u64,
    pub measure: bool,
}

impl Default for BaseParams {
    fn default() -> Self {
        Self {
            min_width: 1,
            max_width: 30,
            min_depth: 1,
            max_depth: 200,
            min_reps: 1,
            max_reps: 3,
            seed: 5_000_000,
            measure: false,
        }
    }
}

impl BaseParams {
    /// Returns a copy with a different seed.
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }
}

/// Parameters derived for one construction step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    pub width: usize,
    pub depth: usize,
    pub reps: usize,
    pub measure: bool,
    /// Seed for any randomness inside `build`.
    pub seed: u64,
    /// Kind-specific numeric values (angles, phases, probabilities).
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

/// A construction kind.
///
/// `build` must be deterministic for a given [`ParamSet`].
pub trait CircuitBuilder: Send + Sync {
    fn derive_parameters(
        &self,
        base: &BaseParams,
        rng: &mut ChaCha8Rng,
    ) -> Result<ParamSet, StepError>;

    fn build(&self, params: &ParamSet) -> Result<Circuit, StepError>;
}

/// One registry entry.
#[derive(Clone)]
pub struct RegistryEntry {
    pub id: GeneratorId,
    pub category: Category,
    pub builder: Arc<dyn CircuitBuilder>,
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("id", &self.id)
            .field("category", &self.category)
            .finish()
    }
}

/// Ordered set of construction kinds.
#[derive(Debug, Clone, Default)]
pub struct GeneratorRegistry {
    entries: Vec<RegistryEntry>,
}

impl GeneratorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every kind with its structural template and default category.
    pub fn with_default_templates() -> Self {
        let entries = GeneratorId::ALL
            .iter()
            .map(|&id| RegistryEntry {
                id,
                category: id.default_category(),
                builder: Arc::new(Template::new(id)),
            })
            .collect();
        Self { entries }
    }

    /// Appends an entry. Ids must be unique.
    pub fn register(
        &mut self,
        id: GeneratorId,
        category: Category,
        builder: Arc<dyn CircuitBuilder>,
    ) -> Result<(), RegistryError> {
        if self.index_of(id).is_some() {
            return Err(RegistryError::Duplicate(id));
        }
        self.entries.push(RegistryEntry {
            id,
            category,
            builder,
        });
        Ok(())
    }

    /// Builder-style registration.
    pub fn with_entry(
        mut self,
        id: GeneratorId,
        category: Category,
        builder: Arc<dyn CircuitBuilder>,
    ) -> Result<Self, RegistryError> {
        self.register(id, category, builder)?;
        Ok(self)
    }

    /// Keeps only the listed ids, preserving registry order.
    pub fn restricted_to(&self, ids: &[GeneratorId]) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|e| ids.contains(&e.id))
                .cloned()
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn ids(&self) -> Vec<GeneratorId> {
        self.entries.iter().map(|e| e.id).collect()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.entries.iter().map(|e| e.category).collect()
    }

    pub fn index_of(&self, id: GeneratorId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub fn get(&self, id: GeneratorId) -> Option<&RegistryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }
}
