//! Adaptive hierarchical composer.
//!
//! Selects a sequence of construction kinds with the self-adjusting
//! probability model, builds each one, and merges the survivors into a
//! single composite circuit. Failing steps are dropped and reported; they
//! never abort a composition.

pub mod merge;
pub mod probability;
pub mod rules;

use std::sync::Arc;

use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::circuit::Circuit;
use crate::error::StepError;
use crate::generators::{BaseParams, GeneratorId, GeneratorRegistry};

pub use merge::{merge, BuiltStep, Merged};
pub use probability::{select, ProbabilityVector};
pub use rules::{CategoryRule, RuleTable, SynergyRule, DEFAULT_DAMPENING};

/// Default probability of stopping before each step after the first.
pub const DEFAULT_STOPPING_PROB: f64 = 0.3;

/// Default upper bound on the number of steps per composition.
pub const DEFAULT_MAX_STEPS: usize = 5;

/// A construction or merge step that was dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: usize,
    pub generator: GeneratorId,
    pub reason: String,
}

/// Output of one composition.
#[derive(Debug, Clone)]
pub struct Composition {
    pub circuit: Circuit,
    /// Every selected kind, in selection order.
    pub selected: Vec<GeneratorId>,
    /// Kinds whose circuits ended up in the composite.
    pub merged: Vec<GeneratorId>,
    pub dropped: Vec<StepFailure>,
}

#[derive(Debug, Clone)]
pub struct Composer {
    registry: Arc<GeneratorRegistry>,
    rules: Arc<RuleTable>,
    stopping_prob: f64,
    max_steps: usize,
    initial_weights: Option<Vec<f64>>,
}

impl Composer {
    pub fn new(registry: Arc<GeneratorRegistry>, rules: Arc<RuleTable>) -> Self {
        Self {
            registry,
            rules,
            stopping_prob: DEFAULT_STOPPING_PROB,
            max_steps: DEFAULT_MAX_STEPS,
            initial_weights: None,
        }
    }

    pub fn with_stopping_prob(mut self, stopping_prob: f64) -> Self {
        self.stopping_prob = stopping_prob;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Starting weights, index-aligned with the registry.
    pub fn with_initial_weights(mut self, weights: Vec<f64>) -> Self {
        self.initial_weights = Some(weights);
        self
    }

    pub fn registry(&self) -> &GeneratorRegistry {
        &self.registry
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    /// Draws a selection with the probability model.
    pub fn select(&self, rng: &mut ChaCha8Rng) -> Vec<GeneratorId> {
        select(
            &self.registry,
            &self.rules,
            self.initial_weights.as_deref(),
            self.stopping_prob,
            self.max_steps,
            rng,
        )
    }

    /// Builds one step: parameter derivation then build.
    fn build_step(
        &self,
        generator: GeneratorId,
        base: &BaseParams,
        rng: &mut ChaCha8Rng,
    ) -> Result<Circuit, StepError> {
        let entry = self
            .registry
            .get(generator)
            .ok_or(StepError::NotRegistered(generator))?;
        let params = entry.builder.derive_parameters(base, rng)?;
        entry.builder.build(&params)
    }

    /// Builds and merges `selection`.
    ///
    /// Deterministic for a given selection, `base` and RNG state.
    pub fn compose(
        &self,
        selection: &[GeneratorId],
        base: &BaseParams,
        rng: &mut ChaCha8Rng,
    ) -> Composition {
        let mut built = Vec::with_capacity(selection.len());
        let mut dropped = Vec::new();

        for (step, &generator) in selection.iter().enumerate() {
            match self.build_step(generator, base, rng) {
                Ok(circuit) => built.push(BuiltStep {
                    step,
                    generator,
                    circuit,
                }),
                Err(e) => {
                    warn!(step, generator = %generator, error = %e, "Dropping construction step");
                    dropped.push(StepFailure {
                        step,
                        generator,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let Merged {
            circuit,
            merged,
            failures,
        } = merge(built);
        dropped.extend(failures);
        dropped.sort_by_key(|f| f.step);

        debug!(
            selected = selection.len(),
            merged = merged.len(),
            dropped = dropped.len(),
            width = circuit.width(),
            depth = circuit.depth(),
            "Composition complete"
        );

        Composition {
            circuit,
            selected: selection.to_vec(),
            merged,
            dropped,
        }
    }

    /// Selects then composes.
    pub fn generate(&self, base: &BaseParams, rng: &mut ChaCha8Rng) -> Composition {
        let selection = self.select(rng);
        self.compose(&selection, base, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Instruction, Param};
    use crate::generators::{Category, CircuitBuilder, ParamSet};
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    /// Builds a fixed-width variational layer.
    struct FixedWidth(usize);

    impl CircuitBuilder for FixedWidth {
        fn derive_parameters(
            &self,
            base: &BaseParams,
            _rng: &mut ChaCha8Rng,
        ) -> Result<ParamSet, StepError> {
            Ok(ParamSet {
                width: self.0,
                depth: 1,
                reps: 1,
                measure: base.measure,
                seed: 0,
                values: BTreeMap::new(),
            })
        }

        fn build(&self, params: &ParamSet) -> Result<Circuit, StepError> {
            let mut c = Circuit::new("fixed", params.width, 0);
            for q in 0..params.width {
                c.push(Instruction::new("ry", vec![q]).with_params(vec![Param::symbol("theta")]))?;
            }
            Ok(c)
        }
    }

    struct AlwaysFails;

    impl CircuitBuilder for AlwaysFails {
        fn derive_parameters(
            &self,
            _base: &BaseParams,
            _rng: &mut ChaCha8Rng,
        ) -> Result<ParamSet, StepError> {
            Err(StepError::Parameters {
                generator: GeneratorId::Qaoa,
                reason: "no graph".to_string(),
            })
        }

        fn build(&self, _params: &ParamSet) -> Result<Circuit, StepError> {
            unreachable!()
        }
    }

    /// Produces a circuit whose instructions reference slots it does not have.
    struct Malformed;

    impl CircuitBuilder for Malformed {
        fn derive_parameters(
            &self,
            _base: &BaseParams,
            _rng: &mut ChaCha8Rng,
        ) -> Result<ParamSet, StepError> {
            Ok(ParamSet {
                width: 1,
                depth: 1,
                reps: 1,
                measure: false,
                seed: 0,
                values: BTreeMap::new(),
            })
        }

        fn build(&self, _params: &ParamSet) -> Result<Circuit, StepError> {
            let circuit = serde_json::from_value(serde_json::json!({
                "name": "malformed",
                "width": 1,
                "secondary_width": 0,
                "instructions": [{"op": "cx", "targets": [0, 3]}]
            }))
            .map_err(|e| StepError::Build {
                generator: GeneratorId::Qpe,
                reason: e.to_string(),
            })?;
            Ok(circuit)
        }
    }

    fn shared(builder: impl CircuitBuilder + 'static) -> Arc<dyn CircuitBuilder> {
        Arc::new(builder)
    }

    fn composer(entries: Vec<(GeneratorId, Arc<dyn CircuitBuilder>)>) -> Composer {
        let mut registry = GeneratorRegistry::new();
        for (id, builder) in entries {
            registry.register(id, Category::Neutral, builder).unwrap();
        }
        Composer::new(Arc::new(registry), Arc::new(RuleTable::empty()))
    }

    #[test]
    fn test_compose_widths_three_and_five() {
        let composer = composer(vec![
            (GeneratorId::Ghz, shared(FixedWidth(3))),
            (GeneratorId::Qft, shared(FixedWidth(5))),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let composition = composer.compose(
            &[GeneratorId::Ghz, GeneratorId::Qft],
            &BaseParams::default(),
            &mut rng,
        );
        let circuit = &composition.circuit;
        assert_eq!(circuit.width(), 5);
        assert_eq!(circuit.separator_count(), 1);
        let symbols: Vec<_> = circuit.free_symbols().into_iter().collect();
        assert_eq!(symbols, vec!["theta_s0".to_string(), "theta_s1".to_string()]);
        assert!(composition.dropped.is_empty());
    }

    #[test]
    fn test_failing_step_is_dropped() {
        let composer = composer(vec![
            (GeneratorId::Ghz, shared(FixedWidth(2))),
            (GeneratorId::Qaoa, shared(AlwaysFails)),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let composition = composer.compose(
            &[GeneratorId::Qaoa, GeneratorId::Ghz, GeneratorId::Qaoa],
            &BaseParams::default(),
            &mut rng,
        );
        assert_eq!(composition.merged, vec![GeneratorId::Ghz]);
        assert_eq!(composition.dropped.len(), 2);
        assert_eq!(composition.circuit.separator_count(), 0);
        assert_eq!(composition.circuit.name(), "Hierarchical_1gens");
    }

    #[test]
    fn test_splice_failure_is_skipped() {
        let composer = composer(vec![
            (GeneratorId::Ghz, shared(FixedWidth(2))),
            (GeneratorId::Qpe, shared(Malformed)),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let composition = composer.compose(
            &[GeneratorId::Ghz, GeneratorId::Qpe, GeneratorId::Ghz],
            &BaseParams::default(),
            &mut rng,
        );
        assert_eq!(composition.merged, vec![GeneratorId::Ghz, GeneratorId::Ghz]);
        assert_eq!(composition.dropped.len(), 1);
        assert_eq!(composition.dropped[0].step, 1);
        assert_eq!(composition.circuit.separator_count(), 1);
    }

    #[test]
    fn test_unregistered_generator_is_dropped() {
        let composer = composer(vec![(GeneratorId::Ghz, shared(FixedWidth(2)))]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let composition = composer.compose(&[GeneratorId::Vqe], &BaseParams::default(), &mut rng);
        assert!(composition.circuit.is_empty());
        assert!(composition.dropped[0].reason.contains("not registered"));
    }

    #[test]
    fn test_max_steps_zero_gives_empty_composite() {
        let composer = Composer::new(
            Arc::new(GeneratorRegistry::with_default_templates()),
            Arc::new(RuleTable::default()),
        )
        .with_max_steps(0);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let composition = composer.generate(&BaseParams::default(), &mut rng);
        assert!(composition.selected.is_empty());
        assert!(composition.circuit.is_empty());
        assert_eq!(composition.circuit.width(), 0);
    }

    #[test]
    fn test_generate_is_deterministic() {
        let composer = Composer::new(
            Arc::new(GeneratorRegistry::with_default_templates()),
            Arc::new(RuleTable::default()),
        );
        let base = BaseParams {
            max_width: 6,
            max_depth: 8,
            ..BaseParams::default()
        };
        let a = composer.generate(&base, &mut ChaCha8Rng::seed_from_u64(77));
        let b = composer.generate(&base, &mut ChaCha8Rng::seed_from_u64(77));
        assert_eq!(a.selected, b.selected);
        assert_eq!(a.circuit, b.circuit);
    }
}
