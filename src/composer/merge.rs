//! Merging built circuits into one composite.

use tracing::warn;

use super::StepFailure;
use crate::circuit::Circuit;
use crate::generators::GeneratorId;

/// A circuit that survived its construction step.
#[derive(Debug, Clone)]
pub struct BuiltStep {
    /// Position in the original selection.
    pub step: usize,
    pub generator: GeneratorId,
    pub circuit: Circuit,
}

/// Result of [`merge`].
#[derive(Debug, Clone)]
pub struct Merged {
    pub circuit: Circuit,
    /// Generators whose circuits made it into the composite, in order.
    pub merged: Vec<GeneratorId>,
    pub failures: Vec<StepFailure>,
}

/// Suffix appended to every free symbol of the circuit built at `step`.
pub fn symbol_suffix(step: usize) -> String {
    format!("_s{}", step)
}

/// Merges built steps in order.
///
/// The composite is sized to the widest primary and secondary registers.
/// Every circuit after the first merged one is preceded by a separator. Free
/// symbols are suffixed with the step index. A circuit that cannot be
/// spliced is skipped and reported in `failures`.
pub fn merge(steps: Vec<BuiltStep>) -> Merged {
    if steps.is_empty() {
        return Merged {
            circuit: Circuit::empty(),
            merged: Vec::new(),
            failures: Vec::new(),
        };
    }

    let width = steps.iter().map(|s| s.circuit.width()).max().unwrap_or(0);
    let secondary = steps
        .iter()
        .map(|s| s.circuit.secondary_width())
        .max()
        .unwrap_or(0);

    let mut composite = Circuit::new("Hierarchical", width, secondary);
    let mut merged = Vec::with_capacity(steps.len());
    let mut failures = Vec::new();

    for BuiltStep {
        step,
        generator,
        mut circuit,
    } in steps
    {
        circuit.suffix_symbols(&symbol_suffix(step));
        let result = if merged.is_empty() {
            composite.splice(&circuit)
        } else {
            composite.splice_separated(&circuit)
        };
        match result {
            Ok(()) => merged.push(generator),
            Err(e) => {
                warn!(step, generator = %generator, error = %e, "Skipping circuit that failed to splice");
                failures.push(StepFailure {
                    step,
                    generator,
                    reason: e.to_string(),
                });
            }
        }
    }

    if merged.is_empty() {
        return Merged {
            circuit: Circuit::empty(),
            merged,
            failures,
        };
    }

    composite.set_name(format!("Hierarchical_{}gens", merged.len()));
    Merged {
        circuit: composite,
        merged,
        failures,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{Instruction, Param};

    fn variational(width: usize) -> Circuit {
        let mut c = Circuit::new(format!("var_{}", width), width, 0);
        for q in 0..width {
            c.push(Instruction::new("ry", vec![q]).with_params(vec![Param::symbol(format!("theta_{}", q))]))
                .unwrap();
        }
        c
    }

    #[test]
    fn test_merge_two_widths() {
        let merged = merge(vec![
            BuiltStep {
                step: 0,
                generator: GeneratorId::RealAmplitudes,
                circuit: variational(3),
            },
            BuiltStep {
                step: 1,
                generator: GeneratorId::RealAmplitudes,
                circuit: variational(5),
            },
        ]);
        let circuit = merged.circuit;
        assert_eq!(circuit.width(), 5);
        assert_eq!(circuit.separator_count(), 1);
        assert_eq!(circuit.name(), "Hierarchical_2gens");

        // 3 + 5 symbols, none colliding after the merge.
        let symbols = circuit.free_symbols();
        assert_eq!(symbols.len(), 8);
        assert!(symbols.contains("theta_0_s0"));
        assert!(symbols.contains("theta_0_s1"));
    }

    #[test]
    fn test_merge_nothing_is_empty() {
        let merged = merge(Vec::new());
        assert!(merged.circuit.is_empty());
        assert_eq!(merged.circuit.width(), 0);
    }

    #[test]
    fn test_merge_single_has_no_separator() {
        let merged = merge(vec![BuiltStep {
            step: 4,
            generator: GeneratorId::Vqe,
            circuit: variational(2),
        }]);
        assert_eq!(merged.circuit.separator_count(), 0);
        assert!(merged.circuit.free_symbols().contains("theta_1_s4"));
    }
}
