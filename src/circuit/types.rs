//! Core circuit types.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::CircuitError;

/// Operation name used for separators between merged sub-circuits.
pub const SEPARATOR_OP: &str = "barrier";

/// An instruction parameter: either a bound value or a free symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Param {
    Value(f64),
    Symbol(String),
}

impl Param {
    /// Creates a free symbolic parameter.
    pub fn symbol(name: impl Into<String>) -> Self {
        Param::Symbol(name.into())
    }

    /// Returns the symbol name if this parameter is free.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Param::Symbol(name) => Some(name),
            Param::Value(_) => None,
        }
    }
}

/// A single operation applied to primary and secondary slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Operation name (e.g. "h", "cx", "rz", "measure").
    pub op: String,
    /// Primary slots (qubits) the operation acts on.
    pub targets: Vec<usize>,
    /// Secondary slots (classical bits) the operation writes to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary: Vec<usize>,
    /// Operation parameters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

impl Instruction {
    /// Creates an instruction acting on the given primary slots.
    pub fn new(op: impl Into<String>, targets: Vec<usize>) -> Self {
        Self {
            op: op.into(),
            targets,
            secondary: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Adds parameters to the instruction.
    pub fn with_params(mut self, params: Vec<Param>) -> Self {
        self.params = params;
        self
    }

    /// Adds secondary slots to the instruction.
    pub fn with_secondary(mut self, secondary: Vec<usize>) -> Self {
        self.secondary = secondary;
        self
    }

    /// Creates a separator spanning the first `width` primary slots.
    pub fn separator(width: usize) -> Self {
        Self::new(SEPARATOR_OP, (0..width).collect())
    }

    /// Returns true if this instruction is a separator.
    pub fn is_separator(&self) -> bool {
        self.op == SEPARATOR_OP
    }
}

/// A circuit: named, sized collection of instructions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    name: String,
    width: usize,
    secondary_width: usize,
    instructions: Vec<Instruction>,
}

impl Circuit {
    /// Creates an empty circuit with the given dimensions.
    pub fn new(name: impl Into<String>, width: usize, secondary_width: usize) -> Self {
        Self {
            name: name.into(),
            width,
            secondary_width,
            instructions: Vec::new(),
        }
    }

    /// The explicitly-empty circuit returned when nothing could be composed.
    pub fn empty() -> Self {
        Self::new("Empty", 0, 0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Number of primary slots.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of secondary slots.
    pub fn secondary_width(&self) -> usize {
        self.secondary_width
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Returns true if the circuit has no slots and no instructions.
    pub fn is_empty(&self) -> bool {
        self.width == 0 && self.secondary_width == 0 && self.instructions.is_empty()
    }

    /// Number of non-separator instructions.
    pub fn size(&self) -> usize {
        self.instructions.iter().filter(|i| !i.is_separator()).count()
    }

    /// Number of separator instructions.
    pub fn separator_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_separator()).count()
    }

    /// Longest chain of non-separator instructions over any slot.
    ///
    /// Separators synchronize the slots they span without adding a layer.
    pub fn depth(&self) -> usize {
        let mut primary = vec![0usize; self.width];
        let mut secondary = vec![0usize; self.secondary_width];

        for instruction in &self.instructions {
            let level = instruction
                .targets
                .iter()
                .filter_map(|&q| primary.get(q).copied())
                .chain(
                    instruction
                        .secondary
                        .iter()
                        .filter_map(|&c| secondary.get(c).copied()),
                )
                .max()
                .unwrap_or(0);
            let next = if instruction.is_separator() {
                level
            } else {
                level + 1
            };
            for &q in &instruction.targets {
                if let Some(slot) = primary.get_mut(q) {
                    *slot = next;
                }
            }
            for &c in &instruction.secondary {
                if let Some(slot) = secondary.get_mut(c) {
                    *slot = next;
                }
            }
        }

        primary
            .into_iter()
            .chain(secondary)
            .max()
            .unwrap_or(0)
    }

    /// Appends an instruction after checking its slot references.
    pub fn push(&mut self, instruction: Instruction) -> Result<(), CircuitError> {
        self.check_instruction(&instruction)?;
        self.instructions.push(instruction);
        Ok(())
    }

    /// Appends a separator spanning every primary slot.
    pub fn push_separator(&mut self) {
        self.instructions.push(Instruction::separator(self.width));
    }

    fn check_instruction(&self, instruction: &Instruction) -> Result<(), CircuitError> {
        let mut seen = BTreeSet::new();
        for &slot in &instruction.targets {
            if slot >= self.width {
                return Err(CircuitError::SlotOutOfRange {
                    op: instruction.op.clone(),
                    slot,
                    width: self.width,
                });
            }
            if !seen.insert(slot) {
                return Err(CircuitError::RepeatedSlot {
                    op: instruction.op.clone(),
                    slot,
                });
            }
        }
        for &slot in &instruction.secondary {
            if slot >= self.secondary_width {
                return Err(CircuitError::SecondaryOutOfRange {
                    op: instruction.op.clone(),
                    slot,
                    width: self.secondary_width,
                });
            }
        }
        Ok(())
    }

    /// All free symbol names, sorted.
    pub fn free_symbols(&self) -> BTreeSet<String> {
        self.instructions
            .iter()
            .flat_map(|i| i.params.iter())
            .filter_map(|p| p.as_symbol().map(str::to_string))
            .collect()
    }

    /// Number of parameters (bound or free) across all instructions.
    pub fn param_count(&self) -> usize {
        self.instructions.iter().map(|i| i.params.len()).sum()
    }

    /// Renames every free symbol by appending `suffix`.
    pub fn suffix_symbols(&mut self, suffix: &str) {
        for instruction in &mut self.instructions {
            for param in &mut instruction.params {
                if let Param::Symbol(name) = param {
                    name.push_str(suffix);
                }
            }
        }
    }

    /// Count of instructions per operation name (separators excluded).
    pub fn op_histogram(&self) -> BTreeMap<String, usize> {
        let mut histogram = BTreeMap::new();
        for instruction in self.instructions.iter().filter(|i| !i.is_separator()) {
            *histogram.entry(instruction.op.clone()).or_insert(0) += 1;
        }
        histogram
    }

    /// Splices `other` into the leading slots of this circuit.
    ///
    /// `other`'s primary slot `i` maps to slot `i` here, for the first
    /// `min(other.width, self.width)` slots; the same holds for secondary
    /// slots. The splice is all-or-nothing: if any instruction of `other`
    /// falls outside the mapped region, nothing is appended.
    pub fn splice(&mut self, other: &Circuit) -> Result<(), CircuitError> {
        self.splice_inner(other, false)
    }

    /// Like [`splice`](Self::splice), preceded by a full-width separator.
    /// The separator is only added if the splice succeeds.
    pub fn splice_separated(&mut self, other: &Circuit) -> Result<(), CircuitError> {
        self.splice_inner(other, true)
    }

    fn splice_inner(&mut self, other: &Circuit, separated: bool) -> Result<(), CircuitError> {
        let primary_span = other.width.min(self.width);
        let secondary_span = other.secondary_width.min(self.secondary_width);

        for instruction in &other.instructions {
            if instruction.is_separator() {
                continue;
            }
            if let Some(&slot) = instruction.targets.iter().find(|&&q| q >= primary_span) {
                return Err(CircuitError::Splice {
                    name: other.name.clone(),
                    reason: format!(
                        "'{}' targets slot {} outside the spliced span of {}",
                        instruction.op, slot, primary_span
                    ),
                });
            }
            if let Some(&slot) = instruction
                .secondary
                .iter()
                .find(|&&c| c >= secondary_span)
            {
                return Err(CircuitError::Splice {
                    name: other.name.clone(),
                    reason: format!(
                        "'{}' writes secondary slot {} outside the spliced span of {}",
                        instruction.op, slot, secondary_span
                    ),
                });
            }
        }

        if separated {
            self.push_separator();
        }
        for instruction in &other.instructions {
            if instruction.is_separator() {
                // Re-span inner separators over the spliced region only.
                self.instructions
                    .push(Instruction::separator(primary_span));
            } else {
                self.instructions.push(instruction.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bell() -> Circuit {
        let mut c = Circuit::new("bell", 2, 2);
        c.push(Instruction::new("h", vec![0])).unwrap();
        c.push(Instruction::new("cx", vec![0, 1])).unwrap();
        c.push(Instruction::new("measure", vec![0]).with_secondary(vec![0]))
            .unwrap();
        c
    }

    #[test]
    fn test_empty_circuit() {
        let c = Circuit::empty();
        assert!(c.is_empty());
        assert_eq!(c.width(), 0);
        assert_eq!(c.depth(), 0);
        assert_eq!(c.size(), 0);
    }

    #[test]
    fn test_depth_and_size() {
        let c = bell();
        assert_eq!(c.size(), 3);
        assert_eq!(c.depth(), 3);
    }

    #[test]
    fn test_separator_does_not_add_depth() {
        let mut c = Circuit::new("layers", 2, 0);
        c.push(Instruction::new("h", vec![0])).unwrap();
        c.push_separator();
        c.push(Instruction::new("x", vec![1])).unwrap();
        // The separator aligns slot 1 with slot 0 before the x.
        assert_eq!(c.depth(), 2);
        assert_eq!(c.size(), 2);
        assert_eq!(c.separator_count(), 1);
    }

    #[test]
    fn test_push_rejects_out_of_range() {
        let mut c = Circuit::new("small", 2, 0);
        let err = c.push(Instruction::new("cx", vec![0, 2])).unwrap_err();
        assert!(matches!(err, CircuitError::SlotOutOfRange { slot: 2, .. }));
        assert!(c.instructions().is_empty());
    }

    #[test]
    fn test_push_rejects_repeated_slot() {
        let mut c = Circuit::new("small", 2, 0);
        let err = c.push(Instruction::new("cx", vec![1, 1])).unwrap_err();
        assert!(matches!(err, CircuitError::RepeatedSlot { slot: 1, .. }));
    }

    #[test]
    fn test_suffix_symbols() {
        let mut c = Circuit::new("var", 1, 0);
        c.push(Instruction::new("ry", vec![0]).with_params(vec![Param::symbol("theta")]))
            .unwrap();
        c.push(Instruction::new("rz", vec![0]).with_params(vec![Param::Value(0.5)]))
            .unwrap();
        c.suffix_symbols("_s3");
        let symbols: Vec<_> = c.free_symbols().into_iter().collect();
        assert_eq!(symbols, vec!["theta_s3".to_string()]);
        assert_eq!(c.param_count(), 2);
    }

    #[test]
    fn test_splice_into_wider_circuit() {
        let mut composite = Circuit::new("composite", 4, 2);
        composite.splice(&bell()).unwrap();
        assert_eq!(composite.size(), 3);
        assert_eq!(composite.width(), 4);
    }

    #[test]
    fn test_splice_is_all_or_nothing() {
        // Built without push() to simulate a malformed template output.
        let malformed = Circuit {
            name: "malformed".to_string(),
            width: 2,
            secondary_width: 0,
            instructions: vec![
                Instruction::new("h", vec![0]),
                Instruction::new("cx", vec![0, 5]),
            ],
        };
        let mut composite = Circuit::new("composite", 3, 0);
        let err = composite.splice(&malformed).unwrap_err();
        assert!(matches!(err, CircuitError::Splice { .. }));
        assert!(composite.instructions().is_empty());
    }

    #[test]
    fn test_splice_separated() {
        let mut composite = Circuit::new("composite", 2, 2);
        composite.splice(&bell()).unwrap();
        composite.splice_separated(&bell()).unwrap();
        assert_eq!(composite.separator_count(), 1);
        assert_eq!(composite.size(), 6);
    }

    #[test]
    fn test_op_histogram() {
        let histogram = bell().op_histogram();
        assert_eq!(histogram.get("h"), Some(&1));
        assert_eq!(histogram.get("cx"), Some(&1));
        assert_eq!(histogram.get("measure"), Some(&1));
    }
}
