//! Self-adjusting selection probabilities.
//!
//! A [`ProbabilityVector`] is index-aligned with the generator registry and
//! always sums to 1. After each draw the chosen entry is dampened, category
//! and synergy rules rescale the other entries, and the vector is
//! renormalized.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use super::rules::RuleTable;
use crate::generators::{Category, GeneratorId, GeneratorRegistry};

#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityVector {
    weights: Vec<f64>,
}

impl ProbabilityVector {
    /// Uniform distribution over `len` entries.
    pub fn uniform(len: usize) -> Self {
        let weight = if len == 0 { 0.0 } else { 1.0 / len as f64 };
        Self {
            weights: vec![weight; len],
        }
    }

    /// Normalizes `raw` over `len` entries.
    ///
    /// Negative and non-finite weights count as zero. Falls back to uniform
    /// when the length does not match or nothing positive remains.
    pub fn from_weights(raw: &[f64], len: usize) -> Self {
        if raw.len() != len {
            return Self::uniform(len);
        }
        let mut vector = Self {
            weights: raw
                .iter()
                .map(|&w| if w.is_finite() && w > 0.0 { w } else { 0.0 })
                .collect(),
        };
        vector.renormalize();
        vector
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Weighted draw with replacement. `None` only for an empty vector.
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> Option<usize> {
        if self.weights.is_empty() {
            return None;
        }
        let total = self.sum();
        let roll = rng.random::<f64>() * total;
        let mut cumulative = 0.0;
        for (index, &weight) in self.weights.iter().enumerate() {
            cumulative += weight;
            if roll < cumulative {
                return Some(index);
            }
        }
        // Rounding left the roll past the last boundary.
        self.weights
            .iter()
            .rposition(|&w| w > 0.0)
            .or(Some(self.weights.len() - 1))
    }

    /// Scales the chosen entry. Does not renormalize.
    pub fn dampen(&mut self, index: usize, factor: f64) {
        if let Some(weight) = self.weights.get_mut(index) {
            *weight *= factor;
        }
    }

    /// Applies every category rule triggered by the chosen entry's category.
    /// Does not renormalize.
    pub fn apply_category_rules(&mut self, chosen: usize, categories: &[Category], rules: &RuleTable) {
        let Some(&chosen_category) = categories.get(chosen) else {
            return;
        };
        for rule in rules.category_rules_for(chosen_category) {
            for (index, weight) in self.weights.iter_mut().enumerate() {
                let Some(&category) = categories.get(index) else {
                    continue;
                };
                if category == rule.trigger && index != chosen {
                    *weight *= rule.same_category_multiplier;
                } else if category == rule.cross_category && category != rule.trigger {
                    *weight *= rule.cross_multiplier;
                }
            }
        }
    }

    /// Applies every synergy rule triggered by `chosen`, stacking
    /// multiplicatively. Does not renormalize.
    pub fn apply_synergies(&mut self, chosen: GeneratorId, ids: &[GeneratorId], rules: &RuleTable) {
        for rule in rules.synergies_for(chosen) {
            for (index, id) in ids.iter().enumerate() {
                if rule.targets.contains(id) {
                    if let Some(weight) = self.weights.get_mut(index) {
                        *weight *= rule.multiplier;
                    }
                }
            }
        }
    }

    /// Rescales to sum 1, or resets to uniform if nothing positive is left.
    pub fn renormalize(&mut self) {
        let total = self.sum();
        if total.is_finite() && total > 0.0 {
            for weight in &mut self.weights {
                *weight /= total;
            }
        } else {
            *self = Self::uniform(self.weights.len());
        }
    }

    /// Full post-selection update: dampen, category rules, synergies, renormalize.
    pub fn update(
        &mut self,
        chosen: usize,
        ids: &[GeneratorId],
        categories: &[Category],
        rules: &RuleTable,
    ) {
        self.dampen(chosen, rules.dampening());
        self.apply_category_rules(chosen, categories, rules);
        if let Some(&id) = ids.get(chosen) {
            self.apply_synergies(id, ids, rules);
        }
        self.renormalize();
    }
}

/// Runs the stochastic selection loop over `registry`.
///
/// Returns at most `max_steps` ids, possibly with repeats. From the second
/// step on, the loop stops early with probability `stopping_prob`.
pub fn select(
    registry: &GeneratorRegistry,
    rules: &RuleTable,
    initial_weights: Option<&[f64]>,
    stopping_prob: f64,
    max_steps: usize,
    rng: &mut ChaCha8Rng,
) -> Vec<GeneratorId> {
    if registry.is_empty() || max_steps == 0 {
        return Vec::new();
    }
    let ids = registry.ids();
    let categories = registry.categories();
    let stopping_prob = if stopping_prob.is_nan() {
        0.0
    } else {
        stopping_prob.clamp(0.0, 1.0)
    };

    let mut vector = match initial_weights {
        Some(raw) => ProbabilityVector::from_weights(raw, ids.len()),
        None => ProbabilityVector::uniform(ids.len()),
    };

    let mut selection = Vec::with_capacity(max_steps);
    for step in 0..max_steps {
        if step > 0 && rng.random::<f64>() < stopping_prob {
            break;
        }
        let Some(chosen) = vector.sample(rng) else {
            break;
        };
        vector.update(chosen, &ids, &categories, rules);
        selection.push(ids[chosen]);
    }
    selection
}
