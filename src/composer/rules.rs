//! Rule table for the probability model.
//!
//! Rules are data: a dampening factor for the chosen entry, category rules
//! keyed by the chosen entry's [`Category`], and synergy rules keyed by the
//! chosen entry's [`GeneratorId`]. Rules sharing a trigger are applied in
//! registration order and stack multiplicatively.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RuleError;
use crate::generators::{Category, GeneratorId};

/// Factor applied to the chosen entry after each selection.
pub const DEFAULT_DAMPENING: f64 = 0.3;

/// Category-level adjustment applied when an entry of `trigger` is chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub trigger: Category,
    /// Applied to every *other* entry of the same category.
    pub same_category_multiplier: f64,
    pub cross_category: Category,
    /// Applied to every entry of `cross_category`.
    pub cross_multiplier: f64,
}

/// Pairwise synergy: choosing `trigger` scales every target by `multiplier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynergyRule {
    pub trigger: GeneratorId,
    pub targets: BTreeSet<GeneratorId>,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleTable {
    dampening: f64,
    category_rules: Vec<CategoryRule>,
    synergy_rules: Vec<SynergyRule>,
}

impl Default for RuleTable {
    fn default() -> Self {
        Self {
            dampening: DEFAULT_DAMPENING,
            category_rules: default_category_rules(),
            synergy_rules: default_synergy_rules(),
        }
    }
}

/// One synergy entry as written in a rules file. Several triggers expand
/// into one rule each.
#[derive(Debug, Deserialize)]
struct SynergySpec {
    #[serde(alias = "trigger")]
    triggers: Vec<GeneratorId>,
    targets: Vec<GeneratorId>,
    multiplier: f64,
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    dampening: Option<f64>,
    #[serde(default)]
    category_rules: Option<Vec<CategoryRule>>,
    #[serde(default)]
    synergy_rules: Option<Vec<SynergySpec>>,
}

impl RuleTable {
    /// A table with only the dampening factor and no category or synergy rules.
    pub fn empty() -> Self {
        Self {
            dampening: DEFAULT_DAMPENING,
            category_rules: Vec::new(),
            synergy_rules: Vec::new(),
        }
    }

    /// Builds and validates a table.
    pub fn new(
        dampening: f64,
        category_rules: Vec<CategoryRule>,
        synergy_rules: Vec<SynergyRule>,
    ) -> Result<Self, RuleError> {
        let table = Self {
            dampening,
            category_rules,
            synergy_rules,
        };
        table.validate()?;
        Ok(table)
    }

    /// Parses a YAML rules document. Omitted sections keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RuleError> {
        let file: RuleFile = serde_yaml::from_str(yaml)?;
        let mut table = Self::default();

        if let Some(dampening) = file.dampening {
            table.dampening = dampening;
        }
        if let Some(category_rules) = file.category_rules {
            table.category_rules = category_rules;
        }
        if let Some(specs) = file.synergy_rules {
            table.synergy_rules.clear();
            for spec in specs {
                table.push_expanded(&spec.triggers, &spec.targets, spec.multiplier)?;
            }
        }

        table.validate()?;
        Ok(table)
    }

    /// Loads a YAML rules file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Appends one synergy rule per trigger.
    pub fn add_synergy(
        &mut self,
        triggers: &[GeneratorId],
        targets: &[GeneratorId],
        multiplier: f64,
    ) -> Result<(), RuleError> {
        self.push_expanded(triggers, targets, multiplier)
    }

    /// Builder-style [`add_synergy`](Self::add_synergy).
    pub fn with_synergy(
        mut self,
        triggers: &[GeneratorId],
        targets: &[GeneratorId],
        multiplier: f64,
    ) -> Result<Self, RuleError> {
        self.push_expanded(triggers, targets, multiplier)?;
        Ok(self)
    }

    /// Appends a category rule.
    pub fn with_category_rule(mut self, rule: CategoryRule) -> Result<Self, RuleError> {
        check_multiplier(&rule.trigger.to_string(), rule.same_category_multiplier)?;
        check_multiplier(&rule.trigger.to_string(), rule.cross_multiplier)?;
        self.category_rules.push(rule);
        Ok(self)
    }

    fn push_expanded(
        &mut self,
        triggers: &[GeneratorId],
        targets: &[GeneratorId],
        multiplier: f64,
    ) -> Result<(), RuleError> {
        if triggers.is_empty() {
            return Err(RuleError::NoTriggers);
        }
        for trigger in triggers {
            if targets.is_empty() {
                return Err(RuleError::NoTargets(trigger.to_string()));
            }
            check_multiplier(trigger.as_str(), multiplier)?;
        }
        for &trigger in triggers {
            self.synergy_rules.push(SynergyRule {
                trigger,
                targets: targets.iter().copied().collect(),
                multiplier,
            });
        }
        Ok(())
    }

    /// Checks every multiplier is finite and positive.
    pub fn validate(&self) -> Result<(), RuleError> {
        check_multiplier("dampening", self.dampening)?;
        for rule in &self.category_rules {
            let trigger = rule.trigger.to_string();
            check_multiplier(&trigger, rule.same_category_multiplier)?;
            check_multiplier(&trigger, rule.cross_multiplier)?;
        }
        for rule in &self.synergy_rules {
            if rule.targets.is_empty() {
                return Err(RuleError::NoTargets(rule.trigger.to_string()));
            }
            check_multiplier(rule.trigger.as_str(), rule.multiplier)?;
        }
        Ok(())
    }

    pub fn dampening(&self) -> f64 {
        self.dampening
    }

    pub fn category_rules(&self) -> &[CategoryRule] {
        &self.category_rules
    }

    pub fn synergy_rules(&self) -> &[SynergyRule] {
        &self.synergy_rules
    }

    /// Category rules triggered by `category`, in registration order.
    pub fn category_rules_for(&self, category: Category) -> impl Iterator<Item = &CategoryRule> {
        self.category_rules
            .iter()
            .filter(move |r| r.trigger == category)
    }

    /// Synergy rules triggered by `id`, in registration order.
    pub fn synergies_for(&self, id: GeneratorId) -> impl Iterator<Item = &SynergyRule> {
        self.synergy_rules.iter().filter(move |r| r.trigger == id)
    }
}

fn check_multiplier(trigger: &str, multiplier: f64) -> Result<(), RuleError> {
    if multiplier.is_finite() && multiplier > 0.0 {
        Ok(())
    } else {
        Err(RuleError::InvalidMultiplier {
            trigger: trigger.to_string(),
            multiplier,
        })
    }
}

/// State-prep and algorithm category rules.
pub fn default_category_rules() -> Vec<CategoryRule> {
    vec![
        CategoryRule {
            trigger: Category::StatePrep,
            same_category_multiplier: 0.6,
            cross_category: Category::Algorithm,
            cross_multiplier: 1.5,
        },
        CategoryRule {
            trigger: Category::Algorithm,
            same_category_multiplier: 0.7,
            cross_category: Category::StatePrep,
            cross_multiplier: 1.3,
        },
    ]
}

/// Built-in synergy rules.
pub fn default_synergy_rules() -> Vec<SynergyRule> {
    use GeneratorId::*;

    let groups: [(&[GeneratorId], &[GeneratorId], f64); 6] = [
        (&[Qft], &[Qpe], 2.5),
        (&[Qpe], &[Qft], 2.0),
        (&[Ghz], &[QuantumWalk, Qaoa, Vqe], 1.4),
        (&[Vqe, Qaoa, Qnn], &[RealAmplitudes, TwoLocal], 1.6),
        (
            &[Ghz, WState, GraphState, EfficientSu2, QuantumWalk],
            &[DeutschJozsa, GroverNoAncilla],
            1.3,
        ),
        (&[GraphState], &[QuantumWalk], 1.7),
    ];

    let mut rules = Vec::new();
    for (triggers, targets, multiplier) in groups {
        for &trigger in triggers {
            rules.push(SynergyRule {
                trigger,
                targets: targets.iter().copied().collect(),
                multiplier,
            });
        }
    }
    rules
}
