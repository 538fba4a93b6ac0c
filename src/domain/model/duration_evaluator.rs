use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::domain::configuration::node::Node;
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::plan::action::ActionKind;
use crate::error::{ConfigError, ModelError};
use crate::loader::properties::Properties;

/// Estimates how long an action lasts, in the time unit of the plan.
pub trait DurationEvaluator: Debug + Send + Sync {
    fn evaluate(&self, kind: ActionKind, vm: &VirtualMachine) -> Result<i64, ModelError>;

    fn evaluate_node(&self, kind: ActionKind, node: &Node) -> Result<i64, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LinearCost {
    base: i64,
    per_gib: i64,
}

/// `base + per_gib * memory_in_GiB`, rounded up, per action kind.
///
/// Built from properties either as `<kind> = <n>` (constant) or as
/// `<kind>.base = <n>` and `<kind>.perGiB = <n>`. Node actions only use the
/// base.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinearDurationEvaluator {
    costs: BTreeMap<ActionKind, LinearCost>,
}

impl LinearDurationEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same constant duration for every action kind.
    pub fn uniform(duration: i64) -> Self {
        ActionKind::ALL.iter().fold(Self::new(), |evaluator, kind| evaluator.with(*kind, duration, 0))
    }

    pub fn with(mut self, kind: ActionKind, base: i64, per_gib: i64) -> Self {
        self.costs.insert(kind, LinearCost { base, per_gib });
        self
    }

    pub fn from_properties(properties: &Properties) -> Result<Self, ConfigError> {
        let mut evaluator = LinearDurationEvaluator::new();

        for key in properties.keys() {
            let name = key.split('.').next().unwrap_or(key);
            name.parse::<ActionKind>()?;
        }

        for kind in ActionKind::ALL {
            let constant = properties.get_i64(kind.as_str())?;
            let base = properties.get_i64(&format!("{}.base", kind))?;
            let per_gib = properties.get_i64(&format!("{}.perGiB", kind))?;

            let cost = match (constant, base, per_gib) {
                (Some(c), _, _) => LinearCost { base: c, per_gib: 0 },
                (None, None, None) => continue,
                (None, b, p) => LinearCost { base: b.unwrap_or(0), per_gib: p.unwrap_or(0) },
            };

            if cost.base < 0 || cost.per_gib < 0 {
                return Err(ConfigError::InvalidProperty {
                    key: kind.to_string(),
                    value: format!("{}+{}/GiB", cost.base, cost.per_gib),
                    reason: "durations must be non-negative".to_string(),
                });
            }
            evaluator.costs.insert(kind, cost);
        }

        log::debug!("Loaded durations for {} action kinds", evaluator.costs.len());
        Ok(evaluator)
    }

    fn cost(&self, kind: ActionKind) -> Result<LinearCost, ModelError> {
        self.costs.get(&kind).copied().ok_or_else(|| ModelError::MissingDuration(kind.to_string()))
    }
}

impl DurationEvaluator for LinearDurationEvaluator {
    fn evaluate(&self, kind: ActionKind, vm: &VirtualMachine) -> Result<i64, ModelError> {
        let cost = self.cost(kind)?;
        Ok(cost.base + (cost.per_gib * vm.memory + 1023) / 1024)
    }

    fn evaluate_node(&self, kind: ActionKind, _node: &Node) -> Result<i64, ModelError> {
        Ok(self.cost(kind)?.base)
    }
}
