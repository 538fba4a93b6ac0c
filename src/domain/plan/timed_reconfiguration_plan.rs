use std::collections::BTreeMap;

use slotmap::{SlotMap, new_key_type};

use crate::domain::configuration::configuration::Configuration;
use crate::domain::plan::action::Action;
use crate::error::PlanError;

new_key_type! { pub struct ActionId; }

/// Time-stamped actions moving the source configuration to its destination.
///
/// Every accepted action respects the plan invariants: a positive interval
/// inside the horizon, no overlap with another action on the same VM, and no
/// overlap with an action touching a node it needs exclusively.
#[derive(Debug, Clone)]
pub struct TimedReconfigurationPlan {
    source: Configuration,
    actions: SlotMap<ActionId, Action>,
    horizon: Option<i64>,
}

impl TimedReconfigurationPlan {
    pub fn new(source: Configuration) -> Self {
        TimedReconfigurationPlan { source, actions: SlotMap::with_key(), horizon: None }
    }

    pub fn with_horizon(source: Configuration, horizon: i64) -> Self {
        TimedReconfigurationPlan { source, actions: SlotMap::with_key(), horizon: Some(horizon) }
    }

    pub fn source(&self) -> &Configuration {
        &self.source
    }

    pub fn horizon(&self) -> Option<i64> {
        self.horizon
    }

    /// Adds an action to the plan.
    ///
    /// Returns `false`, leaving the plan untouched, when the action breaks
    /// one of the plan invariants.
    pub fn add(&mut self, action: Action) -> bool {
        if action.start < 0 || action.end < action.start {
            log::error!("Rejecting action {}: invalid interval", action);
            return false;
        }

        if let Some(horizon) = self.horizon {
            if action.end > horizon {
                log::error!("Rejecting action {}: ends after the horizon {}", action, horizon);
                return false;
            }
        }

        if let Some(conflict) = self.actions.values().find(|held| held.conflicts_with(&action)) {
            log::error!("Rejecting action {}: conflicts with {}", action, conflict);
            return false;
        }

        self.actions.insert(action);
        true
    }

    pub fn get(&self, id: ActionId) -> Option<&Action> {
        self.actions.get(id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Actions sorted by start, then execution phase, then end. At a shared
    /// start time boots and deploys precede arrivals and shutdowns follow
    /// departures.
    pub fn actions(&self) -> Vec<&Action> {
        let mut actions: Vec<&Action> = self.actions.values().collect();
        actions.sort_by(|a, b| {
            a.start
                .cmp(&b.start)
                .then_with(|| a.kind().execution_phase().cmp(&b.kind().execution_phase()))
                .then_with(|| a.end.cmp(&b.end))
                .then_with(|| a.operation.to_string().cmp(&b.operation.to_string()))
        });
        actions
    }

    /// Groups of actions sharing a start time and execution phase, in time
    /// order. The actions of one batch can be applied concurrently; node
    /// actions never share a batch with VM actions.
    pub fn execution_batches(&self) -> Vec<(i64, Vec<&Action>)> {
        let mut batches: BTreeMap<(i64, u8), Vec<&Action>> = BTreeMap::new();
        for action in self.actions() {
            batches.entry((action.start, action.kind().execution_phase())).or_default().push(action);
        }
        batches.into_iter().map(|((start, _), batch)| (start, batch)).collect()
    }

    /// Makespan of the plan.
    pub fn duration(&self) -> i64 {
        self.actions.values().map(|a| a.end).max().unwrap_or(0)
    }

    /// Sum of the durations of every action.
    pub fn cost(&self) -> i64 {
        self.actions.values().map(Action::duration).sum()
    }

    /// Adds every action of `other`. Returns `false` if one was rejected.
    pub fn merge(&mut self, other: &TimedReconfigurationPlan) -> bool {
        let mut merged = true;
        for action in other.actions.values() {
            merged &= self.add(action.clone());
        }
        merged
    }

    /// Re-checks the invariants over every pair of actions.
    pub fn is_valid(&self) -> bool {
        let actions: Vec<&Action> = self.actions.values().collect();

        for (i, a) in actions.iter().enumerate() {
            if a.start < 0 || a.end < a.start || self.horizon.is_some_and(|h| a.end > h) {
                return false;
            }
            if actions[i + 1..].iter().any(|b| a.conflicts_with(b)) {
                return false;
            }
        }
        true
    }

    /// The configuration reached once every action has been applied.
    pub fn destination(&self) -> Result<Configuration, PlanError> {
        let mut configuration = self.source.clone();
        for action in self.actions() {
            action.apply(&mut configuration)?;
        }
        Ok(configuration)
    }
}
