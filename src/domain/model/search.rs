use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::domain::constraint::constraint::Constraint;
use crate::domain::constraint::placement_constraint_trait::PlacementConstraint;
use crate::domain::model::reconfiguration_model::ReconfigurationModel;
use crate::domain::model::scheduler::{Schedule, schedule};
use crate::domain::model::slice::Slice;
use crate::domain::model::solution_statistics::SolutionStatistics;
use crate::domain::model::transition::TargetState;
use crate::domain::plan::timed_reconfiguration_plan::TimedReconfigurationPlan;
use crate::error::ModelError;

/// How long a search may run. Cloning shares the cancellation flag; the
/// node limit applies to each search on its own.
#[derive(Debug, Clone, Default)]
pub struct SearchBudget {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
    node_limit: Option<u64>,
}

impl SearchBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        SearchBudget { deadline: Some(Instant::now() + timeout), ..Default::default() }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        SearchBudget { deadline: Some(deadline), ..Default::default() }
    }

    /// Caps the number of search nodes a single search may open.
    pub fn with_node_limit(mut self, nodes: u64) -> Self {
        self.node_limit = Some(nodes);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_exhausted(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    /// Search space exhausted while optimizing: the plan is the cheapest one.
    Optimal,
    /// First plan found, no optimization requested.
    Feasible,
    /// Budget exhausted after finding a plan.
    Incomplete,
    /// Budget exhausted before any plan was found.
    Timeout,
    /// Search space exhausted without any plan.
    Infeasible,
}

impl SolveStatus {
    pub fn has_plan(&self) -> bool {
        matches!(self, SolveStatus::Optimal | SolveStatus::Feasible | SolveStatus::Incomplete)
    }

    /// Severity used to combine the status of several partitions.
    fn severity(&self) -> u8 {
        match self {
            SolveStatus::Optimal => 0,
            SolveStatus::Feasible => 1,
            SolveStatus::Incomplete => 2,
            SolveStatus::Timeout => 3,
            SolveStatus::Infeasible => 4,
        }
    }

    pub fn combine(self, other: SolveStatus) -> SolveStatus {
        if other.severity() > self.severity() { other } else { self }
    }
}

impl fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolveStatus::Optimal => "optimal",
            SolveStatus::Feasible => "feasible",
            SolveStatus::Incomplete => "incomplete",
            SolveStatus::Timeout => "timeout",
            SolveStatus::Infeasible => "infeasible",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SolveResult {
    pub status: SolveStatus,
    pub plan: Option<TimedReconfigurationPlan>,
    pub slices: Vec<Slice>,
    pub statistics: SolutionStatistics,

    /// Constraints the source configuration violates, when infeasible.
    pub violated: Vec<Constraint>,

    /// Why the model could not even be searched.
    pub cause: Option<ModelError>,
}

impl SolveResult {
    /// Result of a model rejected before search.
    pub fn rejected(cause: ModelError, violated: Vec<Constraint>) -> Self {
        SolveResult { status: SolveStatus::Infeasible, plan: None, slices: Vec::new(), statistics: SolutionStatistics::default(), violated, cause: Some(cause) }
    }
}

/// Depth-first branch and bound over the hoster variables.
///
/// Variables are picked smallest domain first, then largest memory. Values
/// are tried current host first, then worst fit by free memory. Every
/// assignment is checked against the final CPU and memory capacity of the
/// node and propagated through the among constraints; complete assignments
/// are handed to the list scheduler.
pub fn solve(model: ReconfigurationModel, budget: &SearchBudget) -> SolveResult {
    let started = Instant::now();
    let mut search = BranchAndBound::new(model, budget);
    search.explore();

    let statistics = SolutionStatistics {
        nodes: search.nodes,
        backtracks: search.backtracks,
        elapsed: started.elapsed(),
        solutions: search.solutions,
        objective: if search.model.optimize { search.best.as_ref().map(|(cost, _)| *cost) } else { None },
    };

    let status = match (&search.best, search.interrupted) {
        (Some(_), true) => SolveStatus::Incomplete,
        (Some(_), false) if search.model.optimize => SolveStatus::Optimal,
        (Some(_), false) => SolveStatus::Feasible,
        (None, true) => SolveStatus::Timeout,
        (None, false) => SolveStatus::Infeasible,
    };

    let violated = if status == SolveStatus::Infeasible {
        search.model.constraints.iter().filter(|c| !c.is_satisfied(&search.model.source)).cloned().collect()
    } else {
        Vec::new()
    };

    log::debug!("Search ended {}: {}", status, statistics);

    let (plan, slices) = match search.best {
        Some((_, Schedule { plan, slices })) => (Some(plan), slices),
        None => (None, Vec::new()),
    };
    SolveResult { status, plan, slices, statistics, violated, cause: None }
}

struct BranchAndBound<'b> {
    model: ReconfigurationModel,
    budget: &'b SearchBudget,

    assigned: Vec<Option<usize>>,
    cpu: Vec<i64>,
    memory: Vec<i64>,

    best: Option<(i64, Schedule)>,
    interrupted: bool,
    nodes: u64,
    backtracks: u64,
    solutions: u64,
}

impl<'b> BranchAndBound<'b> {
    fn new(model: ReconfigurationModel, budget: &'b SearchBudget) -> Self {
        let n = model.hosts.len();
        let vars = model.owners.len();
        BranchAndBound {
            model,
            budget,
            assigned: vec![None; vars],
            cpu: vec![0; n],
            memory: vec![0; n],
            best: None,
            interrupted: false,
            nodes: 0,
            backtracks: 0,
            solutions: 0,
        }
    }

    fn explore(&mut self) {
        for p in 0..self.model.amongs.len() {
            if !self.model.propagate_among(p) {
                return;
            }
        }
        self.dfs();
    }

    /// Returns `true` when the search must stop.
    fn dfs(&mut self) -> bool {
        if self.budget.is_exhausted() || self.budget.node_limit.is_some_and(|limit| self.nodes >= limit) {
            self.interrupted = true;
            return true;
        }
        self.nodes += 1;

        let Some(var) = self.select_variable() else {
            return self.on_leaf();
        };

        for value in self.order_values(var) {
            if self.bound_exceeded(var, value) {
                continue;
            }

            let checkpoint = self.model.domains.checkpoint();
            if self.assign(var, value) {
                if self.dfs() {
                    return true;
                }
            } else {
                self.backtracks += 1;
            }
            self.unassign(var, value);
            self.model.domains.rollback(checkpoint);
        }
        false
    }

    fn on_leaf(&mut self) -> bool {
        let assignment: Vec<usize> = self.assigned.iter().map(|v| v.unwrap_or(0)).collect();
        let cost = self.lower_bound();

        if self.best.as_ref().is_some_and(|(best, _)| cost >= *best) {
            return false;
        }

        match schedule(&self.model, &assignment) {
            Some(found) => {
                self.solutions += 1;
                log::trace!("Solution #{} of cost {}", self.solutions, cost);
                self.best = Some((cost, found));
                !self.model.optimize
            }
            None => {
                self.backtracks += 1;
                false
            }
        }
    }

    fn select_variable(&self) -> Option<usize> {
        (0..self.assigned.len()).filter(|v| self.assigned[*v].is_none()).min_by_key(|v| {
            let vm = &self.model.transitions[self.model.owners[*v]].vm;
            (self.model.domains.size(*v), std::cmp::Reverse(vm.memory), *v)
        })
    }

    fn order_values(&self, var: usize) -> Vec<usize> {
        let host = self.model.transitions[self.model.owners[var]].source.host();
        let mut values = self.model.domains.values(var);
        values.sort_by_key(|n| (host != Some(*n), std::cmp::Reverse(self.model.hosts[*n].memory - self.memory[*n]), *n));
        values
    }

    fn lower_bound(&self) -> i64 {
        let mut total = self.model.fixed_cost();
        for (var, value) in self.assigned.iter().enumerate() {
            let t = &self.model.transitions[self.model.owners[var]];
            total += match value {
                Some(n) => t.cost_on(Some(*n)),
                None => self.model.min_cost(var),
            };
        }
        total
    }

    fn bound_exceeded(&self, var: usize, value: usize) -> bool {
        let Some((best, _)) = &self.best else {
            return false;
        };
        let t = &self.model.transitions[self.model.owners[var]];
        self.lower_bound() - self.model.min_cost(var) + t.cost_on(Some(value)) >= *best
    }

    fn assign(&mut self, var: usize, value: usize) -> bool {
        if !self.model.domains.instantiate(var, value) {
            return false;
        }
        self.assigned[var] = Some(value);

        let owner = self.model.owners[var];
        if self.model.transitions[owner].target != TargetState::Running {
            return self.propagate(var);
        }

        let vm = &self.model.transitions[owner].vm;
        self.cpu[value] += vm.cpu_demand;
        self.memory[value] += vm.memory;

        let capacity = &self.model.hosts[value];
        let (free_cpu, free_memory) = (capacity.cpu_capacity() - self.cpu[value], capacity.memory - self.memory[value]);
        if free_cpu < 0 || free_memory < 0 {
            return false;
        }

        for other in 0..self.assigned.len() {
            if self.assigned[other].is_some() || !self.model.domains.contains(other, value) {
                continue;
            }
            let t = &self.model.transitions[self.model.owners[other]];
            if t.is_running_after() && (t.vm.cpu_demand > free_cpu || t.vm.memory > free_memory) {
                self.model.domains.remove(other, value);
                if self.model.domains.is_empty(other) {
                    return false;
                }
            }
        }
        self.propagate(var)
    }

    fn propagate(&mut self, var: usize) -> bool {
        for p in 0..self.model.amongs.len() {
            if self.model.amongs[p].vars.contains(&var) && !self.model.propagate_among(p) {
                return false;
            }
        }
        true
    }

    fn unassign(&mut self, var: usize, value: usize) {
        if self.assigned[var].take().is_none() {
            return;
        }
        let t = &self.model.transitions[self.model.owners[var]];
        if t.is_running_after() {
            self.cpu[value] -= t.vm.cpu_demand;
            self.memory[value] -= t.vm.memory;
        }
    }
}
