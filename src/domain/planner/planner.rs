use std::sync::Arc;

use futures::future::join_all;

use crate::domain::constraint::placement_constraint_trait::PlacementConstraint;
use crate::domain::model::duration_evaluator::DurationEvaluator;
use crate::domain::model::reconfiguration_model::{ModelOptions, ReconfigurationModel};
use crate::domain::model::search::{SearchBudget, SolveResult, SolveStatus, solve};
use crate::domain::model::solution_statistics::SolutionStatistics;
use crate::domain::partition::partition::Partition;
use crate::domain::partition::partitioner::Partitioner;
use crate::domain::plan::timed_reconfiguration_plan::TimedReconfigurationPlan;
use crate::domain::planner::planning_request::PlanningRequest;
use crate::error::{Error, PartitioningError};

/// Splits a request into partitions and solves them concurrently on the
/// blocking pool of tokio.
#[derive(Debug, Clone)]
pub struct Planner {
    evaluator: Arc<dyn DurationEvaluator>,
    options: ModelOptions,
}

impl Planner {
    pub fn new(evaluator: Arc<dyn DurationEvaluator>, options: ModelOptions) -> Self {
        Planner { evaluator, options }
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn partition(&self, request: &PlanningRequest) -> Result<Vec<Partition>, PartitioningError> {
        let mut partitioner = Partitioner::new(&request.source, &request.new_vms, &request.node_targets);
        for constraint in &request.constraints {
            partitioner.part(constraint)?;
        }
        Ok(partitioner.get_resulting_partitions())
    }

    pub async fn solve(&self, request: PlanningRequest, budget: SearchBudget) -> Result<SolveResult, Error> {
        let partitions = self.partition(&request)?;
        self.solve_partitions(Arc::new(request), partitions, budget).await
    }

    /// Solves every partition in its own blocking task and merges the results.
    ///
    /// The merged plan only exists if every partition produced one. The status
    /// is the worst one among the partitions.
    pub async fn solve_partitions(&self, request: Arc<PlanningRequest>, partitions: Vec<Partition>, budget: SearchBudget) -> Result<SolveResult, Error> {
        log::info!("Solving {} partitions", partitions.len());

        let handles = partitions.into_iter().map(|partition| {
            let request = Arc::clone(&request);
            let evaluator = Arc::clone(&self.evaluator);
            let options = self.options;
            let budget = budget.clone();
            tokio::task::spawn_blocking(move || solve_partition(&request, &partition, evaluator.as_ref(), &options, &budget))
        });

        let mut results = Vec::new();
        for joined in join_all(handles).await {
            results.push(joined.map_err(|e| Error::WorkerFailure(e.to_string()))?);
        }

        Ok(merge_results(&request, results, &self.options))
    }
}

/// Solves one partition, trying the repair model first when enabled.
pub fn solve_partition(request: &PlanningRequest, partition: &Partition, evaluator: &dyn DurationEvaluator, options: &ModelOptions, budget: &SearchBudget) -> SolveResult {
    if options.repair {
        match ReconfigurationModel::build(request, partition, evaluator, options) {
            Ok(model) => {
                let result = solve(model, budget);
                if result.status != SolveStatus::Infeasible {
                    return result;
                }
                log::debug!("Repair model infeasible, falling back to the full model");
            }
            Err(e) => log::debug!("Repair model rejected ({}), falling back to the full model", e),
        }
    }

    let full = ModelOptions { repair: false, ..*options };
    match ReconfigurationModel::build(request, partition, evaluator, &full) {
        Ok(model) => solve(model, budget),
        Err(e) => {
            log::warn!("Partition of {} nodes cannot be modelled: {}", partition.nodes.len(), e);
            let violated = partition.constraints.iter().filter(|c| !c.is_satisfied(&request.source)).cloned().collect();
            SolveResult::rejected(e, violated)
        }
    }
}

fn merge_results(request: &PlanningRequest, results: Vec<SolveResult>, options: &ModelOptions) -> SolveResult {
    let horizon = results.iter().filter_map(|r| r.plan.as_ref().and_then(TimedReconfigurationPlan::horizon)).max().or(options.horizon);
    let mut plan = match horizon {
        Some(h) => TimedReconfigurationPlan::with_horizon(request.source.clone(), h),
        None => TimedReconfigurationPlan::new(request.source.clone()),
    };

    let mut status = SolveStatus::Optimal;
    let mut statistics = SolutionStatistics::default();
    let mut slices = Vec::new();
    let mut violated = Vec::new();
    let mut cause = None;
    let mut complete = true;

    for result in results {
        status = status.combine(result.status);
        statistics = statistics.merge(&result.statistics);
        violated.extend(result.violated);
        cause = cause.or(result.cause);

        match result.plan {
            Some(fragment) => {
                if !plan.merge(&fragment) {
                    log::error!("Plans of two partitions conflict");
                    complete = false;
                }
                slices.extend(result.slices);
            }
            None => complete = false,
        }
    }

    if status == SolveStatus::Optimal && !options.optimize {
        status = SolveStatus::Feasible;
    }

    let plan = if complete && status.has_plan() { Some(plan) } else { None };
    if plan.is_none() && status.has_plan() {
        status = SolveStatus::Infeasible;
    }

    SolveResult { status, plan, slices, statistics, violated, cause }
}
