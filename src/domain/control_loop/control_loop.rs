use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;

use crate::api::configuration_dto::ConfigurationDto;
use crate::api::vjob_dto::VJobDto;
use crate::domain::configuration::configuration::Configuration;
use crate::domain::configuration::platform::PlatformRegistry;
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::configuration::vm_builder::VirtualMachineBuilder;
use crate::domain::constraint::constraint::Constraint;
use crate::domain::constraint::platform_compatibility::PlatformCompatibility;
use crate::domain::control_loop::control_loop_config::ControlLoopConfig;
use crate::domain::control_loop::executor::PlanExecutor;
use crate::domain::control_loop::monitor::{ConfigurationMonitor, FileConfigurationMonitor};
use crate::domain::control_loop::vjob::VJob;
use crate::domain::control_loop::vjob_queue::VJobQueue;
use crate::domain::model::duration_evaluator::{DurationEvaluator, LinearDurationEvaluator};
use crate::domain::model::reconfiguration_model::ModelOptions;
use crate::domain::model::search::{SearchBudget, SolveResult, SolveStatus};
use crate::domain::partition::partitioner::Partitioner;
use crate::domain::plan::dot::to_dot;
use crate::domain::plan::timed_reconfiguration_plan::TimedReconfigurationPlan;
use crate::domain::planner::planner::Planner;
use crate::domain::planner::planning_request::PlanningRequest;
use crate::domain::utils::id::{VJobId, VmId};
use crate::domain::utils::statistics::{ANALYTICS_TARGET, StatParameter, StatisticEvent, StatsCollector};
use crate::error::{Error, ExecutionError, Result};
use crate::loader::parser::write_json_file;
use crate::loader::properties::Properties;

const STATS_FILE: &str = "cycles.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    BuildProblem,
    Solve,
    PlanFound,
    PlanInfeasible,
    Execute,
    BackOff,
}

/// What one cycle ended with.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No queued VJob, no violation: nothing planned.
    Idle,
    /// Plan applied, admitted VJobs are now running.
    Executed { actions: usize, admitted: Vec<VJobId> },
    /// Plan computed and logged only.
    DryRun { actions: usize, admitted: Vec<VJobId> },
    /// No plan within the planning timeout.
    Infeasible { status: SolveStatus },
    /// The driver failed; a re-plan is forced on the next tick.
    ExecutionFailed(ExecutionError),
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::Idle => write!(f, "idle"),
            CycleOutcome::Executed { actions, admitted } => write!(f, "executed {} actions, {} VJobs admitted", actions, admitted.len()),
            CycleOutcome::DryRun { actions, admitted } => write!(f, "dry run of {} actions, {} VJobs would be admitted", actions, admitted.len()),
            CycleOutcome::Infeasible { status } => write!(f, "no plan ({})", status),
            CycleOutcome::ExecutionFailed(e) => write!(f, "execution failed: {}", e),
        }
    }
}

/// Observes the datacenter, admits queued VJobs and keeps the running ones
/// satisfied by planning and executing reconfigurations.
pub struct ControlLoop {
    config: ControlLoopConfig,
    monitor: Arc<dyn ConfigurationMonitor>,
    queue: VJobQueue,
    planner: Planner,
    executor: PlanExecutor,
    builder: VirtualMachineBuilder,
    stats: Option<StatsCollector>,

    state: LoopState,
    cycle: u64,
    replan_now: bool,
}

impl ControlLoop {
    pub fn new(
        config: ControlLoopConfig,
        monitor: Arc<dyn ConfigurationMonitor>,
        queue: VJobQueue,
        planner: Planner,
        executor: PlanExecutor,
        builder: VirtualMachineBuilder,
    ) -> Result<Self> {
        fs::create_dir_all(&config.logs_dir)?;
        let stats = match StatsCollector::init(Some(config.logs_dir.join(STATS_FILE))) {
            Ok(stats) => Some(stats),
            Err(e) => {
                log::warn!("Cycle statistics disabled: {}", e);
                None
            }
        };

        Ok(ControlLoop { config, monitor, queue, planner, executor, builder, stats, state: LoopState::Idle, cycle: 0, replan_now: false })
    }

    /// Wires every collaborator from the configuration: file monitor, queue,
    /// durations, platform registry and driver.
    pub fn from_config(config: ControlLoopConfig) -> Result<Self> {
        let evaluator: Arc<dyn DurationEvaluator> = match &config.durations {
            Some(path) => Arc::new(LinearDurationEvaluator::from_properties(&Properties::load(path)?)?),
            None => {
                log::warn!("No durations configured, every action lasts one time unit");
                Arc::new(LinearDurationEvaluator::uniform(1))
            }
        };

        let builder = if config.platforms.is_empty() {
            VirtualMachineBuilder::new()
        } else {
            VirtualMachineBuilder::with_registry(PlatformRegistry::with_ids(config.platforms.iter().map(|p| p.as_str()))?)
        };

        let options = ModelOptions { horizon: config.horizon, optimize: config.optimize, repair: true };
        let driver = config.driver.get_instance(config.snapshot_path.as_deref())?;

        ControlLoop::new(
            config.clone(),
            Arc::new(FileConfigurationMonitor::new(&config.configuration_path)),
            VJobQueue::open(&config.vjobs_path)?,
            Planner::new(evaluator, options),
            PlanExecutor::new(driver, config.assign_timeout),
            builder,
        )
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn queue(&self) -> &VJobQueue {
        &self.queue
    }

    pub fn config(&self) -> &ControlLoopConfig {
        &self.config
    }

    /// Ticks every `prediction.step` until `shutdown` flips or its sender is
    /// dropped. Cycle errors are logged, never fatal.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.prediction_step);
        log::info!("{} control loop started, ticking every {:?}", self.config.loop_type, self.config.prediction_step);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Control loop shutting down after {} cycles", self.cycle);
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(outcome) => log::info!("Cycle {}: {}", self.cycle, outcome),
                        Err(e) => {
                            log::error!("Cycle {} failed: {}", self.cycle, e);
                            self.state = LoopState::Idle;
                        }
                    }
                }
            }
        }
    }

    /// **One control loop turn.**
    ///
    /// Observes the configuration, re-checks the running VJobs, then plans
    /// when VJobs are queued, a running VJob is violated, the loop is
    /// periodic or the previous execution failed.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        self.cycle += 1;
        self.state = LoopState::BuildProblem;

        let source = self.monitor.current().await?;
        write_json_file(self.config.logs_dir.join(format!("configuration-{}.json", self.cycle)), &ConfigurationDto::from(&source))?;

        // ---------- Running VJobs ----------
        let running = self.running_vjobs(&source)?;
        let running_constraints: Vec<Constraint> = running.iter().flat_map(|vjob| vjob.constraints.iter().cloned()).collect();
        let violated: usize = running.iter().map(|vjob| vjob.violated(&source).len()).sum();
        if violated > 0 {
            log::warn!("{} constraints of running VJobs are violated", violated);
        }

        let queued = self.queue.queued();
        let needs_plan = !queued.is_empty() || violated > 0 || self.config.loop_type.plans_every_tick() || self.replan_now;
        if !needs_plan {
            self.state = LoopState::Idle;
            return Ok(CycleOutcome::Idle);
        }

        // ---------- Candidates ----------
        let candidates = self.admissible_candidates(&source, &queued, &running)?;
        log::info!("Cycle {}: {} candidate VJobs, {} running", self.cycle, candidates.len(), running.len());

        // ---------- Solve ----------
        self.state = LoopState::Solve;
        let deadline = Instant::now() + self.config.plan_timeout;
        let mut admitted = candidates;
        let (result, partitions) = loop {
            let request = self.request(&source, &running_constraints, &admitted);
            let (result, partitions) = self.solve(request, SearchBudget::with_deadline(deadline)).await?;

            if result.plan.is_some() || admitted.is_empty() || Instant::now() >= deadline {
                break (result, partitions);
            }
            if let Some(dropped) = admitted.pop() {
                log::warn!("No plan with VJob {} ({}), retrying without it", dropped.id, result.status);
            }
        };
        self.replan_now = false;

        let Some(plan) = result.plan.clone() else {
            self.state = LoopState::PlanInfeasible;
            log::error!("No reconfiguration plan found ({})", result.status);
            for constraint in &result.violated {
                log::error!("  violated by the current configuration: {}", constraint);
            }
            if let Some(cause) = &result.cause {
                log::error!("  cause: {}", cause);
            }
            self.record(&result, partitions, None, false);
            self.state = LoopState::BackOff;
            return Ok(CycleOutcome::Infeasible { status: result.status });
        };

        self.state = LoopState::PlanFound;
        fs::write(self.config.logs_dir.join(format!("plan-{}.dot", self.cycle)), to_dot(&plan))?;
        let admitted_ids: Vec<VJobId> = admitted.iter().map(|vjob| vjob.id.clone()).collect();

        // ---------- Execute ----------
        let outcome = if self.config.reconfigure {
            self.state = LoopState::Execute;
            match self.executor.execute(&plan).await {
                Ok(actions) => {
                    for id in &admitted_ids {
                        self.queue.mark_running(id)?;
                    }
                    CycleOutcome::Executed { actions, admitted: admitted_ids }
                }
                Err(e) => {
                    log::error!("Plan execution failed, re-planning on the next tick: {}", e);
                    self.replan_now = true;
                    CycleOutcome::ExecutionFailed(e)
                }
            }
        } else {
            for action in plan.actions() {
                log::info!("[dry run] {}", action);
            }
            CycleOutcome::DryRun { actions: plan.len(), admitted: admitted_ids }
        };

        self.record(&result, partitions, Some(&plan), matches!(outcome, CycleOutcome::Executed { .. }));
        self.state = LoopState::Idle;
        Ok(outcome)
    }

    /// Running VJobs, built back from their sources. VJobs whose VMs all left
    /// the configuration are completed.
    fn running_vjobs(&self, source: &Configuration) -> Result<Vec<VJob>> {
        let mut running = Vec::new();
        for dto in self.queue.running() {
            let vjob = match VJob::build(&dto, &self.builder, source) {
                Ok(vjob) => vjob,
                Err(e) => {
                    log::warn!("Running VJob {:?} cannot be rebuilt: {}", dto.id, e);
                    continue;
                }
            };

            if vjob.vms.iter().all(|vm| !source.contains_vm(&vm.id)) {
                self.queue.complete(&vjob.id)?;
                continue;
            }
            running.push(vjob);
        }
        Ok(running)
    }

    /// Queued VJobs in FIFO order whose VMs can be built and whose constraints
    /// partition together with the running ones. Unbuildable VJobs and VJobs
    /// claiming a VM they do not own are rejected; VJobs conflicting with the
    /// current partitioning stay queued.
    fn admissible_candidates(&self, source: &Configuration, queued: &[VJobDto], running: &[VJob]) -> Result<Vec<VJob>> {
        let mut claimed: BTreeSet<VmId> = running.iter().flat_map(VJob::vm_ids).collect();
        let mut built = Vec::new();
        for dto in queued {
            let vjob = match VJob::build(dto, &self.builder, source) {
                Ok(vjob) => vjob,
                Err(e @ (Error::Build(_) | Error::Conversion(_))) => {
                    let id = VJobId::new(dto.id.clone().unwrap_or_default());
                    self.queue.reject(&id, &e.to_string())?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match vjob.vms.iter().find(|vm| claimed.contains(&vm.id) || !owns(source, vm)) {
                Some(vm) => {
                    self.queue.reject(&vjob.id, &format!("VM {} is already owned by another VJob", vm.id))?;
                }
                None => {
                    claimed.extend(vjob.vm_ids());
                    built.push(vjob);
                }
            }
        }

        let running_constraints: Vec<Constraint> = running.iter().flat_map(|vjob| vjob.constraints.iter().cloned()).collect();
        let new_vms: Vec<_> = built.iter().flat_map(|vjob| vjob.vms.iter()).filter(|vm| !source.contains_vm(&vm.id)).cloned().collect();
        let mut partitioner = Partitioner::new(source, &new_vms, &Default::default());
        for constraint in &running_constraints {
            if let Err(e) = partitioner.part(constraint) {
                log::warn!("Running constraint {} cannot be partitioned: {}", constraint, e);
            }
        }

        let mut candidates = Vec::new();
        for vjob in built {
            let snapshot = partitioner.clone();
            match vjob.constraints.iter().try_for_each(|c| partitioner.part(c)) {
                Ok(()) => candidates.push(vjob),
                Err(e) => {
                    log::warn!("VJob {} conflicts with the current partitioning, kept queued: {}", vjob.id, e);
                    partitioner = snapshot;
                }
            }
        }
        Ok(candidates)
    }

    fn request(&self, source: &Configuration, running_constraints: &[Constraint], admitted: &[VJob]) -> PlanningRequest {
        let mut request = PlanningRequest::new(source.clone());
        request.constraints.extend(running_constraints.iter().cloned());

        for vjob in admitted {
            for vm in &vjob.vms {
                request = if source.contains_vm(&vm.id) { request.run(vm.id.clone()) } else { request.instantiate(vm.clone()) };
            }
            request.constraints.extend(vjob.constraints.iter().cloned());
        }

        if !self.config.platforms.is_empty() {
            let vms: Vec<_> = request.all_vms().map(|vm| vm.id.clone()).collect();
            let platform = PlatformCompatibility::new(vms, source.node_ids().cloned());
            request = request.constrain(platform);
        }
        request
    }

    async fn solve(&self, request: PlanningRequest, budget: SearchBudget) -> Result<(SolveResult, usize)> {
        let partitions = match self.planner.partition(&request) {
            Ok(partitions) => partitions,
            Err(e) => {
                log::warn!("Request cannot be partitioned: {}", e);
                return Ok((infeasible_result(), 0));
            }
        };
        let count = partitions.len();
        let result = self.planner.solve_partitions(Arc::new(request), partitions, budget).await?;
        Ok((result, count))
    }

    fn record(&self, result: &SolveResult, partitions: usize, plan: Option<&TimedReconfigurationPlan>, executed: bool) {
        let actions = plan.map(TimedReconfigurationPlan::len).unwrap_or(0);
        let makespan = plan.map(TimedReconfigurationPlan::duration).unwrap_or(0);
        let solving_time = result.statistics.elapsed.as_millis() as i64;

        tracing::info!(
            target: ANALYTICS_TARGET,
            LogDescription = "Control loop cycle finished",
            Cycle = self.cycle,
            LoopType = %self.config.loop_type,
            Partitions = partitions,
            Status = %result.status,
            Actions = actions,
            Makespan = makespan,
            ExploredNodes = result.statistics.nodes,
            Backtracks = result.statistics.backtracks,
            SolvingTime = solving_time,
            Executed = executed,
        );

        let Some(stats) = &self.stats else {
            return;
        };
        let mut event = StatisticEvent::new();
        event
            .set(StatParameter::LogDescription, "Control loop cycle finished")
            .set(StatParameter::Cycle, self.cycle)
            .set(StatParameter::LoopType, self.config.loop_type.as_str())
            .set(StatParameter::Partitions, partitions)
            .set(StatParameter::Status, result.status.to_string())
            .set(StatParameter::Actions, actions)
            .set(StatParameter::Makespan, makespan)
            .set(StatParameter::ExploredNodes, result.statistics.nodes)
            .set(StatParameter::Backtracks, result.statistics.backtracks)
            .set(StatParameter::SolvingTime, solving_time)
            .set(StatParameter::QueuedVJobs, self.queue.queued_len())
            .set(StatParameter::RunningVJobs, self.queue.running_len())
            .set(StatParameter::Executed, executed);
        if let Some(objective) = result.statistics.objective {
            event.set(StatParameter::Objective, objective);
        }
        stats.add_event(event);
        stats.flush();
    }
}

/// True when `vm` is new to the configuration, or is already there with the
/// same definition, left by an earlier cycle of its own VJob.
fn owns(source: &Configuration, vm: &VirtualMachine) -> bool {
    source.get_vm(&vm.id).is_none_or(|known| known.nb_cpus == vm.nb_cpus && known.memory == vm.memory && known.cpu_demand == vm.cpu_demand && known.platform == vm.platform)
}

fn infeasible_result() -> SolveResult {
    SolveResult {
        status: SolveStatus::Infeasible,
        plan: None,
        slices: Vec::new(),
        statistics: Default::default(),
        violated: Vec::new(),
        cause: None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::domain::control_loop::control_loop_type::ControlLoopType;
    use crate::domain::control_loop::driver::DriverType;

    fn periodic_config(dir: &std::path::Path) -> ControlLoopConfig {
        let configuration_path = dir.join("configuration.json");
        fs::write(&configuration_path, r#"{ "nodes": [ { "id": "n1", "nbCpus": 1, "cpuRate": 100, "memory": 1024 } ] }"#).unwrap();

        ControlLoopConfig {
            loop_type: ControlLoopType::Periodic,
            logs_dir: dir.join("logs"),
            vjobs_path: dir.join("vjobs"),
            configuration_path,
            assign_timeout: Duration::from_secs(5),
            plan_timeout: Duration::from_secs(5),
            prediction_step: Duration::from_millis(10),
            reconfigure: true,
            driver: DriverType::Logging,
            snapshot_path: None,
            durations: None,
            horizon: None,
            optimize: false,
            platforms: Vec::new(),
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn periodic_loop_plans_every_tick_and_reports_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut control_loop = ControlLoop::from_config(periodic_config(dir.path())).unwrap();

        assert_eq!(control_loop.run_cycle().await.unwrap(), CycleOutcome::Executed { actions: 0, admitted: Vec::new() });
        assert_eq!(control_loop.state(), LoopState::Idle);
        assert!(logs_contain("Control loop cycle finished"));

        drop(control_loop);
        let stats = fs::read_to_string(dir.path().join("logs").join(STATS_FILE)).unwrap();
        assert!(stats.lines().count() >= 2);
    }

    #[tokio::test]
    async fn run_stops_when_shutdown_is_signalled() {
        let dir = tempfile::tempdir().unwrap();
        let mut control_loop = ControlLoop::from_config(periodic_config(dir.path())).unwrap();
        let (tx, rx) = watch::channel(false);

        let stop = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send(true).unwrap();
        };
        let run = control_loop.run(rx);
        tokio::time::timeout(Duration::from_secs(5), async move { tokio::join!(run, stop) }).await.unwrap();

        assert!(control_loop.cycle >= 1);
    }
}
