use crate::domain::model::reconfiguration_model::ReconfigurationModel;
use crate::domain::model::slice::{Slice, SliceKind};
use crate::domain::model::transition::{SourceState, TargetState};
use crate::domain::plan::action::{Action, ActionKind, Operation};
use crate::domain::plan::timed_reconfiguration_plan::TimedReconfigurationPlan;

/// A plan together with the slices it was derived from.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub plan: TimedReconfigurationPlan,
    pub slices: Vec<Slice>,
}

/// Assigns start times to the actions implied by a complete hoster
/// assignment.
///
/// Event-driven list scheduling from `t = 0`: departures and boots start
/// immediately, an arrival starts at the first event where its destination is
/// online, not waiting for a deployment, and has room for the VM. Halts and
/// deployments start once every VM left the node. Returns `None` when the
/// actions wait on each other or do not fit the horizon.
pub fn schedule(model: &ReconfigurationModel, assignment: &[usize]) -> Option<Schedule> {
    ListScheduler::new(model, assignment).run()
}

struct ListScheduler<'a> {
    model: &'a ReconfigurationModel,
    destinations: Vec<Option<usize>>,
    actions: Vec<Option<(ActionKind, i64)>>,

    /// Start of the action of each transition, once committed.
    starts: Vec<Option<i64>>,
    node_starts: Vec<Option<i64>>,

    cpu: Vec<i64>,
    memory: Vec<i64>,
    released: Vec<bool>,
}

impl<'a> ListScheduler<'a> {
    fn new(model: &'a ReconfigurationModel, assignment: &[usize]) -> Self {
        let destinations: Vec<Option<usize>> = model.transitions.iter().map(|t| t.variable.map(|var| assignment[var])).collect();
        let actions = model.transitions.iter().zip(&destinations).map(|(t, dest)| t.action_on(*dest)).collect();

        let n = model.hosts.len();
        let mut cpu = vec![0; n];
        let mut memory = vec![0; n];
        for t in &model.transitions {
            if let SourceState::Running(h) = t.source {
                cpu[h] += t.vm.cpu_demand;
                memory[h] += t.vm.memory;
            }
        }

        ListScheduler {
            model,
            destinations,
            actions,
            starts: vec![None; model.transitions.len()],
            node_starts: vec![None; model.node_actions.len()],
            cpu,
            memory,
            released: vec![false; model.transitions.len()],
        }
    }

    fn end_of(&self, i: usize) -> Option<i64> {
        Some(self.starts[i]? + self.actions[i]?.1)
    }

    fn node_end_of(&self, a: usize) -> Option<i64> {
        Some(self.node_starts[a]? + self.model.node_actions[a].duration)
    }

    /// The VM comes to a node it does not occupy yet.
    fn is_arrival(&self, i: usize) -> bool {
        matches!(self.actions[i], Some((ActionKind::Migration | ActionKind::Resume | ActionKind::Run | ActionKind::Instantiate, _)))
    }

    /// The VM frees its running host at the end of its action.
    fn is_departure(&self, i: usize) -> bool {
        matches!(self.model.transitions[i].source, SourceState::Running(_)) && self.actions[i].is_some()
    }

    fn is_online_at(&self, node: usize, t: i64) -> bool {
        if self.model.online_now[node] {
            return true;
        }
        self.model.node_actions.iter().enumerate().any(|(a, na)| na.node == node && na.kind == ActionKind::Startup && self.node_end_of(a).is_some_and(|end| end <= t))
    }

    fn deployment_done(&self, node: usize, t: i64) -> bool {
        self.model
            .node_actions
            .iter()
            .enumerate()
            .filter(|(_, na)| na.node == node && na.kind == ActionKind::Deploy)
            .all(|(a, _)| self.node_end_of(a).is_some_and(|end| end <= t))
    }

    /// Every VM action leaving `node` is over.
    fn node_vacated(&self, node: usize, t: i64) -> bool {
        self.model
            .transitions
            .iter()
            .enumerate()
            .filter(|(i, tr)| tr.source.host() == Some(node) && self.actions[*i].is_some())
            .all(|(i, _)| self.end_of(i).is_some_and(|end| end <= t))
    }

    fn fits(&self, i: usize, node: usize) -> bool {
        let vm = &self.model.transitions[i].vm;
        let capacity = &self.model.hosts[node];
        self.cpu[node] + vm.cpu_demand <= capacity.cpu_capacity() && self.memory[node] + vm.memory <= capacity.memory
    }

    fn release_until(&mut self, t: i64) {
        for i in 0..self.model.transitions.len() {
            if self.released[i] || !self.is_departure(i) {
                continue;
            }
            if self.end_of(i).is_some_and(|end| end <= t) {
                if let SourceState::Running(h) = self.model.transitions[i].source {
                    self.cpu[h] -= self.model.transitions[i].vm.cpu_demand;
                    self.memory[h] -= self.model.transitions[i].vm.memory;
                }
                self.released[i] = true;
            }
        }
    }

    fn run(mut self) -> Option<Schedule> {
        for i in 0..self.model.transitions.len() {
            if self.actions[i].is_some() && !self.is_arrival(i) {
                self.starts[i] = Some(0);
            }
        }
        for (a, na) in self.model.node_actions.iter().enumerate() {
            if na.kind == ActionKind::Startup {
                self.node_starts[a] = Some(0);
            }
        }

        let mut t = 0;
        loop {
            self.release_until(t);

            let mut progress = true;
            while progress {
                progress = false;

                for a in 0..self.model.node_actions.len() {
                    if self.node_starts[a].is_some() {
                        continue;
                    }
                    let node = self.model.node_actions[a].node;
                    if self.node_vacated(node, t) && self.is_online_at(node, t) {
                        self.node_starts[a] = Some(t);
                        progress = true;
                    }
                }

                for i in 0..self.model.transitions.len() {
                    if self.starts[i].is_some() || !self.is_arrival(i) {
                        continue;
                    }
                    let Some(dest) = self.destinations[i] else {
                        continue;
                    };
                    if self.is_online_at(dest, t) && self.deployment_done(dest, t) && self.fits(i, dest) {
                        let vm = &self.model.transitions[i].vm;
                        self.cpu[dest] += vm.cpu_demand;
                        self.memory[dest] += vm.memory;
                        self.starts[i] = Some(t);
                        progress = true;
                    }
                }

                if progress {
                    self.release_until(t);
                }
            }

            let pending = (0..self.starts.len()).any(|i| self.actions[i].is_some() && self.starts[i].is_none()) || self.node_starts.iter().any(Option::is_none);
            if !pending {
                break;
            }

            let ends = (0..self.starts.len()).filter_map(|i| self.end_of(i)).chain((0..self.node_starts.len()).filter_map(|a| self.node_end_of(a)));
            match ends.filter(|end| *end > t).min() {
                Some(next) => t = next,
                None => {
                    log::trace!("Scheduling stalled at t={}", t);
                    return None;
                }
            }
        }

        let makespan = (0..self.starts.len()).filter_map(|i| self.end_of(i)).chain((0..self.node_starts.len()).filter_map(|a| self.node_end_of(a))).max().unwrap_or(0);
        if makespan > self.model.horizon {
            log::trace!("Schedule of makespan {} exceeds the horizon {}", makespan, self.model.horizon);
            return None;
        }

        self.into_schedule()
    }

    fn into_schedule(self) -> Option<Schedule> {
        let model = self.model;
        let node = |n: usize| model.node_id(n).cloned();
        let mut plan = TimedReconfigurationPlan::with_horizon(model.source.clone(), model.horizon);
        let mut slices = Vec::new();

        for (a, na) in model.node_actions.iter().enumerate() {
            let start = self.node_starts[a]?;
            let operation = match na.kind {
                ActionKind::Startup => Operation::Startup { node: node(na.node)? },
                ActionKind::Shutdown => Operation::Shutdown { node: node(na.node)? },
                _ => Operation::Deploy { node: node(na.node)?, platform: na.platform.clone()? },
            };
            if !plan.add(Action::new(start, start + na.duration, operation)) {
                return None;
            }
        }

        for (i, t) in model.transitions.iter().enumerate() {
            let dest = self.destinations[i];
            let start = self.starts[i].unwrap_or(0);
            let end = self.end_of(i);

            if let Some((kind, duration)) = self.actions[i] {
                let host = t.source.host().and_then(node);
                let operation = match kind {
                    ActionKind::Migration => Operation::Migration { vm: t.vm.id.clone(), from: host?, to: node(dest?)? },
                    ActionKind::Suspend => {
                        let h = host?;
                        Operation::Suspend { vm: t.vm.id.clone(), from: h.clone(), to: h }
                    }
                    ActionKind::Resume => Operation::Resume { vm: t.vm.id.clone(), from: host?, to: node(dest?)? },
                    ActionKind::Run => Operation::Run { vm: t.vm.id.clone(), node: node(dest?)? },
                    ActionKind::Stop => Operation::Stop { vm: t.vm.id.clone(), node: host? },
                    ActionKind::Instantiate => Operation::Instantiate { vm: t.vm.clone(), node: node(dest?)? },
                    ActionKind::Startup | ActionKind::Shutdown | ActionKind::Deploy => return None,
                };
                if !plan.add(Action::new(start, start + duration, operation)) {
                    return None;
                }
            }

            if let SourceState::Running(h) = t.source {
                let leave = end.filter(|_| self.is_departure(i)).unwrap_or(model.horizon);
                slices.push(Slice { vm: t.vm.id.clone(), kind: SliceKind::Consuming, hoster: h, node: node(h)?, start: 0, duration: leave, cpu: t.vm.cpu_demand, memory: t.vm.memory });
            }

            if t.target == TargetState::Running && self.is_arrival(i) {
                let d = dest?;
                slices.push(Slice {
                    vm: t.vm.id.clone(),
                    kind: SliceKind::Demanding,
                    hoster: d,
                    node: node(d)?,
                    start,
                    duration: model.horizon - start,
                    cpu: t.vm.cpu_demand,
                    memory: t.vm.memory,
                });
            }
        }

        Some(Schedule { plan, slices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::configuration::configuration::Configuration;
    use crate::domain::configuration::node::Node;
    use crate::domain::configuration::virtual_machine::VirtualMachine;
    use crate::domain::model::duration_evaluator::LinearDurationEvaluator;
    use crate::domain::model::reconfiguration_model::ModelOptions;
    use crate::domain::partition::partition::Partition;
    use crate::domain::planner::planning_request::PlanningRequest;
    use crate::domain::utils::id::NodeId;

    fn model(request: &PlanningRequest) -> ReconfigurationModel {
        let partition = Partition {
            nodes: request.source.node_ids().cloned().collect(),
            vms: request.all_vms().map(|vm| vm.id.clone()).collect(),
            constraints: Vec::new(),
        };
        ReconfigurationModel::build(request, &partition, &LinearDurationEvaluator::uniform(2), &ModelOptions::default()).unwrap()
    }

    fn starts(schedule: &Schedule) -> Vec<(ActionKind, i64, i64)> {
        schedule.plan.actions().into_iter().map(|a| (a.kind(), a.start, a.end)).collect()
    }

    #[test]
    fn swap_between_full_nodes_stalls() {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 1, 100, 1024));
        cfg.add_online(Node::new("n2", 1, 100, 1024));
        cfg.set_run_on(VirtualMachine::new("vm1", 1, 50, 1024), &NodeId::from("n1")).unwrap();
        cfg.set_run_on(VirtualMachine::new("vm2", 1, 50, 1024), &NodeId::from("n2")).unwrap();

        let model = model(&PlanningRequest::new(cfg));
        assert!(schedule(&model, &[1, 0]).is_none());
        assert!(schedule(&model, &[0, 1]).is_some_and(|s| s.plan.is_empty()));
    }

    #[test]
    fn arrival_waits_for_the_departure_it_needs() {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 1, 100, 1024));
        cfg.add_online(Node::new("n2", 1, 100, 1024));
        cfg.add_online(Node::new("n3", 1, 100, 1024));
        cfg.set_run_on(VirtualMachine::new("vm1", 1, 50, 1024), &NodeId::from("n1")).unwrap();
        cfg.set_run_on(VirtualMachine::new("vm2", 1, 50, 1024), &NodeId::from("n2")).unwrap();

        // vm1 takes the place of vm2, which goes to the empty node.
        let model = model(&PlanningRequest::new(cfg));
        let schedule = schedule(&model, &[1, 2]).unwrap();
        assert_eq!(starts(&schedule), vec![(ActionKind::Migration, 0, 2), (ActionKind::Migration, 2, 4)]);
        assert!(schedule.plan.is_valid());
    }

    #[test]
    fn boot_precedes_arrivals_and_halt_follows_departures() {
        let mut cfg = Configuration::new();
        cfg.add_online(Node::new("n1", 1, 100, 1024));
        cfg.add_offline(Node::new("n2", 1, 100, 1024));
        cfg.set_run_on(VirtualMachine::new("vm1", 1, 50, 512), &NodeId::from("n1")).unwrap();

        let model = model(&PlanningRequest::new(cfg).boot("n2").halt("n1"));
        let schedule = schedule(&model, &[1]).unwrap();

        assert_eq!(starts(&schedule), vec![(ActionKind::Startup, 0, 2), (ActionKind::Migration, 2, 4), (ActionKind::Shutdown, 4, 6)]);
        let demanding = schedule.slices.iter().find(|s| s.kind == SliceKind::Demanding).unwrap();
        assert_eq!((demanding.hoster, demanding.start), (1, 2));
    }
}
