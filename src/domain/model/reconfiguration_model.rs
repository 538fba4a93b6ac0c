use std::collections::{BTreeMap, BTreeSet};

use bimap::BiMap;

use crate::domain::configuration::configuration::{Configuration, VmState};
use crate::domain::configuration::node::Node;
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::constraint::constraint::Constraint;
use crate::domain::constraint::placement_constraint_trait::PlacementConstraint;
use crate::domain::model::duration_evaluator::DurationEvaluator;
use crate::domain::model::hoster_domains::HosterDomains;
use crate::domain::model::transition::{SourceState, TargetState, Transition, transition};
use crate::domain::partition::partition::Partition;
use crate::domain::plan::action::ActionKind;
use crate::domain::planner::planning_request::PlanningRequest;
use crate::domain::utils::id::{NodeId, PlatformId, VmId};
use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelOptions {
    /// Upper bound on the end of every action. Computed from the durations
    /// when absent.
    pub horizon: Option<i64>,

    /// Minimize the total cost of the actions instead of stopping at the
    /// first plan.
    pub optimize: bool,

    /// Pin the running VMs no constraint reports as misplaced.
    pub repair: bool,
}

/// What happens to one VM.
#[derive(Debug, Clone)]
pub struct VmTransition {
    pub vm: VirtualMachine,
    pub source: SourceState,
    pub target: TargetState,

    /// Hoster variable, for VMs that stay hosted.
    pub variable: Option<usize>,

    /// Action and duration when the VM ends on its current host.
    pub on_same_node: Option<(ActionKind, i64)>,

    /// Action and duration when the VM ends elsewhere, or has no host at all.
    pub on_other_node: Option<(ActionKind, i64)>,
}

impl VmTransition {
    pub fn action_on(&self, node: Option<usize>) -> Option<(ActionKind, i64)> {
        match (node, self.source.host()) {
            (Some(n), Some(h)) if n == h => self.on_same_node,
            _ => self.on_other_node,
        }
    }

    pub fn cost_on(&self, node: Option<usize>) -> i64 {
        self.action_on(node).map(|(_, d)| d).unwrap_or(0)
    }

    /// Whether the VM consumes CPU and memory once the plan is applied.
    pub fn is_running_after(&self) -> bool {
        self.target == TargetState::Running
    }
}

/// A node action decided when the model is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTransition {
    pub node: usize,
    pub kind: ActionKind,
    pub platform: Option<PlatformId>,
    pub duration: i64,
}

/// Among posted on hoster variables. `group_var` ranges over the groups
/// still possible for the whole set.
#[derive(Debug, Clone)]
pub struct AmongPropagator {
    pub vars: Vec<usize>,
    pub groups: Vec<BTreeSet<usize>>,
    pub group_var: usize,
}

/// The reconfiguration problem of one partition.
///
/// Nodes are indexed `0..n` in the order of the partition. Every VM that is
/// hosted once the plan is applied gets a hoster variable whose domain is a
/// set of node indices. Domains are narrowed in three steps: static filtering
/// (nodes going offline, nodes being redeployed, capacities), constraint
/// injection, then the search.
#[derive(Debug, Clone)]
pub struct ReconfigurationModel {
    pub(crate) source: Configuration,
    pub(crate) nodes: BiMap<NodeId, usize>,

    /// Nodes as they are once the plan is applied, platform included.
    pub(crate) hosts: Vec<Node>,
    pub(crate) online_now: Vec<bool>,
    pub(crate) online_after: Vec<bool>,
    pub(crate) node_actions: Vec<NodeTransition>,

    pub(crate) transitions: Vec<VmTransition>,
    pub(crate) vm_index: BTreeMap<VmId, usize>,
    /// Transition owning each hoster variable.
    pub(crate) owners: Vec<usize>,

    pub(crate) domains: HosterDomains,
    pub(crate) amongs: Vec<AmongPropagator>,
    pub(crate) constraints: Vec<Constraint>,

    pub(crate) horizon: i64,
    pub(crate) optimize: bool,
}

impl ReconfigurationModel {
    /// **Phase 1: Nodes.** Indexes the nodes and derives their boot, halt and
    /// deploy actions from the node targets.
    ///
    /// **Phase 2: VMs.** Resolves source and target states, durations and the
    /// statically filtered hoster domains.
    ///
    /// **Phase 3: Constraints.** Injects the constraints of the partition,
    /// pins the well placed VMs in repair mode and checks that no domain is
    /// empty.
    pub fn build(request: &PlanningRequest, partition: &Partition, evaluator: &dyn DurationEvaluator, options: &ModelOptions) -> Result<Self, ModelError> {
        let source = &request.source;

        let mut model = ReconfigurationModel {
            source: source.clone(),
            nodes: BiMap::new(),
            hosts: Vec::with_capacity(partition.nodes.len()),
            online_now: Vec::with_capacity(partition.nodes.len()),
            online_after: Vec::with_capacity(partition.nodes.len()),
            node_actions: Vec::new(),
            transitions: Vec::with_capacity(partition.vms.len()),
            vm_index: BTreeMap::new(),
            owners: Vec::new(),
            domains: HosterDomains::new(),
            amongs: Vec::new(),
            constraints: partition.constraints.clone(),
            horizon: 0,
            optimize: options.optimize,
        };

        // ---------- Phase 1: Nodes ----------
        let mut deploying = vec![false; partition.nodes.len()];
        for (i, id) in partition.nodes.iter().enumerate() {
            let node = source.get_node(id).ok_or_else(|| ModelError::UnknownNode(id.clone()))?;
            let online_now = source.is_online(id);
            let online_after = request.node_targets.online.get(id).copied().unwrap_or(online_now);
            let mut host = node.clone();

            if online_after && !online_now {
                model.node_actions.push(NodeTransition { node: i, kind: ActionKind::Startup, platform: None, duration: evaluator.evaluate_node(ActionKind::Startup, node)? });
            } else if !online_after && online_now {
                model.node_actions.push(NodeTransition { node: i, kind: ActionKind::Shutdown, platform: None, duration: evaluator.evaluate_node(ActionKind::Shutdown, node)? });
            }

            if let Some(platform) = request.node_targets.platforms.get(id) {
                if node.platform.as_ref() != Some(platform) {
                    if !online_after || !node.can_deploy(platform) {
                        return Err(ModelError::UndeployablePlatform { node: id.clone(), platform: platform.clone() });
                    }
                    let duration = evaluator.evaluate_node(ActionKind::Deploy, node)?;
                    model.node_actions.push(NodeTransition { node: i, kind: ActionKind::Deploy, platform: Some(platform.clone()), duration });
                    host.platform = Some(platform.clone());
                    deploying[i] = true;
                }
            }

            model.nodes.insert(id.clone(), i);
            model.hosts.push(host);
            model.online_now.push(online_now);
            model.online_after.push(online_after);
        }

        // ---------- Phase 2: VMs ----------
        for vm_id in &partition.vms {
            let (vm, source_state) = match source.get_vm(vm_id) {
                Some(vm) => (vm.clone(), model.source_state(vm_id)?),
                None => {
                    let vm = request.new_vms.iter().find(|vm| &vm.id == vm_id).ok_or_else(|| ModelError::UnknownVm(vm_id.clone()))?;
                    (vm.clone(), SourceState::Absent)
                }
            };
            let target = request.target_of(vm_id).ok_or_else(|| ModelError::UnknownVm(vm_id.clone()))?;
            model.add_transition(vm, source_state, target, evaluator, &deploying)?;
        }

        // ---------- Phase 3: Constraints ----------
        let constraints = model.constraints.clone();
        for constraint in &constraints {
            constraint.inject(&mut model)?;
        }

        if options.repair {
            model.pin_well_placed();
        }

        model.check_domains()?;
        model.domains.commit();

        model.horizon = options.horizon.unwrap_or_else(|| model.worst_case_makespan());
        log::debug!(
            "Model built: {} nodes, {} VMs, {} hoster variables, horizon {}",
            model.hosts.len(),
            model.transitions.len(),
            model.owners.len(),
            model.horizon
        );
        Ok(model)
    }

    fn source_state(&self, vm: &VmId) -> Result<SourceState, ModelError> {
        let index = |node: &NodeId| self.nodes.get_by_left(node).copied().ok_or_else(|| ModelError::UnknownNode(node.clone()));
        match self.source.state_of(vm) {
            Some(VmState::Running(node)) => Ok(SourceState::Running(index(node)?)),
            Some(VmState::Sleeping(node)) => Ok(SourceState::Sleeping(index(node)?)),
            Some(VmState::Waiting) => Ok(SourceState::Waiting),
            None => Ok(SourceState::Absent),
        }
    }

    fn add_transition(&mut self, vm: VirtualMachine, source: SourceState, target: TargetState, evaluator: &dyn DurationEvaluator, deploying: &[bool]) -> Result<(), ModelError> {
        let unsupported = || ModelError::UnsupportedTransition { vm: vm.id.clone(), from: source.to_string(), to: target.to_string() };
        let resolve = |t: Transition| -> Result<Option<Option<(ActionKind, i64)>>, ModelError> {
            match t {
                Transition::Stay => Ok(Some(None)),
                Transition::Action(kind) => Ok(Some(Some((kind, evaluator.evaluate(kind, &vm)?)))),
                Transition::Unsupported => Ok(None),
            }
        };

        let same = match source.host() {
            Some(_) if target.is_hosted() => resolve(transition(source, target, true))?,
            _ => None,
        };
        let other = resolve(transition(source, target, false))?;

        if same.is_none() && other.is_none() {
            return Err(unsupported());
        }

        let mut variable = None;
        if target.is_hosted() {
            let var = self.domains.add_variable(self.hosts.len());
            let host = source.host();
            let running = target == TargetState::Running;

            for n in 0..self.hosts.len() {
                let allowed = self.online_after[n]
                    && !(host == Some(n) && deploying[n])
                    && (!running || self.hosts[n].can_host(&vm))
                    && if host == Some(n) { same.is_some() } else { other.is_some() };
                if !allowed {
                    self.domains.remove(var, n);
                }
            }

            variable = Some(var);
            self.owners.push(self.transitions.len());
        }

        self.vm_index.insert(vm.id.clone(), self.transitions.len());
        self.transitions.push(VmTransition { vm, source, target, variable, on_same_node: same.flatten(), on_other_node: other.flatten() });
        Ok(())
    }

    fn pin_well_placed(&mut self) {
        let misplaced: BTreeSet<VmId> = self.constraints.iter().flat_map(|c| c.get_misplaced(&self.source)).collect();

        let mut pinned = 0;
        for t in &self.transitions {
            if let (SourceState::Running(host), TargetState::Running, Some(var)) = (t.source, t.target, t.variable) {
                if !misplaced.contains(&t.vm.id) && self.domains.instantiate(var, host) {
                    pinned += 1;
                }
            }
        }
        log::debug!("Repair mode: {} VMs pinned, {} misplaced", pinned, misplaced.len());
    }

    fn check_domains(&mut self) -> Result<(), ModelError> {
        for p in 0..self.amongs.len() {
            if !self.propagate_among(p) {
                let vm = self.amongs[p].vars.first().map(|v| self.transitions[self.owners[*v]].vm.id.clone());
                if let Some(vm) = vm {
                    return Err(ModelError::NoEligibleHost(vm));
                }
            }
        }

        for (var, owner) in self.owners.iter().enumerate() {
            if self.domains.is_empty(var) {
                return Err(ModelError::NoEligibleHost(self.transitions[*owner].vm.id.clone()));
            }
        }
        Ok(())
    }

    /// Sum of every duration, an upper bound of any schedule's makespan.
    fn worst_case_makespan(&self) -> i64 {
        let nodes: i64 = self.node_actions.iter().map(|a| a.duration).sum();
        let vms: i64 = self.transitions.iter().map(|t| t.on_same_node.map(|(_, d)| d).unwrap_or(0).max(t.on_other_node.map(|(_, d)| d).unwrap_or(0))).sum();
        nodes + vms
    }

    //---------------------------------
    // --- Constraint-facing methods ---
    //---------------------------------
    /// Indices of the nodes of the model among `nodes`.
    pub fn node_indices(&self, nodes: &BTreeSet<NodeId>) -> BTreeSet<usize> {
        nodes.iter().filter_map(|n| self.nodes.get_by_left(n).copied()).collect()
    }

    pub fn node_index(&self, node: &NodeId) -> Option<usize> {
        self.nodes.get_by_left(node).copied()
    }

    pub fn node_id(&self, index: usize) -> Option<&NodeId> {
        self.nodes.get_by_right(&index)
    }

    pub fn node_count(&self) -> usize {
        self.hosts.len()
    }

    /// Hoster variable of a VM that will be running.
    pub fn running_variable(&self, vm: &VmId) -> Option<usize> {
        let t = &self.transitions[*self.vm_index.get(vm)?];
        if t.is_running_after() { t.variable } else { None }
    }

    /// Keeps only `allowed` in the domain of a VM that will be running.
    /// VMs outside the model, or not running afterwards, are left alone.
    pub fn restrict(&mut self, vm: &VmId, allowed: &BTreeSet<usize>) {
        if let Some(var) = self.running_variable(vm) {
            self.domains.retain(var, |n| allowed.contains(&n));
        }
    }

    pub fn post_among(&mut self, vms: &BTreeSet<VmId>, groups: Vec<BTreeSet<usize>>) {
        let vars: Vec<usize> = vms.iter().filter_map(|vm| self.running_variable(vm)).collect();
        if vars.is_empty() {
            return;
        }

        let groups: Vec<BTreeSet<usize>> = groups.into_iter().filter(|g| !g.is_empty()).collect();
        let group_var = self.domains.add_variable(groups.len());
        self.amongs.push(AmongPropagator { vars, groups, group_var });
    }

    /// Platform of every node once the deployments are done.
    pub fn node_platforms_after(&self) -> Vec<(NodeId, Option<PlatformId>)> {
        self.hosts.iter().map(|n| (n.id.clone(), n.platform.clone())).collect()
    }

    /// VMs that will be running once the plan is applied.
    pub fn running_targets(&self) -> impl Iterator<Item = &VirtualMachine> {
        self.transitions.iter().filter(|t| t.is_running_after()).map(|t| &t.vm)
    }

    pub fn source(&self) -> &Configuration {
        &self.source
    }

    pub fn horizon(&self) -> i64 {
        self.horizon
    }

    pub fn transitions(&self) -> &[VmTransition] {
        &self.transitions
    }

    pub fn node_actions(&self) -> &[NodeTransition] {
        &self.node_actions
    }

    pub fn domain_of(&self, vm: &VmId) -> Option<Vec<usize>> {
        let t = &self.transitions[*self.vm_index.get(vm)?];
        t.variable.map(|var| self.domains.values(var))
    }

    //---------------------------------
    // ----- Search-facing methods -----
    //---------------------------------
    /// Kills the groups some member can no longer reach and restricts the
    /// members to the union of the surviving groups. Returns `false` on a
    /// wipe-out.
    pub(crate) fn propagate_among(&mut self, p: usize) -> bool {
        let AmongPropagator { vars, groups, group_var } = &self.amongs[p];
        let group_var = *group_var;

        let dead: Vec<usize> = self
            .domains
            .values(group_var)
            .into_iter()
            .filter(|g| vars.iter().any(|var| !groups[*g].iter().any(|n| self.domains.contains(*var, *n))))
            .collect();
        for g in dead {
            self.domains.remove(group_var, g);
        }
        if self.domains.is_empty(group_var) {
            return false;
        }

        let alive: BTreeSet<usize> = self.domains.values(group_var).into_iter().flat_map(|g| self.amongs[p].groups[g].iter().copied()).collect();
        for var in self.amongs[p].vars.clone() {
            self.domains.retain(var, |n| alive.contains(&n));
            if self.domains.is_empty(var) {
                return false;
            }
        }
        true
    }

    /// Fixed cost of the node actions and of the VMs without variable.
    pub(crate) fn fixed_cost(&self) -> i64 {
        let nodes: i64 = self.node_actions.iter().map(|a| a.duration).sum();
        let vms: i64 = self.transitions.iter().filter(|t| t.variable.is_none()).map(|t| t.cost_on(None)).sum();
        nodes + vms
    }

    /// Cheapest cost still reachable by the VM owning `var`.
    pub(crate) fn min_cost(&self, var: usize) -> i64 {
        let t = &self.transitions[self.owners[var]];
        let on_host = t.source.host().filter(|h| self.domains.contains(var, *h));
        let elsewhere = self.domains.size(var) > usize::from(on_host.is_some());

        match (on_host, elsewhere) {
            (Some(h), true) => t.cost_on(Some(h)).min(t.cost_on(None)),
            (Some(h), false) => t.cost_on(Some(h)),
            (None, _) => t.cost_on(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::configuration::node::Node;
    use crate::domain::constraint::fence::Fence;
    use crate::domain::model::duration_evaluator::LinearDurationEvaluator;

    fn source() -> Configuration {
        let mut cfg = Configuration::new();
        for n in ["n1", "n2", "n3"] {
            cfg.add_online(Node::new(n, 2, 100, 2048));
        }
        cfg.set_run_on(VirtualMachine::new("vm1", 1, 50, 512), &NodeId::from("n1")).unwrap();
        cfg.set_run_on(VirtualMachine::new("vm2", 1, 50, 512), &NodeId::from("n2")).unwrap();
        cfg
    }

    fn build(request: &PlanningRequest, evaluator: &LinearDurationEvaluator, options: ModelOptions) -> Result<ReconfigurationModel, ModelError> {
        let partition = Partition {
            nodes: request.source.node_ids().cloned().collect(),
            vms: request.all_vms().map(|vm| vm.id.clone()).collect(),
            constraints: request.constraints.clone(),
        };
        ReconfigurationModel::build(request, &partition, evaluator, &options)
    }

    #[test]
    fn repair_pins_the_well_placed_vms() {
        let request = PlanningRequest::new(source()).constrain(Fence::new(["vm2"], ["n3"]));
        let model = build(&request, &LinearDurationEvaluator::uniform(2), ModelOptions { repair: true, ..Default::default() }).unwrap();

        assert_eq!(model.domain_of(&"vm1".into()), Some(vec![0]));
        assert_eq!(model.domain_of(&"vm2".into()), Some(vec![2]));
        assert_eq!(model.horizon(), 4);
    }

    #[test]
    fn sleeping_vms_stay_with_their_image() {
        let mut cfg = source();
        cfg.set_sleep_on(VirtualMachine::new("vm3", 1, 50, 512), &NodeId::from("n2")).unwrap();

        let model = build(&PlanningRequest::new(cfg), &LinearDurationEvaluator::uniform(2), ModelOptions::default()).unwrap();
        assert_eq!(model.domain_of(&"vm3".into()), Some(vec![1]));
        assert_eq!(model.running_variable(&"vm3".into()), None);
    }

    #[test]
    fn vm_larger_than_any_node_has_no_host() {
        let request = PlanningRequest::new(source()).instantiate(VirtualMachine::new("big", 1, 50, 4096));
        let err = build(&request, &LinearDurationEvaluator::uniform(2), ModelOptions::default()).unwrap_err();
        assert_eq!(err, ModelError::NoEligibleHost("big".into()));
    }

    #[test]
    fn deploying_an_unavailable_platform_fails() {
        let request = PlanningRequest::new(source()).deploy("n3", "kvm");
        let err = build(&request, &LinearDurationEvaluator::uniform(2), ModelOptions::default()).unwrap_err();
        assert_eq!(err, ModelError::UndeployablePlatform { node: "n3".into(), platform: "kvm".into() });
    }

    #[test]
    fn missing_duration_fails_before_search() {
        let evaluator = LinearDurationEvaluator::new().with(ActionKind::Migration, 1, 0);
        let request = PlanningRequest::new(source()).instantiate(VirtualMachine::new("vm3", 1, 50, 512));
        assert!(matches!(build(&request, &evaluator, ModelOptions::default()), Err(ModelError::MissingDuration(_))));
    }

    #[test]
    fn halted_nodes_leave_every_domain() {
        let request = PlanningRequest::new(source()).halt("n3");
        let model = build(&request, &LinearDurationEvaluator::uniform(2), ModelOptions::default()).unwrap();

        assert_eq!(model.domain_of(&"vm1".into()), Some(vec![0, 1]));
        assert_eq!(model.node_actions().len(), 1);
        assert_eq!(model.node_actions()[0].kind, ActionKind::Shutdown);
    }
}
