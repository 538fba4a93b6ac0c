use std::collections::BTreeMap;

use crate::domain::configuration::configuration::{Configuration, VmState};
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::constraint::constraint::Constraint;
use crate::domain::model::transition::{NodeTargets, TargetState};
use crate::domain::utils::id::{NodeId, PlatformId, VmId};

/// Everything the planner needs: where the cluster is, where it must go and
/// the constraints the destination must satisfy.
///
/// VMs without an explicit target keep their current state; new VMs default
/// to running.
#[derive(Debug, Clone, Default)]
pub struct PlanningRequest {
    pub source: Configuration,
    pub new_vms: Vec<VirtualMachine>,
    pub targets: BTreeMap<VmId, TargetState>,
    pub node_targets: NodeTargets,
    pub constraints: Vec<Constraint>,
}

impl PlanningRequest {
    pub fn new(source: Configuration) -> Self {
        PlanningRequest { source, ..Default::default() }
    }

    pub fn run(mut self, vm: impl Into<VmId>) -> Self {
        self.targets.insert(vm.into(), TargetState::Running);
        self
    }

    pub fn sleep(mut self, vm: impl Into<VmId>) -> Self {
        self.targets.insert(vm.into(), TargetState::Sleeping);
        self
    }

    pub fn wait(mut self, vm: impl Into<VmId>) -> Self {
        self.targets.insert(vm.into(), TargetState::Waiting);
        self
    }

    /// Adds a VM absent from the source, to be instantiated.
    pub fn instantiate(mut self, vm: VirtualMachine) -> Self {
        self.new_vms.push(vm);
        self
    }

    pub fn boot(mut self, node: impl Into<NodeId>) -> Self {
        self.node_targets.online.insert(node.into(), true);
        self
    }

    pub fn halt(mut self, node: impl Into<NodeId>) -> Self {
        self.node_targets.online.insert(node.into(), false);
        self
    }

    pub fn deploy(mut self, node: impl Into<NodeId>, platform: impl Into<PlatformId>) -> Self {
        self.node_targets.platforms.insert(node.into(), platform.into());
        self
    }

    pub fn constrain(mut self, constraint: impl Into<Constraint>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn target_of(&self, vm: &VmId) -> Option<TargetState> {
        if let Some(target) = self.targets.get(vm) {
            return Some(*target);
        }

        match self.source.state_of(vm) {
            Some(VmState::Running(_)) => Some(TargetState::Running),
            Some(VmState::Sleeping(_)) => Some(TargetState::Sleeping),
            Some(VmState::Waiting) => Some(TargetState::Waiting),
            None if self.new_vms.iter().any(|v| &v.id == vm) => Some(TargetState::Running),
            None => None,
        }
    }

    /// Every VM the plan is about, existing and new.
    pub fn all_vms(&self) -> impl Iterator<Item = &VirtualMachine> {
        self.source.vms().chain(self.new_vms.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::configuration::node::Node;

    #[test]
    fn targets_default_to_the_current_state() {
        let mut source = Configuration::new();
        source.add_online(Node::new("n1", 2, 100, 4096));
        source.set_run_on(VirtualMachine::new("vm1", 1, 50, 512), &NodeId::from("n1")).unwrap();
        source.set_sleep_on(VirtualMachine::new("vm2", 1, 50, 512), &NodeId::from("n1")).unwrap();
        source.set_waiting(VirtualMachine::new("vm3", 1, 50, 512));

        let request = PlanningRequest::new(source).instantiate(VirtualMachine::new("vm4", 1, 50, 512)).wait("vm1");

        assert_eq!(request.target_of(&VmId::from("vm1")), Some(TargetState::Waiting));
        assert_eq!(request.target_of(&VmId::from("vm2")), Some(TargetState::Sleeping));
        assert_eq!(request.target_of(&VmId::from("vm3")), Some(TargetState::Waiting));
        assert_eq!(request.target_of(&VmId::from("vm4")), Some(TargetState::Running));
        assert_eq!(request.target_of(&VmId::from("ghost")), None);
        assert_eq!(request.all_vms().count(), 4);
    }
}
