use std::collections::BTreeSet;
use std::fmt;

use crate::domain::configuration::configuration::Configuration;
use crate::domain::constraint::placement_constraint_trait::PlacementConstraint;
use crate::domain::model::reconfiguration_model::ReconfigurationModel;
use crate::domain::utils::id::{NodeId, VmId};
use crate::error::ModelError;

/// Running VMs of `vms` may only be hosted on `nodes`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fence {
    pub vms: BTreeSet<VmId>,
    pub nodes: BTreeSet<NodeId>,
}

impl Fence {
    pub fn new<V, N>(vms: impl IntoIterator<Item = V>, nodes: impl IntoIterator<Item = N>) -> Self
    where
        V: Into<VmId>,
        N: Into<NodeId>,
    {
        Fence { vms: vms.into_iter().map(Into::into).collect(), nodes: nodes.into_iter().map(Into::into).collect() }
    }

    pub fn restrict(&self, nodes: &BTreeSet<NodeId>, vms: &BTreeSet<VmId>) -> Option<Fence> {
        let restricted_vms: BTreeSet<VmId> = self.vms.intersection(vms).cloned().collect();
        if restricted_vms.is_empty() {
            return None;
        }
        Some(Fence { vms: restricted_vms, nodes: self.nodes.intersection(nodes).cloned().collect() })
    }
}

impl PlacementConstraint for Fence {
    fn inject(&self, model: &mut ReconfigurationModel) -> Result<(), ModelError> {
        let allowed = model.node_indices(&self.nodes);
        for vm in &self.vms {
            model.restrict(vm, &allowed);
        }
        Ok(())
    }

    fn is_satisfied(&self, configuration: &Configuration) -> bool {
        self.get_misplaced(configuration).is_empty()
    }

    fn get_misplaced(&self, configuration: &Configuration) -> BTreeSet<VmId> {
        configuration.runnings().filter(|(vm, host)| self.vms.contains(*vm) && !self.nodes.contains(*host)).map(|(vm, _)| vm.clone()).collect()
    }
}

impl fmt::Display for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fence({}, {})", join(&self.vms), join(&self.nodes))
    }
}

pub(crate) fn join<T: fmt::Display>(items: impl IntoIterator<Item = T>) -> String {
    let parts: Vec<String> = items.into_iter().map(|i| i.to_string()).collect();
    format!("{{{}}}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::configuration::node::Node;
    use crate::domain::configuration::virtual_machine::VirtualMachine;

    #[test]
    fn only_running_vms_are_checked() {
        let mut cfg = Configuration::new();
        for id in ["N1", "N2"] {
            cfg.add_online(Node::new(id, 1, 100, 2048));
        }
        cfg.set_run_on(VirtualMachine::new("VM1", 1, 10, 128), &"N1".into()).unwrap();
        cfg.set_sleep_on(VirtualMachine::new("VM2", 1, 10, 128), &"N2".into()).unwrap();

        let fence = Fence::new(["VM1", "VM2"], ["N1"]);
        assert!(fence.is_satisfied(&cfg));

        let fence = Fence::new(["VM1", "VM2"], ["N2"]);
        assert_eq!(fence.get_misplaced(&cfg), BTreeSet::from([VmId::new("VM1")]));
    }

    #[test]
    fn restrict_drops_foreign_vms() {
        let fence = Fence::new(["VM1", "VM2"], ["N1", "N2"]);
        let vms = BTreeSet::from([VmId::new("VM2")]);
        let nodes = BTreeSet::from([NodeId::new("N2"), NodeId::new("N3")]);

        let restricted = fence.restrict(&nodes, &vms).unwrap();
        assert_eq!(restricted, Fence::new(["VM2"], ["N2"]));
        assert!(fence.restrict(&nodes, &BTreeSet::new()).is_none());
    }
}
