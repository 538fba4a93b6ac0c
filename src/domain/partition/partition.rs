use std::collections::BTreeSet;

use crate::domain::constraint::constraint::Constraint;
use crate::domain::utils::id::{NodeId, VmId};

/// An independent sub-problem: a set of nodes, the VMs assigned to them and
/// the part of each constraint that concerns them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub nodes: Vec<NodeId>,
    pub vms: BTreeSet<VmId>,
    pub constraints: Vec<Constraint>,
}

impl Partition {
    pub fn node_set(&self) -> BTreeSet<NodeId> {
        self.nodes.iter().cloned().collect()
    }

    pub fn contains_node(&self, node: &NodeId) -> bool {
        self.nodes.contains(node)
    }

    pub fn contains_vm(&self, vm: &VmId) -> bool {
        self.vms.contains(vm)
    }
}
