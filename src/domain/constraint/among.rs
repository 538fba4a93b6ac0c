use std::collections::BTreeSet;
use std::fmt;

use crate::domain::configuration::configuration::Configuration;
use crate::domain::constraint::fence::join;
use crate::domain::constraint::placement_constraint_trait::PlacementConstraint;
use crate::domain::model::reconfiguration_model::ReconfigurationModel;
use crate::domain::utils::id::{NodeId, VmId};
use crate::error::ModelError;

/// Running VMs of `vms` must all be hosted inside one single group of nodes,
/// chosen among `groups`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Among {
    pub vms: BTreeSet<VmId>,
    pub groups: Vec<BTreeSet<NodeId>>,
}

impl Among {
    pub fn new<V, N>(vms: impl IntoIterator<Item = V>, groups: impl IntoIterator<Item = Vec<N>>) -> Self
    where
        V: Into<VmId>,
        N: Into<NodeId>,
    {
        Among {
            vms: vms.into_iter().map(Into::into).collect(),
            groups: groups.into_iter().map(|g| g.into_iter().map(Into::into).collect()).collect(),
        }
    }

    pub fn restrict(&self, nodes: &BTreeSet<NodeId>, vms: &BTreeSet<VmId>) -> Option<Among> {
        let restricted_vms: BTreeSet<VmId> = self.vms.intersection(vms).cloned().collect();
        if restricted_vms.is_empty() {
            return None;
        }

        let groups = self
            .groups
            .iter()
            .map(|group| group.intersection(nodes).cloned().collect::<BTreeSet<NodeId>>())
            .filter(|group| !group.is_empty())
            .collect();
        Some(Among { vms: restricted_vms, groups })
    }

    fn hosts<'a>(&self, configuration: &'a Configuration) -> Vec<(&'a VmId, &'a NodeId)> {
        configuration.runnings().filter(|(vm, _)| self.vms.contains(*vm)).collect()
    }
}

impl PlacementConstraint for Among {
    fn inject(&self, model: &mut ReconfigurationModel) -> Result<(), ModelError> {
        let groups: Vec<BTreeSet<usize>> = self.groups.iter().map(|group| model.node_indices(group)).collect();
        model.post_among(&self.vms, groups);
        Ok(())
    }

    fn is_satisfied(&self, configuration: &Configuration) -> bool {
        let hosts = self.hosts(configuration);
        hosts.is_empty() || self.groups.iter().any(|group| hosts.iter().all(|(_, host)| group.contains(*host)))
    }

    /// VMs outside the group already hosting most of the set.
    fn get_misplaced(&self, configuration: &Configuration) -> BTreeSet<VmId> {
        let hosts = self.hosts(configuration);
        if hosts.is_empty() || self.is_satisfied(configuration) {
            return BTreeSet::new();
        }

        let mut best: Option<(usize, &BTreeSet<NodeId>)> = None;
        for group in &self.groups {
            let inside = hosts.iter().filter(|(_, host)| group.contains(*host)).count();
            if best.is_none_or(|(count, _)| inside > count) {
                best = Some((inside, group));
            }
        }

        match best {
            Some((_, group)) => hosts.iter().filter(|(_, host)| !group.contains(*host)).map(|(vm, _)| (*vm).clone()).collect(),
            None => hosts.iter().map(|(vm, _)| (*vm).clone()).collect(),
        }
    }
}

impl fmt::Display for Among {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self.groups.iter().map(|group| join(group)).collect();
        write!(f, "among({}, {{{}}})", join(&self.vms), groups.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::configuration::node::Node;
    use crate::domain::configuration::virtual_machine::VirtualMachine;

    fn configuration(placement: &[(&str, &str)]) -> Configuration {
        let mut cfg = Configuration::new();
        for id in ["N1", "N2", "N3", "N4"] {
            cfg.add_online(Node::new(id, 2, 100, 4096));
        }
        for (vm, node) in placement {
            cfg.set_run_on(VirtualMachine::new(*vm, 1, 10, 256), &(*node).into()).unwrap();
        }
        cfg
    }

    #[test]
    fn satisfied_when_one_group_hosts_every_vm() {
        let among = Among::new(["VM1", "VM2"], [vec!["N1", "N2"], vec!["N3", "N4"]]);
        assert!(among.is_satisfied(&configuration(&[("VM1", "N3"), ("VM2", "N4")])));
        assert!(among.is_satisfied(&configuration(&[])));
    }

    #[test]
    fn misplaced_vms_are_those_outside_the_majority_group() {
        let among = Among::new(["VM1", "VM2", "VM3"], [vec!["N1", "N2"], vec!["N3", "N4"]]);
        let cfg = configuration(&[("VM1", "N3"), ("VM2", "N1"), ("VM3", "N4")]);

        assert!(!among.is_satisfied(&cfg));
        assert_eq!(among.get_misplaced(&cfg), BTreeSet::from([VmId::new("VM2")]));
    }
}
