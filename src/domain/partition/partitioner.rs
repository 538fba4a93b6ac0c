use std::collections::{BTreeMap, BTreeSet};

use union_find::{QuickUnionUf, UnionBySize, UnionFind};

use crate::domain::configuration::configuration::Configuration;
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::constraint::among::Among;
use crate::domain::constraint::constraint::Constraint;
use crate::domain::constraint::fence::Fence;
use crate::domain::constraint::platform_compatibility::PlatformCompatibility;
use crate::domain::model::transition::NodeTargets;
use crate::domain::partition::partition::Partition;
use crate::domain::utils::id::{NodeId, PlatformId, VmId};
use crate::error::PartitioningError;

/// Splits a placement problem into independent partitions.
///
/// Nodes are merged with a union-find as constraints are ingested. Every VM
/// named by a constraint is anchored to the partition of the constraint,
/// which is how conflicting constraints are detected.
pub struct Partitioner {
    nodes: Vec<NodeId>,
    node_index: BTreeMap<NodeId, usize>,
    node_platforms: Vec<Option<PlatformId>>,

    /// Every VM to place, with the index of its current host.
    hosts: BTreeMap<VmId, Option<usize>>,
    vm_platforms: BTreeMap<VmId, Option<PlatformId>>,

    dsu: QuickUnionUf<UnionBySize>,
    unions: Vec<(usize, usize)>,
    anchors: BTreeMap<VmId, usize>,
    constraints: Vec<Constraint>,
}

impl Clone for Partitioner {
    fn clone(&self) -> Self {
        let mut dsu = QuickUnionUf::<UnionBySize>::new(self.nodes.len());
        for (a, b) in &self.unions {
            dsu.union(*a, *b);
        }

        Partitioner {
            nodes: self.nodes.clone(),
            node_index: self.node_index.clone(),
            node_platforms: self.node_platforms.clone(),
            hosts: self.hosts.clone(),
            vm_platforms: self.vm_platforms.clone(),
            dsu,
            unions: self.unions.clone(),
            anchors: self.anchors.clone(),
            constraints: self.constraints.clone(),
        }
    }
}

impl Partitioner {
    /// `new_vms` are VMs to instantiate, `node_targets` the planned deployments
    /// (platform constraints group nodes by the platform they will run).
    pub fn new(source: &Configuration, new_vms: &[VirtualMachine], node_targets: &NodeTargets) -> Self {
        let nodes: Vec<NodeId> = source.node_ids().cloned().collect();
        let node_index: BTreeMap<NodeId, usize> = nodes.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();

        let node_platforms = source
            .nodes()
            .map(|node| node_targets.platforms.get(&node.id).cloned().or_else(|| node.platform.clone()))
            .collect();

        let mut hosts = BTreeMap::new();
        let mut vm_platforms = BTreeMap::new();
        for vm in source.vms() {
            let host = source.location(&vm.id).and_then(|n| node_index.get(n).copied());
            hosts.insert(vm.id.clone(), host);
            vm_platforms.insert(vm.id.clone(), vm.platform.clone());
        }
        for vm in new_vms {
            hosts.insert(vm.id.clone(), None);
            vm_platforms.insert(vm.id.clone(), vm.platform.clone());
        }

        let dsu = QuickUnionUf::<UnionBySize>::new(nodes.len());
        let mut partitioner =
            Partitioner { nodes, node_index, node_platforms, hosts, vm_platforms, dsu, unions: Vec::new(), anchors: BTreeMap::new(), constraints: Vec::new() };
        partitioner.merge_evacuated_nodes(source, node_targets);
        partitioner
    }

    /// A node halted or redeployed while hosting VMs shares a partition with
    /// every node that is online once the plan is applied.
    fn merge_evacuated_nodes(&mut self, source: &Configuration, node_targets: &NodeTargets) {
        let online_after = |node: &NodeId| node_targets.online.get(node).copied().unwrap_or_else(|| source.is_online(node));

        let evacuated: Vec<usize> = (0..self.nodes.len())
            .filter(|i| {
                let node = &self.nodes[*i];
                let redeployed = node_targets.platforms.get(node).is_some_and(|p| source.get_node(node).and_then(|n| n.platform.as_ref()) != Some(p));
                let hosting = !source.runnings_on(node).is_empty() || !source.sleepings_on(node).is_empty();
                hosting && (redeployed || !online_after(node))
            })
            .collect();
        if evacuated.is_empty() {
            return;
        }

        let receivers: Vec<usize> = (0..self.nodes.len()).filter(|i| online_after(&self.nodes[*i])).collect();
        log::debug!("{} halted or redeployed nodes host VMs, merging them with {} online nodes", evacuated.len(), receivers.len());

        let first = evacuated[0];
        for member in evacuated.into_iter().chain(receivers) {
            if self.dsu.find(first) != self.dsu.find(member) {
                self.dsu.union(first, member);
                self.unions.push((first, member));
            }
        }
    }

    /// Ingests one constraint. On failure the partitioner is left as it was.
    pub fn part(&mut self, constraint: &Constraint) -> Result<(), PartitioningError> {
        let snapshot = self.clone();

        let result = match constraint {
            Constraint::Fence(fence) => self.part_fence(fence),
            Constraint::Among(among) => self.part_among(among),
            Constraint::Platform(platform) => self.part_platform(platform),
        };

        match result {
            Ok(()) => {
                self.constraints.push(constraint.clone());
                Ok(())
            }
            Err(e) => {
                log::warn!("Constraint {} rejected by the partitioner: {}", constraint, e);
                *self = snapshot;
                Err(e)
            }
        }
    }

    fn part_fence(&mut self, fence: &Fence) -> Result<(), PartitioningError> {
        let node_set = self.indices_of(&fence.nodes)?;
        let roots: BTreeSet<usize> = node_set.iter().map(|i| self.dsu.find(*i)).collect();

        if !roots.is_empty() {
            for vm in &fence.vms {
                if let Some(anchor) = self.anchors.get(vm).copied() {
                    if !roots.contains(&self.dsu.find(anchor)) {
                        return Err(PartitioningError::Conflict { vm: vm.clone() });
                    }
                }
            }
        }

        self.merge(&fence.vms, node_set);
        Ok(())
    }

    /// Picks the available group needing the fewest merges, the first
    /// declared one on ties.
    fn part_among(&mut self, among: &Among) -> Result<(), PartitioningError> {
        let mut best: Option<(usize, BTreeSet<usize>)> = None;

        for group in &among.groups {
            let node_set = self.indices_of(group)?;
            if node_set.is_empty() {
                continue;
            }

            let roots: BTreeSet<usize> = node_set.iter().map(|i| self.dsu.find(*i)).collect();
            let available = among.vms.iter().filter_map(|vm| self.anchors.get(vm).copied()).all(|anchor| roots.contains(&self.dsu.find(anchor)));
            if !available {
                continue;
            }

            let mut touched = roots;
            for vm in &among.vms {
                if let Some(Some(host)) = self.hosts.get(vm).copied() {
                    touched.insert(self.dsu.find(host));
                }
            }

            let merges = touched.len() - 1;
            if best.as_ref().is_none_or(|(m, _)| merges < *m) {
                best = Some((merges, node_set));
            }
        }

        let (_, node_set) = best.ok_or(PartitioningError::NoAvailableGroup)?;
        self.merge(&among.vms, node_set);
        Ok(())
    }

    fn part_platform(&mut self, platform: &PlatformCompatibility) -> Result<(), PartitioningError> {
        let derived = platform.derive_fences(
            self.nodes.iter().zip(self.node_platforms.iter().map(Option::as_ref)),
            self.vm_platforms.iter().map(|(vm, p)| (vm, p.as_ref())),
        );

        for (vm, required) in &derived.unmatched {
            log::debug!("No node provides platform {:?} required by {}, leaving it unfenced", required, vm);
        }

        for fence in &derived.fences {
            self.part_fence(fence)?;
        }
        Ok(())
    }

    /// Merges the node set with the current hosts of `vms` and anchors the VMs.
    fn merge(&mut self, vms: &BTreeSet<VmId>, node_set: BTreeSet<usize>) {
        let mut members = node_set;
        for vm in vms {
            if let Some(Some(host)) = self.hosts.get(vm).copied() {
                members.insert(host);
            }
        }

        let Some(first) = members.first().copied() else {
            return;
        };

        for member in members {
            if self.dsu.find(first) != self.dsu.find(member) {
                self.dsu.union(first, member);
                self.unions.push((first, member));
            }
        }

        for vm in vms {
            self.anchors.insert(vm.clone(), first);
        }
    }

    fn indices_of(&self, nodes: &BTreeSet<NodeId>) -> Result<BTreeSet<usize>, PartitioningError> {
        nodes.iter().map(|n| self.node_index.get(n).copied().ok_or_else(|| PartitioningError::UnknownNode(n.clone()))).collect()
    }

    /// Disjoint partitions covering every node, ordered by their first node.
    pub fn get_resulting_partitions(&mut self) -> Vec<Partition> {
        let mut by_root: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..self.nodes.len() {
            by_root.entry(self.dsu.find(i)).or_default().push(i);
        }

        let mut groups: Vec<(usize, Vec<usize>)> = by_root.into_iter().collect();
        groups.sort_by_key(|(_, members)| members[0]);

        let partition_of_root: BTreeMap<usize, usize> = groups.iter().enumerate().map(|(p, (root, _))| (*root, p)).collect();

        let largest = groups.iter().enumerate().fold(None::<(usize, usize)>, |best, (p, (_, members))| match best {
            Some((_, size)) if size >= members.len() => best,
            _ => Some((p, members.len())),
        });

        let mut vms: Vec<BTreeSet<VmId>> = vec![BTreeSet::new(); groups.len()];
        for (vm, host) in &self.hosts {
            let node = self.anchors.get(vm).copied().or(*host);
            let target = match node {
                Some(n) => partition_of_root.get(&self.dsu.find(n)).copied(),
                None => largest.map(|(p, _)| p),
            };
            if let Some(p) = target {
                vms[p].insert(vm.clone());
            }
        }

        groups
            .into_iter()
            .zip(vms)
            .map(|((_, members), vms)| {
                let nodes: Vec<NodeId> = members.iter().map(|i| self.nodes[*i].clone()).collect();
                let node_set: BTreeSet<NodeId> = nodes.iter().cloned().collect();
                let constraints = self.constraints.iter().filter_map(|c| c.restrict(&node_set, &vms)).collect();
                Partition { nodes, vms, constraints }
            })
            .collect()
    }
}
