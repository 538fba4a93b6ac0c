use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::configuration::configuration::Configuration;
use crate::domain::configuration::platform::{ANY_PLATFORM, platform_matches};
use crate::domain::constraint::fence::{Fence, join};
use crate::domain::constraint::placement_constraint_trait::PlacementConstraint;
use crate::domain::model::reconfiguration_model::ReconfigurationModel;
use crate::domain::utils::id::{NodeId, PlatformId, VmId};
use crate::error::ModelError;

/// Running VMs of `vms` must be hosted on a node of `nodes` providing the
/// platform they require.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformCompatibility {
    pub vms: BTreeSet<VmId>,
    pub nodes: BTreeSet<NodeId>,
}

/// Fences equivalent to a platform constraint: one per platform shared by
/// nodes and VMs. VMs requiring a platform no node provides are reported
/// apart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedFences {
    pub fences: Vec<Fence>,
    pub unmatched: Vec<(VmId, Option<PlatformId>)>,
}

impl PlatformCompatibility {
    pub fn new<V, N>(vms: impl IntoIterator<Item = V>, nodes: impl IntoIterator<Item = N>) -> Self
    where
        V: Into<VmId>,
        N: Into<NodeId>,
    {
        PlatformCompatibility { vms: vms.into_iter().map(Into::into).collect(), nodes: nodes.into_iter().map(Into::into).collect() }
    }

    pub fn restrict(&self, nodes: &BTreeSet<NodeId>, vms: &BTreeSet<VmId>) -> Option<PlatformCompatibility> {
        let restricted_vms: BTreeSet<VmId> = self.vms.intersection(vms).cloned().collect();
        if restricted_vms.is_empty() {
            return None;
        }
        Some(PlatformCompatibility { vms: restricted_vms, nodes: self.nodes.intersection(nodes).cloned().collect() })
    }

    /// Groups nodes and VMs by platform. Nodes and VMs without platform form
    /// their own group, VMs accepting any platform are left unfenced.
    pub fn derive_fences<'a>(
        &self,
        node_platforms: impl IntoIterator<Item = (&'a NodeId, Option<&'a PlatformId>)>,
        vm_platforms: impl IntoIterator<Item = (&'a VmId, Option<&'a PlatformId>)>,
    ) -> DerivedFences {
        let mut groups: BTreeMap<Option<PlatformId>, (BTreeSet<VmId>, BTreeSet<NodeId>)> = BTreeMap::new();

        for (node, platform) in node_platforms {
            if self.nodes.contains(node) {
                groups.entry(platform.cloned()).or_default().1.insert(node.clone());
            }
        }

        let mut derived = DerivedFences::default();
        for (vm, platform) in vm_platforms {
            if !self.vms.contains(vm) || platform.is_some_and(|p| p.as_str() == ANY_PLATFORM) {
                continue;
            }
            match groups.get_mut(&platform.cloned()) {
                Some((vms, _)) => {
                    vms.insert(vm.clone());
                }
                None => derived.unmatched.push((vm.clone(), platform.cloned())),
            }
        }

        derived.fences = groups.into_values().filter(|(vms, _)| !vms.is_empty()).map(|(vms, nodes)| Fence { vms, nodes }).collect();
        derived
    }
}

impl PlacementConstraint for PlatformCompatibility {
    /// Posts the derived fences, using the platform every node will run once
    /// the planned deployments are done.
    fn inject(&self, model: &mut ReconfigurationModel) -> Result<(), ModelError> {
        let node_platforms: Vec<(NodeId, Option<PlatformId>)> = model.node_platforms_after();
        let vm_platforms: Vec<(VmId, Option<PlatformId>)> = model.running_targets().map(|vm| (vm.id.clone(), vm.platform.clone())).collect();

        let derived = self.derive_fences(node_platforms.iter().map(|(n, p)| (n, p.as_ref())), vm_platforms.iter().map(|(v, p)| (v, p.as_ref())));

        if let Some((vm, platform)) = derived.unmatched.into_iter().next() {
            log::warn!("VM {} requires platform {:?} that no node of its partition provides", vm, platform);
            return Err(ModelError::NoMatchingPlatform { vm, platform });
        }

        for fence in &derived.fences {
            fence.inject(model)?;
        }
        Ok(())
    }

    fn is_satisfied(&self, configuration: &Configuration) -> bool {
        self.get_misplaced(configuration).is_empty()
    }

    fn get_misplaced(&self, configuration: &Configuration) -> BTreeSet<VmId> {
        configuration
            .runnings()
            .filter(|(vm, _)| self.vms.contains(*vm))
            .filter(|(vm, host)| {
                let node_platform = configuration.get_node(host).and_then(|n| n.platform.as_ref());
                let vm_platform = configuration.get_vm(vm).and_then(|v| v.platform.as_ref());
                !platform_matches(node_platform, vm_platform)
            })
            .map(|(vm, _)| vm.clone())
            .collect()
    }
}

impl fmt::Display for PlatformCompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform({}, {})", join(&self.vms), join(&self.nodes))
    }
}
