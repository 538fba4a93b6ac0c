use std::collections::BTreeSet;

use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::utils::id::{NodeId, PlatformId};

/// A physical node. Capacities never change once the node is monitored;
/// only its platform may be switched through an explicit deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,

    /// Number of physical CPUs.
    pub nb_cpus: i64,

    /// Capacity of one CPU, in the unit used by `VirtualMachine::cpu_demand`.
    pub cpu_rate: i64,

    /// Memory in MiB.
    pub memory: i64,

    /// Platform currently running on the node, if declared.
    pub platform: Option<PlatformId>,

    /// Platforms the node is able to switch to.
    pub available_platforms: BTreeSet<PlatformId>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, nb_cpus: i64, cpu_rate: i64, memory: i64) -> Self {
        Node { id: id.into(), nb_cpus, cpu_rate, memory, platform: None, available_platforms: BTreeSet::new() }
    }

    pub fn with_platform(mut self, platform: impl Into<PlatformId>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_available_platforms<I, P>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PlatformId>,
    {
        self.available_platforms = platforms.into_iter().map(Into::into).collect();
        self
    }

    pub fn cpu_capacity(&self) -> i64 {
        self.nb_cpus * self.cpu_rate
    }

    pub fn can_deploy(&self, platform: &PlatformId) -> bool {
        self.platform.as_ref() == Some(platform) || self.available_platforms.contains(platform)
    }

    /// Static fit of a single VM on an empty node.
    pub fn can_host(&self, vm: &VirtualMachine) -> bool {
        vm.nb_cpus <= self.nb_cpus && vm.cpu_demand <= self.cpu_capacity() && vm.memory <= self.memory
    }
}
