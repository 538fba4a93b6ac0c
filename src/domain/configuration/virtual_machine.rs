use std::collections::BTreeMap;

use crate::domain::configuration::platform::ANY_PLATFORM;
use crate::domain::utils::id::{PlatformId, VmId};

/// A virtual machine as handed over by the template layer. The planner
/// never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachine {
    pub id: VmId,

    /// Number of virtual CPUs.
    pub nb_cpus: i64,

    /// CPU the VM needs while running, in the unit of `Node::cpu_rate`.
    pub cpu_demand: i64,

    /// Upper bound of CPU the VM may consume.
    pub cpu_max: i64,

    /// Memory in MiB.
    pub memory: i64,

    /// Platform required on the hosting node. `None` only matches nodes
    /// without a declared platform.
    pub platform: Option<PlatformId>,

    pub options: BTreeMap<String, String>,
}

impl VirtualMachine {
    pub fn new(id: impl Into<VmId>, nb_cpus: i64, cpu_demand: i64, memory: i64) -> Self {
        VirtualMachine { id: id.into(), nb_cpus, cpu_demand, cpu_max: cpu_demand, memory, platform: None, options: BTreeMap::new() }
    }

    pub fn with_platform(mut self, platform: impl Into<PlatformId>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_cpu_max(mut self, cpu_max: i64) -> Self {
        self.cpu_max = cpu_max;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// True when the VM accepts any node whatever its platform.
    pub fn accepts_any_platform(&self) -> bool {
        self.platform.as_ref().is_some_and(|p| p.as_str() == ANY_PLATFORM)
    }
}
