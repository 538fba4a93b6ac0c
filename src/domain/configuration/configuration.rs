use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::configuration::node::Node;
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::utils::id::{NodeId, PlatformId, VmId};
use crate::error::ConfigurationError;

/// State of a managed VM inside a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmState {
    Running(NodeId),
    Sleeping(NodeId),
    Waiting,
}

impl VmState {
    pub fn host(&self) -> Option<&NodeId> {
        match self {
            VmState::Running(node) | VmState::Sleeping(node) => Some(node),
            VmState::Waiting => None,
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Running(node) => write!(f, "running on {}", node),
            VmState::Sleeping(node) => write!(f, "sleeping on {}", node),
            VmState::Waiting => write!(f, "waiting"),
        }
    }
}

/// Snapshot of the datacenter: which nodes are online and where every
/// managed VM is. Storing exactly one `VmState` per VM keeps the
/// running/sleeping/waiting sets disjoint by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    nodes: BTreeMap<NodeId, Node>,
    vms: BTreeMap<VmId, VirtualMachine>,
    online: BTreeSet<NodeId>,
    states: BTreeMap<VmId, VmState>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    //---------------------
    // --- Node Methods ---
    //---------------------
    pub fn add_online(&mut self, node: Node) {
        self.online.insert(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_offline(&mut self, node: Node) {
        self.online.remove(&node.id);
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn set_online(&mut self, node: &NodeId) -> Result<(), ConfigurationError> {
        if !self.nodes.contains_key(node) {
            return Err(ConfigurationError::UnknownNode(node.clone()));
        }
        self.online.insert(node.clone());
        Ok(())
    }

    /// Fails while the node still hosts running or sleeping VMs.
    pub fn set_offline(&mut self, node: &NodeId) -> Result<(), ConfigurationError> {
        if !self.nodes.contains_key(node) {
            return Err(ConfigurationError::UnknownNode(node.clone()));
        }
        if self.states.values().any(|state| state.host() == Some(node)) {
            return Err(ConfigurationError::NodeNotEmpty(node.clone()));
        }
        self.online.remove(node);
        Ok(())
    }

    pub fn set_node_platform(&mut self, node: &NodeId, platform: Option<PlatformId>) -> Result<(), ConfigurationError> {
        match self.nodes.get_mut(node) {
            Some(n) => {
                n.platform = platform;
                Ok(())
            }
            None => Err(ConfigurationError::UnknownNode(node.clone())),
        }
    }

    pub fn get_node(&self, node: &NodeId) -> Option<&Node> {
        self.nodes.get(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    pub fn is_online(&self, node: &NodeId) -> bool {
        self.online.contains(node)
    }

    pub fn online_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.online.iter()
    }

    pub fn offline_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys().filter(|id| !self.online.contains(*id))
    }

    //---------------------
    // ---- VM Methods ----
    //---------------------
    /// Inserts or replaces the VM and marks it running on `node`.
    pub fn set_run_on(&mut self, vm: VirtualMachine, node: &NodeId) -> Result<(), ConfigurationError> {
        self.check_host(node)?;
        self.states.insert(vm.id.clone(), VmState::Running(node.clone()));
        self.vms.insert(vm.id.clone(), vm);
        Ok(())
    }

    /// Inserts or replaces the VM and marks it sleeping on `node`.
    pub fn set_sleep_on(&mut self, vm: VirtualMachine, node: &NodeId) -> Result<(), ConfigurationError> {
        self.check_host(node)?;
        self.states.insert(vm.id.clone(), VmState::Sleeping(node.clone()));
        self.vms.insert(vm.id.clone(), vm);
        Ok(())
    }

    pub fn set_waiting(&mut self, vm: VirtualMachine) {
        self.states.insert(vm.id.clone(), VmState::Waiting);
        self.vms.insert(vm.id.clone(), vm);
    }

    /// Changes the state of a VM already known by the configuration.
    pub fn set_state(&mut self, vm: &VmId, state: VmState) -> Result<(), ConfigurationError> {
        if !self.vms.contains_key(vm) {
            return Err(ConfigurationError::UnknownVm(vm.clone()));
        }
        if let Some(host) = state.host() {
            self.check_host(host)?;
        }
        self.states.insert(vm.clone(), state);
        Ok(())
    }

    pub fn remove_vm(&mut self, vm: &VmId) -> Option<VirtualMachine> {
        self.states.remove(vm);
        self.vms.remove(vm)
    }

    fn check_host(&self, node: &NodeId) -> Result<(), ConfigurationError> {
        if !self.nodes.contains_key(node) {
            return Err(ConfigurationError::UnknownNode(node.clone()));
        }
        if !self.online.contains(node) {
            return Err(ConfigurationError::NodeOffline(node.clone()));
        }
        Ok(())
    }

    pub fn get_vm(&self, vm: &VmId) -> Option<&VirtualMachine> {
        self.vms.get(vm)
    }

    pub fn vms(&self) -> impl Iterator<Item = &VirtualMachine> {
        self.vms.values()
    }

    pub fn contains_vm(&self, vm: &VmId) -> bool {
        self.vms.contains_key(vm)
    }

    pub fn state_of(&self, vm: &VmId) -> Option<&VmState> {
        self.states.get(vm)
    }

    /// Host of a running or sleeping VM.
    pub fn location(&self, vm: &VmId) -> Option<&NodeId> {
        self.states.get(vm).and_then(VmState::host)
    }

    pub fn is_running(&self, vm: &VmId) -> bool {
        matches!(self.states.get(vm), Some(VmState::Running(_)))
    }

    pub fn runnings(&self) -> impl Iterator<Item = (&VmId, &NodeId)> {
        self.states.iter().filter_map(|(vm, state)| match state {
            VmState::Running(node) => Some((vm, node)),
            _ => None,
        })
    }

    pub fn sleepings(&self) -> impl Iterator<Item = (&VmId, &NodeId)> {
        self.states.iter().filter_map(|(vm, state)| match state {
            VmState::Sleeping(node) => Some((vm, node)),
            _ => None,
        })
    }

    pub fn waitings(&self) -> impl Iterator<Item = &VmId> {
        self.states.iter().filter(|(_, state)| **state == VmState::Waiting).map(|(vm, _)| vm)
    }

    pub fn runnings_on(&self, node: &NodeId) -> Vec<&VmId> {
        self.runnings().filter(|(_, host)| *host == node).map(|(vm, _)| vm).collect()
    }

    pub fn sleepings_on(&self, node: &NodeId) -> Vec<&VmId> {
        self.sleepings().filter(|(_, host)| *host == node).map(|(vm, _)| vm).collect()
    }

    /// CPU demand of the VMs running on `node`.
    pub fn cpu_load(&self, node: &NodeId) -> i64 {
        self.runnings_on(node).into_iter().filter_map(|vm| self.vms.get(vm)).map(|vm| vm.cpu_demand).sum()
    }

    /// Memory of the VMs running on `node`.
    pub fn memory_load(&self, node: &NodeId) -> i64 {
        self.runnings_on(node).into_iter().filter_map(|vm| self.vms.get(vm)).map(|vm| vm.memory).sum()
    }

    /// True when no online node is overloaded.
    pub fn is_viable(&self) -> bool {
        self.online.iter().filter_map(|id| self.nodes.get(id)).all(|node| {
            self.cpu_load(&node.id) <= node.cpu_capacity() && self.memory_load(&node.id) <= node.memory
        })
    }

    /// Verifies that every VM has exactly one state and that hosts are known and online.
    pub fn check_invariants(&self) -> Result<(), ConfigurationError> {
        for vm in self.vms.keys() {
            if !self.states.contains_key(vm) {
                return Err(ConfigurationError::Invariant(format!("VM {} has no state", vm)));
            }
        }

        for (vm, state) in &self.states {
            if !self.vms.contains_key(vm) {
                return Err(ConfigurationError::Invariant(format!("State recorded for unknown VM {}", vm)));
            }
            if let Some(host) = state.host() {
                if !self.nodes.contains_key(host) {
                    return Err(ConfigurationError::UnknownNode(host.clone()));
                }
                if !self.online.contains(host) {
                    return Err(ConfigurationError::Invariant(format!("VM {} is {} but the node is offline", vm, state)));
                }
            }
        }

        for node in &self.online {
            if !self.nodes.contains_key(node) {
                return Err(ConfigurationError::Invariant(format!("Online node {} is unknown", node)));
            }
        }
        Ok(())
    }
}
