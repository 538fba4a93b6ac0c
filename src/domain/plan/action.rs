use std::fmt;
use std::str::FromStr;

use crate::domain::configuration::configuration::{Configuration, VmState};
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::utils::id::{NodeId, PlatformId, VmId};
use crate::error::{ConfigError, ConfigurationError, PlanError};

/// Kind of an action, used as key by the duration evaluators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    Migration,
    Suspend,
    Resume,
    Run,
    Stop,
    Instantiate,
    Startup,
    Shutdown,
    Deploy,
}

impl ActionKind {
    pub const ALL: [ActionKind; 9] = [
        ActionKind::Migration,
        ActionKind::Suspend,
        ActionKind::Resume,
        ActionKind::Run,
        ActionKind::Stop,
        ActionKind::Instantiate,
        ActionKind::Startup,
        ActionKind::Shutdown,
        ActionKind::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Migration => "migration",
            ActionKind::Suspend => "suspend",
            ActionKind::Resume => "resume",
            ActionKind::Run => "run",
            ActionKind::Stop => "stop",
            ActionKind::Instantiate => "instantiate",
            ActionKind::Startup => "startup",
            ActionKind::Shutdown => "shutdown",
            ActionKind::Deploy => "deploy",
        }
    }

    /// Node actions need the node for themselves while they run.
    pub fn is_node_exclusive(&self) -> bool {
        matches!(self, ActionKind::Startup | ActionKind::Shutdown | ActionKind::Deploy)
    }

    /// Rank among actions starting at the same instant: boots and deploys
    /// before VM actions, shutdowns after them.
    pub fn execution_phase(&self) -> u8 {
        match self {
            ActionKind::Startup | ActionKind::Deploy => 0,
            ActionKind::Shutdown => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL.iter().find(|kind| kind.as_str() == s).copied().ok_or_else(|| ConfigError::UnknownActionKind(s.to_string()))
    }
}

/// What an action does. VM operations name the VM and the node(s) involved,
/// node operations only the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Migration { vm: VmId, from: NodeId, to: NodeId },
    Suspend { vm: VmId, from: NodeId, to: NodeId },
    Resume { vm: VmId, from: NodeId, to: NodeId },
    Run { vm: VmId, node: NodeId },
    Stop { vm: VmId, node: NodeId },
    Instantiate { vm: VirtualMachine, node: NodeId },
    Startup { node: NodeId },
    Shutdown { node: NodeId },
    Deploy { node: NodeId, platform: PlatformId },
}

impl Operation {
    pub fn kind(&self) -> ActionKind {
        match self {
            Operation::Migration { .. } => ActionKind::Migration,
            Operation::Suspend { .. } => ActionKind::Suspend,
            Operation::Resume { .. } => ActionKind::Resume,
            Operation::Run { .. } => ActionKind::Run,
            Operation::Stop { .. } => ActionKind::Stop,
            Operation::Instantiate { .. } => ActionKind::Instantiate,
            Operation::Startup { .. } => ActionKind::Startup,
            Operation::Shutdown { .. } => ActionKind::Shutdown,
            Operation::Deploy { .. } => ActionKind::Deploy,
        }
    }

    pub fn vm(&self) -> Option<&VmId> {
        match self {
            Operation::Migration { vm, .. }
            | Operation::Suspend { vm, .. }
            | Operation::Resume { vm, .. }
            | Operation::Run { vm, .. }
            | Operation::Stop { vm, .. } => Some(vm),
            Operation::Instantiate { vm, .. } => Some(&vm.id),
            Operation::Startup { .. } | Operation::Shutdown { .. } | Operation::Deploy { .. } => None,
        }
    }

    /// Nodes whose resources the operation uses.
    pub fn nodes(&self) -> Vec<&NodeId> {
        match self {
            Operation::Migration { from, to, .. } | Operation::Suspend { from, to, .. } | Operation::Resume { from, to, .. } => {
                if from == to {
                    vec![from]
                } else {
                    vec![from, to]
                }
            }
            Operation::Run { node, .. }
            | Operation::Stop { node, .. }
            | Operation::Instantiate { node, .. }
            | Operation::Startup { node }
            | Operation::Shutdown { node }
            | Operation::Deploy { node, .. } => vec![node],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Migration { vm, from, to } => write!(f, "migrate({}, {}, {})", vm, from, to),
            Operation::Suspend { vm, from, to } => write!(f, "suspend({}, {}, {})", vm, from, to),
            Operation::Resume { vm, from, to } => write!(f, "resume({}, {}, {})", vm, from, to),
            Operation::Run { vm, node } => write!(f, "run({}, {})", vm, node),
            Operation::Stop { vm, node } => write!(f, "stop({}, {})", vm, node),
            Operation::Instantiate { vm, node } => write!(f, "instantiate({}, {})", vm.id, node),
            Operation::Startup { node } => write!(f, "startup({})", node),
            Operation::Shutdown { node } => write!(f, "shutdown({})", node),
            Operation::Deploy { node, platform } => write!(f, "deploy({}, {})", node, platform),
        }
    }
}

/// A fully instantiated operation over the half-open interval `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub start: i64,
    pub end: i64,
    pub operation: Operation,
}

impl Action {
    pub fn new(start: i64, end: i64, operation: Operation) -> Self {
        Action { start, end, operation }
    }

    pub fn kind(&self) -> ActionKind {
        self.operation.kind()
    }

    pub fn duration(&self) -> i64 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Action) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether both actions cannot run at the same time: they handle the
    /// same VM, or one of them needs a node the other one touches.
    pub fn conflicts_with(&self, other: &Action) -> bool {
        if !self.overlaps(other) {
            return false;
        }

        if let (Some(a), Some(b)) = (self.operation.vm(), other.operation.vm()) {
            if a == b {
                return true;
            }
        }

        if self.kind().is_node_exclusive() || other.kind().is_node_exclusive() {
            let nodes = other.operation.nodes();
            return self.operation.nodes().iter().any(|node| nodes.contains(node));
        }
        false
    }

    /// Replays the action on `configuration`.
    pub fn apply(&self, configuration: &mut Configuration) -> Result<(), PlanError> {
        let inapplicable = |e: ConfigurationError| PlanError::Inapplicable(self.operation.to_string(), e);

        match &self.operation {
            Operation::Migration { vm, from, to } => {
                expect_state(configuration, vm, VmState::Running(from.clone()), "running on the source node").map_err(inapplicable)?;
                configuration.set_state(vm, VmState::Running(to.clone())).map_err(inapplicable)
            }
            Operation::Suspend { vm, from, to } => {
                expect_state(configuration, vm, VmState::Running(from.clone()), "running on the source node").map_err(inapplicable)?;
                configuration.set_state(vm, VmState::Sleeping(to.clone())).map_err(inapplicable)
            }
            Operation::Resume { vm, from, to } => {
                expect_state(configuration, vm, VmState::Sleeping(from.clone()), "sleeping on the source node").map_err(inapplicable)?;
                configuration.set_state(vm, VmState::Running(to.clone())).map_err(inapplicable)
            }
            Operation::Run { vm, node } => {
                expect_state(configuration, vm, VmState::Waiting, "waiting").map_err(inapplicable)?;
                configuration.set_state(vm, VmState::Running(node.clone())).map_err(inapplicable)
            }
            Operation::Stop { vm, node } => {
                // sleeping VMs can be stopped too, their image is discarded
                expect_host(configuration, vm, node).map_err(inapplicable)?;
                configuration.set_state(vm, VmState::Waiting).map_err(inapplicable)
            }
            Operation::Instantiate { vm, node } => configuration.set_run_on(vm.clone(), node).map_err(inapplicable),
            Operation::Startup { node } => configuration.set_online(node).map_err(inapplicable),
            Operation::Shutdown { node } => configuration.set_offline(node).map_err(inapplicable),
            Operation::Deploy { node, platform } => configuration.set_node_platform(node, Some(platform.clone())).map_err(inapplicable),
        }
    }
}

fn expect_state(configuration: &Configuration, vm: &VmId, expected: VmState, description: &str) -> Result<(), ConfigurationError> {
    match configuration.state_of(vm) {
        None => Err(ConfigurationError::UnknownVm(vm.clone())),
        Some(state) if *state == expected => Ok(()),
        Some(_) => Err(ConfigurationError::UnexpectedState { vm: vm.clone(), expected: description.to_string() }),
    }
}

fn expect_host(configuration: &Configuration, vm: &VmId, node: &NodeId) -> Result<(), ConfigurationError> {
    match configuration.state_of(vm) {
        None => Err(ConfigurationError::UnknownVm(vm.clone())),
        Some(state) if state.host() == Some(node) => Ok(()),
        Some(_) => Err(ConfigurationError::UnexpectedState { vm: vm.clone(), expected: format!("hosted on {}", node) }),
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} {}", self.start, self.end, self.operation)
    }
}
