use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::plan::action::ActionKind;
use crate::domain::utils::id::{NodeId, PlatformId};
use crate::error::ConversionError;

/// State of a VM before the reconfiguration. Hosts are node indices of the
/// model. `Absent` VMs are new ones, to be instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Absent,
    Waiting,
    Running(usize),
    Sleeping(usize),
}

impl SourceState {
    pub fn host(&self) -> Option<usize> {
        match self {
            SourceState::Running(n) | SourceState::Sleeping(n) => Some(*n),
            SourceState::Absent | SourceState::Waiting => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SourceState::Absent => "absent",
            SourceState::Waiting => "waiting",
            SourceState::Running(_) => "running",
            SourceState::Sleeping(_) => "sleeping",
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State a VM must reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetState {
    Running,
    Sleeping,
    Waiting,
}

impl TargetState {
    /// Whether the VM needs a host once the plan is applied.
    pub fn is_hosted(&self) -> bool {
        matches!(self, TargetState::Running | TargetState::Sleeping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::Running => "running",
            TargetState::Sleeping => "sleeping",
            TargetState::Waiting => "waiting",
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(TargetState::Running),
            "sleeping" => Ok(TargetState::Sleeping),
            "waiting" => Ok(TargetState::Waiting),
            _ => Err(ConversionError::UnknownTargetState(s.to_string())),
        }
    }
}

/// Outcome of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing to do.
    Stay,
    Action(ActionKind),
    Unsupported,
}

/// Maps `(source, target, same node)` to the action moving a VM. `same_node`
/// is only meaningful for hosted sources and targets.
pub fn transition(source: SourceState, target: TargetState, same_node: bool) -> Transition {
    use ActionKind::*;

    match (source, target) {
        (SourceState::Running(_), TargetState::Running) if same_node => Transition::Stay,
        (SourceState::Running(_), TargetState::Running) => Transition::Action(Migration),
        (SourceState::Running(_), TargetState::Sleeping) if same_node => Transition::Action(Suspend),
        (SourceState::Running(_), TargetState::Waiting) => Transition::Action(Stop),
        (SourceState::Sleeping(_), TargetState::Running) => Transition::Action(Resume),
        (SourceState::Sleeping(_), TargetState::Sleeping) if same_node => Transition::Stay,
        (SourceState::Sleeping(_), TargetState::Waiting) => Transition::Action(Stop),
        (SourceState::Waiting, TargetState::Running) => Transition::Action(Run),
        (SourceState::Waiting, TargetState::Waiting) => Transition::Stay,
        (SourceState::Absent, TargetState::Running) => Transition::Action(Instantiate),
        (SourceState::Absent, TargetState::Waiting) => Transition::Stay,
        _ => Transition::Unsupported,
    }
}

/// Requested changes on the nodes themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTargets {
    /// Nodes to boot (`true`) or halt (`false`).
    pub online: BTreeMap<NodeId, bool>,

    /// Platforms to deploy.
    pub platforms: BTreeMap<NodeId, PlatformId>,
}

impl NodeTargets {
    pub fn is_empty(&self) -> bool {
        self.online.is_empty() && self.platforms.is_empty()
    }
}
