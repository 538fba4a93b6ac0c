use thiserror::Error;

use crate::domain::utils::id::{NodeId, PlatformId, VJobId, VmId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON document: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Partitioning(#[from] PartitioningError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("A planning worker terminated unexpectedly: {0}")]
    WorkerFailure(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Missing or invalid control-loop properties. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required property '{0}'")]
    MissingProperty(String),

    #[error("Invalid value '{value}' for property '{key}': {reason}")]
    InvalidProperty { key: String, value: String, reason: String },

    #[error("Unknown control loop implementation '{0}'")]
    UnknownLoopType(String),

    #[error("Unknown driver '{0}'")]
    UnknownDriverType(String),

    #[error("Unknown action kind '{0}' in durations source")]
    UnknownActionKind(String),

    #[error("Failed to read properties file '{path}': {source}")]
    Unreadable { path: String, source: std::io::Error },
}

/// Failures while turning DTOs into domain values.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Unknown constraint type '{0}'")]
    UnknownConstraintType(String),

    #[error("Unknown VM state '{0}'")]
    UnknownVmState(String),

    #[error("Unknown target state '{0}'")]
    UnknownTargetState(String),

    #[error("Unknown platform '{0}'")]
    UnknownPlatform(String),

    #[error("Duplicate platform '{0}'")]
    DuplicatePlatform(String),

    #[error("Constraint '{typ}' is malformed: {reason}")]
    MalformedConstraint { typ: String, reason: String },

    #[error("VM '{0}' is running or sleeping but declares no host")]
    MissingHost(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Violations of the configuration invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Unknown VM {0}")]
    UnknownVm(VmId),

    #[error("Node {0} is offline")]
    NodeOffline(NodeId),

    #[error("Node {0} still hosts VMs")]
    NodeNotEmpty(NodeId),

    #[error("VM {vm} is not in the expected state for this operation ({expected})")]
    UnexpectedState { vm: VmId, expected: String },

    #[error("Configuration invariant violated: {0}")]
    Invariant(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartitioningError {
    #[error("VM {vm} is already bound to a partition that does not intersect the node set of the new constraint")]
    Conflict { vm: VmId },

    #[error("No candidate group of the among constraint is compatible with the partitions of its VMs")]
    NoAvailableGroup,

    #[error("Constraint references unknown node {0}")]
    UnknownNode(NodeId),
}

/// Signals raised while building or solving a reconfiguration model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("VM {vm} requires platform {platform:?} but no node of its partition provides it")]
    NoMatchingPlatform { vm: VmId, platform: Option<PlatformId> },

    #[error("VM {0} has no eligible host once all constraints are posted")]
    NoEligibleHost(VmId),

    #[error("Unsupported transition for VM {vm}: {from} -> {to}")]
    UnsupportedTransition { vm: VmId, from: String, to: String },

    #[error("No duration known for action '{0}'")]
    MissingDuration(String),

    #[error("Unknown VM {0}")]
    UnknownVm(VmId),

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Node {node} cannot deploy platform {platform}")]
    UndeployablePlatform { node: NodeId, platform: PlatformId },
}

/// A VM could not be materialized from its raw source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("VM '{vm}' source misses required attribute '{attribute}'")]
    MissingAttribute { vm: String, attribute: String },

    #[error("VM '{vm}' source has invalid value '{value}' for '{attribute}'")]
    InvalidAttribute { vm: String, attribute: String, value: String },

    #[error("VM '{vm}' source line {line} is not a 'key = value' pair")]
    MalformedLine { vm: String, line: usize },

    #[error("VJob {vjob} references unknown VM '{vm}'")]
    UnknownVm { vjob: VJobId, vm: String },

    #[error("VM '{vm}' requires unknown platform '{platform}'")]
    UnknownPlatform { vm: String, platform: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Action {0} cannot be applied: {1}")]
    Inapplicable(String, ConfigurationError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Driver failed to apply {action}: {reason}")]
    DriverFailure { action: String, reason: String },

    #[error("Plan execution exceeded the assign timeout of {0:?}")]
    Timeout(std::time::Duration),
}

/// Submissions the VJob queue refuses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid VJob id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("VJob {0} is already queued or running")]
    Duplicate(VJobId),
}
