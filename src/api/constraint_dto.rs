use serde::{Deserialize, Serialize};

use crate::domain::configuration::configuration::Configuration;
use crate::domain::constraint::among::Among;
use crate::domain::constraint::constraint::{Constraint, ConstraintType};
use crate::domain::constraint::fence::Fence;
use crate::domain::constraint::platform_compatibility::PlatformCompatibility;
use crate::domain::utils::id::{NodeId, VmId};
use crate::error::ConversionError;

/// A constraint as declared in a VJob.
///
/// `vms` defaults to every VM of the VJob. For `platform`, an empty `nodes`
/// list means every node of the configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintDto {
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default)]
    pub vms: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub groups: Vec<Vec<String>>,
}

/// `(dto, VMs of the declaring VJob, current configuration)`
impl TryFrom<(ConstraintDto, &[VmId], &Configuration)> for Constraint {
    type Error = ConversionError;

    fn try_from((dto, vjob_vms, configuration): (ConstraintDto, &[VmId], &Configuration)) -> Result<Self, Self::Error> {
        let typ: ConstraintType = dto.typ.parse()?;
        let malformed = |reason: &str| ConversionError::MalformedConstraint { typ: dto.typ.clone(), reason: reason.to_string() };

        let vms: Vec<VmId> = if dto.vms.is_empty() { vjob_vms.to_vec() } else { dto.vms.iter().cloned().map(VmId::new).collect() };
        if vms.is_empty() {
            return Err(malformed("no VM to constrain"));
        }

        match typ {
            ConstraintType::Fence => {
                if dto.nodes.is_empty() {
                    return Err(malformed("empty node set"));
                }
                Ok(Constraint::Fence(Fence::new(vms, dto.nodes.iter().cloned().map(NodeId::new))))
            }
            ConstraintType::Among => {
                if dto.groups.is_empty() || dto.groups.iter().any(Vec::is_empty) {
                    return Err(malformed("groups must be non-empty"));
                }
                let groups = dto.groups.iter().map(|group| group.iter().cloned().map(NodeId::new).collect::<Vec<NodeId>>());
                Ok(Constraint::Among(Among::new(vms, groups)))
            }
            ConstraintType::Platform => {
                let nodes: Vec<NodeId> = if dto.nodes.is_empty() { configuration.node_ids().cloned().collect() } else { dto.nodes.iter().cloned().map(NodeId::new).collect() };
                Ok(Constraint::Platform(PlatformCompatibility::new(vms, nodes)))
            }
        }
    }
}
