use serde::{Deserialize, Serialize};

use crate::api::constraint_dto::ConstraintDto;

/// A VJob as submitted: VMs given by their raw template source and the
/// constraints they must satisfy. The id is assigned on submission when
/// absent.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VJobDto {
    #[serde(default)]
    pub id: Option<String>,
    pub vms: Vec<VmSourceDto>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmSourceDto {
    pub name: String,

    /// `key = value` lines.
    pub source: String,
}
