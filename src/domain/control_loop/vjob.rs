use std::collections::BTreeSet;

use uuid::Uuid;

use crate::api::vjob_dto::VJobDto;
use crate::domain::configuration::configuration::Configuration;
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::configuration::vm_builder::VirtualMachineBuilder;
use crate::domain::constraint::constraint::Constraint;
use crate::domain::constraint::placement_constraint_trait::PlacementConstraint;
use crate::domain::utils::id::{VJobId, VmId};
use crate::error::{BuildError, Error};

/// A group of VMs submitted together, with the constraints they carry for
/// their whole lifetime.
#[derive(Debug, Clone)]
pub struct VJob {
    pub id: VJobId,
    pub vms: Vec<VirtualMachine>,
    pub constraints: Vec<Constraint>,
}

impl VJob {
    /// Materializes the VMs from their raw sources and converts the
    /// constraints. Constraints may only name VMs of the VJob.
    pub fn build(dto: &VJobDto, builder: &VirtualMachineBuilder, configuration: &Configuration) -> Result<VJob, Error> {
        let id = VJobId::new(dto.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()));

        let vms = dto.vms.iter().map(|vm| builder.build(&vm.name, &vm.source)).collect::<Result<Vec<_>, BuildError>>()?;
        let vm_ids: Vec<VmId> = vms.iter().map(|vm| vm.id.clone()).collect();

        let mut constraints = Vec::with_capacity(dto.constraints.len());
        for constraint_dto in &dto.constraints {
            if let Some(unknown) = constraint_dto.vms.iter().find(|name| !vm_ids.iter().any(|id| id.as_str() == name.as_str())) {
                return Err(BuildError::UnknownVm { vjob: id, vm: unknown.clone() }.into());
            }
            constraints.push(Constraint::try_from((constraint_dto.clone(), vm_ids.as_slice(), configuration))?);
        }

        Ok(VJob { id, vms, constraints })
    }

    pub fn vm_ids(&self) -> BTreeSet<VmId> {
        self.vms.iter().map(|vm| vm.id.clone()).collect()
    }

    /// Constraints the configuration does not satisfy.
    pub fn violated<'a>(&'a self, configuration: &Configuration) -> Vec<&'a Constraint> {
        self.constraints.iter().filter(|c| !c.is_satisfied(configuration)).collect()
    }
}
