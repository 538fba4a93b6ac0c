use std::collections::BTreeSet;

use crate::domain::configuration::configuration::Configuration;
use crate::domain::model::reconfiguration_model::ReconfigurationModel;
use crate::domain::utils::id::VmId;
use crate::error::ModelError;

/// Capabilities shared by every placement constraint.
pub trait PlacementConstraint {
    /// Narrows the hoster domains of the model. Fails when the constraint
    /// can be proven unsatisfiable before any search.
    fn inject(&self, model: &mut ReconfigurationModel) -> Result<(), ModelError>;

    fn is_satisfied(&self, configuration: &Configuration) -> bool;

    /// VMs that have to move for the constraint to hold.
    fn get_misplaced(&self, configuration: &Configuration) -> BTreeSet<VmId>;
}
