use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::domain::configuration::configuration::Configuration;
use crate::domain::constraint::among::Among;
use crate::domain::constraint::fence::Fence;
use crate::domain::constraint::placement_constraint_trait::PlacementConstraint;
use crate::domain::constraint::platform_compatibility::PlatformCompatibility;
use crate::domain::model::reconfiguration_model::ReconfigurationModel;
use crate::domain::utils::id::{NodeId, VmId};
use crate::error::{ConversionError, ModelError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintType {
    Fence,
    Among,
    Platform,
}

impl FromStr for ConstraintType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fence" => Ok(ConstraintType::Fence),
            "among" => Ok(ConstraintType::Among),
            "platform" => Ok(ConstraintType::Platform),
            _ => Err(ConversionError::UnknownConstraintType(s.to_string())),
        }
    }
}

impl ConstraintType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintType::Fence => "fence",
            ConstraintType::Among => "among",
            ConstraintType::Platform => "platform",
        }
    }
}

/// The placement constraints the planner understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Fence(Fence),
    Among(Among),
    Platform(PlatformCompatibility),
}

impl Constraint {
    pub fn typ(&self) -> ConstraintType {
        match self {
            Constraint::Fence(_) => ConstraintType::Fence,
            Constraint::Among(_) => ConstraintType::Among,
            Constraint::Platform(_) => ConstraintType::Platform,
        }
    }

    pub fn vms(&self) -> &BTreeSet<VmId> {
        match self {
            Constraint::Fence(c) => &c.vms,
            Constraint::Among(c) => &c.vms,
            Constraint::Platform(c) => &c.vms,
        }
    }

    /// Every node named by the constraint.
    pub fn nodes(&self) -> BTreeSet<NodeId> {
        match self {
            Constraint::Fence(c) => c.nodes.clone(),
            Constraint::Among(c) => c.groups.iter().flatten().cloned().collect(),
            Constraint::Platform(c) => c.nodes.clone(),
        }
    }

    /// The part of the constraint concerning a partition, `None` when it
    /// names none of its VMs.
    pub fn restrict(&self, nodes: &BTreeSet<NodeId>, vms: &BTreeSet<VmId>) -> Option<Constraint> {
        match self {
            Constraint::Fence(c) => c.restrict(nodes, vms).map(Constraint::Fence),
            Constraint::Among(c) => c.restrict(nodes, vms).map(Constraint::Among),
            Constraint::Platform(c) => c.restrict(nodes, vms).map(Constraint::Platform),
        }
    }

    fn as_placement(&self) -> &dyn PlacementConstraint {
        match self {
            Constraint::Fence(c) => c,
            Constraint::Among(c) => c,
            Constraint::Platform(c) => c,
        }
    }
}

impl PlacementConstraint for Constraint {
    fn inject(&self, model: &mut ReconfigurationModel) -> Result<(), ModelError> {
        self.as_placement().inject(model)
    }

    fn is_satisfied(&self, configuration: &Configuration) -> bool {
        self.as_placement().is_satisfied(configuration)
    }

    fn get_misplaced(&self, configuration: &Configuration) -> BTreeSet<VmId> {
        self.as_placement().get_misplaced(configuration)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Fence(c) => write!(f, "{}", c),
            Constraint::Among(c) => write!(f, "{}", c),
            Constraint::Platform(c) => write!(f, "{}", c),
        }
    }
}

impl From<Fence> for Constraint {
    fn from(c: Fence) -> Self {
        Constraint::Fence(c)
    }
}

impl From<Among> for Constraint {
    fn from(c: Among) -> Self {
        Constraint::Among(c)
    }
}

impl From<PlatformCompatibility> for Constraint {
    fn from(c: PlatformCompatibility) -> Self {
        Constraint::Platform(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_types_parse_by_name() {
        for typ in [ConstraintType::Fence, ConstraintType::Among, ConstraintType::Platform] {
            assert_eq!(typ.as_str().parse::<ConstraintType>().unwrap(), typ);
        }
        assert!(matches!("spread".parse::<ConstraintType>(), Err(ConversionError::UnknownConstraintType(t)) if t == "spread"));
    }

    #[test]
    fn restriction_keeps_only_the_partition_members() {
        let fence: Constraint = Fence::new(["vm1", "vm2"], ["n1", "n2"]).into();
        let nodes = BTreeSet::from([NodeId::from("n2"), NodeId::from("n3")]);

        let restricted = fence.restrict(&nodes, &BTreeSet::from([VmId::from("vm2")])).unwrap();
        assert_eq!(restricted.vms(), &BTreeSet::from([VmId::from("vm2")]));
        assert_eq!(restricted.nodes(), BTreeSet::from([NodeId::from("n2")]));

        assert!(fence.restrict(&nodes, &BTreeSet::from([VmId::from("vm9")])).is_none());
    }
}
