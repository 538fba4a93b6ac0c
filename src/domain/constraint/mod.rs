pub mod among;
pub mod constraint;
pub mod fence;
pub mod placement_constraint_trait;
pub mod platform_compatibility;
