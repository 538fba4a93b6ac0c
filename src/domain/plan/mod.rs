pub mod action;
pub mod dot;
pub mod timed_reconfiguration_plan;
