pub mod configuration;
pub mod constraint;
pub mod control_loop;
pub mod model;
pub mod partition;
pub mod plan;
pub mod planner;
pub mod utils;
