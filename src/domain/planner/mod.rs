pub mod planner;
pub mod planning_request;
