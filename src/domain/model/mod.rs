pub mod duration_evaluator;
pub mod hoster_domains;
pub mod reconfiguration_model;
pub mod scheduler;
pub mod search;
pub mod slice;
pub mod solution_statistics;
pub mod transition;
