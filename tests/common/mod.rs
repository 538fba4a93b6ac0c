#![allow(dead_code)]

use std::sync::Arc;

use reconf_planner::domain::configuration::configuration::Configuration;
use reconf_planner::domain::configuration::node::Node;
use reconf_planner::domain::configuration::virtual_machine::VirtualMachine;
use reconf_planner::domain::constraint::constraint::Constraint;
use reconf_planner::domain::constraint::placement_constraint_trait::PlacementConstraint;
use reconf_planner::domain::model::duration_evaluator::LinearDurationEvaluator;
use reconf_planner::domain::model::reconfiguration_model::ModelOptions;
use reconf_planner::domain::plan::timed_reconfiguration_plan::TimedReconfigurationPlan;
use reconf_planner::domain::planner::planner::Planner;
use reconf_planner::domain::utils::id::NodeId;

pub const NODE_MEMORY: i64 = 4096;

/// `count` online nodes named `<prefix>1..=<prefix>count`, 2 CPUs each.
pub fn cluster(prefix: &str, count: usize) -> Configuration {
    let mut cfg = Configuration::new();
    for i in 1..=count {
        cfg.add_online(Node::new(format!("{}{}", prefix, i), 2, 100, NODE_MEMORY));
    }
    cfg
}

pub fn run(cfg: &mut Configuration, vm: &str, memory: i64, node: &str) {
    cfg.set_run_on(VirtualMachine::new(vm, 1, 50, memory), &NodeId::from(node)).unwrap();
}

pub fn planner(options: ModelOptions) -> Planner {
    Planner::new(Arc::new(LinearDurationEvaluator::uniform(2)), options)
}

/// Checks everything a returned plan must guarantee.
pub fn assert_plan_honours(plan: &TimedReconfigurationPlan, constraints: &[Constraint]) -> Configuration {
    assert!(plan.is_valid(), "plan has conflicting actions");

    let destination = plan.destination().unwrap();
    assert!(destination.is_viable(), "destination overloads a node");
    destination.check_invariants().unwrap();

    for constraint in constraints {
        assert!(constraint.is_satisfied(&destination), "{} is violated by the destination", constraint);
    }
    destination
}
