mod common;

use std::time::Duration;

use reconf_planner::domain::configuration::node::Node;
use reconf_planner::domain::configuration::virtual_machine::VirtualMachine;
use reconf_planner::domain::constraint::among::Among;
use reconf_planner::domain::constraint::constraint::Constraint;
use reconf_planner::domain::constraint::fence::Fence;
use reconf_planner::domain::constraint::platform_compatibility::PlatformCompatibility;
use reconf_planner::domain::model::reconfiguration_model::ModelOptions;
use reconf_planner::domain::model::search::{SearchBudget, SolveStatus};
use reconf_planner::domain::plan::action::{Action, ActionKind};
use reconf_planner::domain::planner::planning_request::PlanningRequest;
use reconf_planner::domain::utils::id::{NodeId, PlatformId, VmId};
use reconf_planner::error::ModelError;

use common::{assert_plan_honours, cluster, planner, run};

fn find(actions: &[&Action], kind: ActionKind) -> Action {
    actions.iter().find(|a| a.kind() == kind).map(|a| (*a).clone()).unwrap_or_else(|| panic!("no {} action in the plan", kind.as_str()))
}

#[tokio::test]
async fn destination_satisfies_fence_and_among() {
    let mut cfg = cluster("n", 4);
    run(&mut cfg, "vm1", 1024, "n1");
    run(&mut cfg, "vm2", 1024, "n1");
    run(&mut cfg, "vm3", 1024, "n1");
    run(&mut cfg, "vm4", 1024, "n2");

    let constraints: Vec<Constraint> = vec![Fence::new(["vm1", "vm2"], ["n3", "n4"]).into(), Among::new(["vm3", "vm4"], [vec!["n1"], vec!["n2"]]).into()];
    let mut request = PlanningRequest::new(cfg);
    for c in &constraints {
        request = request.constrain(c.clone());
    }

    let result = planner(ModelOptions::default()).solve(request, SearchBudget::unlimited()).await.unwrap();
    assert!(result.status.has_plan(), "unexpected status {}", result.status);

    let destination = assert_plan_honours(result.plan.as_ref().unwrap(), &constraints);
    let vm3 = destination.location(&VmId::from("vm3")).unwrap();
    assert_eq!(destination.location(&VmId::from("vm4")), Some(vm3));
}

#[tokio::test]
async fn optimizing_reaches_the_cheapest_plan() {
    let mut cfg = cluster("n", 3);
    run(&mut cfg, "vm1", 1024, "n1");
    run(&mut cfg, "vm2", 1024, "n2");

    let request = PlanningRequest::new(cfg).constrain(Fence::new(["vm1"], ["n2", "n3"]));
    let result = planner(ModelOptions { optimize: true, ..Default::default() }).solve(request, SearchBudget::unlimited()).await.unwrap();

    assert_eq!(result.status, SolveStatus::Optimal);
    let plan = result.plan.unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(result.statistics.objective, Some(plan.cost()));
}

#[tokio::test]
async fn overloaded_fence_is_infeasible() {
    let mut cfg = cluster("n", 2);
    run(&mut cfg, "vm1", 3000, "n1");
    run(&mut cfg, "vm2", 3000, "n2");

    let request = PlanningRequest::new(cfg).constrain(Fence::new(["vm1", "vm2"], ["n1"]));
    let result = planner(ModelOptions::default()).solve(request, SearchBudget::unlimited()).await.unwrap();

    assert_eq!(result.status, SolveStatus::Infeasible);
    assert!(result.plan.is_none());
    assert_eq!(result.violated.len(), 1);
}

#[tokio::test]
async fn missing_platform_is_reported_as_the_cause() {
    let mut cfg = cluster("n", 0);
    cfg.add_online(Node::new("n1", 2, 100, 4096).with_platform("xen"));
    cfg.add_online(Node::new("n2", 2, 100, 4096).with_platform("xen").with_available_platforms(["xen", "kvm"]));
    let guest = VirtualMachine::new("guest", 1, 50, 512).with_platform("kvm");

    let request = PlanningRequest::new(cfg.clone()).instantiate(guest.clone()).constrain(PlatformCompatibility::new(["guest"], ["n1", "n2"]));
    let result = planner(ModelOptions::default()).solve(request, SearchBudget::unlimited()).await.unwrap();

    assert_eq!(result.status, SolveStatus::Infeasible);
    assert_eq!(result.cause, Some(ModelError::NoMatchingPlatform { vm: VmId::from("guest"), platform: Some(PlatformId::from("kvm")) }));

    let constraints: Vec<Constraint> = vec![PlatformCompatibility::new(["guest"], ["n1", "n2"]).into()];
    let request = PlanningRequest::new(cfg).instantiate(guest).deploy("n2", "kvm").constrain(constraints[0].clone());
    let result = planner(ModelOptions::default()).solve(request, SearchBudget::unlimited()).await.unwrap();
    assert!(result.status.has_plan(), "unexpected status {}", result.status);

    let plan = result.plan.unwrap();
    let destination = assert_plan_honours(&plan, &constraints);
    assert_eq!(destination.location(&VmId::from("guest")), Some(&NodeId::from("n2")));

    let actions = plan.actions();
    let deploy = find(&actions, ActionKind::Deploy);
    let instantiate = find(&actions, ActionKind::Instantiate);
    assert!(deploy.end <= instantiate.start);
}

#[tokio::test]
async fn booted_node_receives_vms_once_online() {
    let mut cfg = cluster("n", 1);
    cfg.add_offline(Node::new("n2", 2, 100, 4096));
    run(&mut cfg, "vm1", 1024, "n1");

    let constraints: Vec<Constraint> = vec![Fence::new(["vm1"], ["n2"]).into()];
    let request = PlanningRequest::new(cfg).boot("n2").constrain(constraints[0].clone());
    let result = planner(ModelOptions::default()).solve(request, SearchBudget::unlimited()).await.unwrap();

    let plan = result.plan.unwrap();
    assert_plan_honours(&plan, &constraints);

    let actions = plan.actions();
    let startup = find(&actions, ActionKind::Startup);
    let migration = find(&actions, ActionKind::Migration);
    assert!(startup.end <= migration.start);
}

#[tokio::test]
async fn halted_node_is_evacuated_first() {
    let mut cfg = cluster("n", 2);
    run(&mut cfg, "vm1", 1024, "n2");

    let request = PlanningRequest::new(cfg).halt("n2");
    let result = planner(ModelOptions { repair: true, ..Default::default() }).solve(request, SearchBudget::unlimited()).await.unwrap();

    let plan = result.plan.unwrap();
    let destination = assert_plan_honours(&plan, &[]);
    assert!(!destination.is_online(&NodeId::from("n2")));
    assert_eq!(destination.location(&VmId::from("vm1")), Some(&NodeId::from("n1")));

    let actions = plan.actions();
    let migration = find(&actions, ActionKind::Migration);
    let shutdown = find(&actions, ActionKind::Shutdown);
    assert!(migration.end <= shutdown.start);
}

#[tokio::test]
async fn suspended_and_stopped_vms_leave_the_running_set() {
    let mut cfg = cluster("n", 2);
    run(&mut cfg, "vm1", 1024, "n1");
    run(&mut cfg, "vm2", 1024, "n2");

    let request = PlanningRequest::new(cfg).sleep("vm1").wait("vm2");
    let result = planner(ModelOptions::default()).solve(request, SearchBudget::unlimited()).await.unwrap();

    let destination = assert_plan_honours(result.plan.as_ref().unwrap(), &[]);
    assert_eq!(destination.sleepings().count(), 1);
    assert_eq!(destination.waitings().count(), 1);
    assert_eq!(destination.runnings().count(), 0);
}

#[tokio::test]
async fn tight_budget_never_yields_a_violating_plan() {
    let mut cfg = cluster("n", 8);
    for i in 0..16 {
        run(&mut cfg, &format!("vm{}", i), 512, &format!("n{}", i % 8 + 1));
    }

    let constraints: Vec<Constraint> = vec![
        Fence::new((0..8).map(|i| format!("vm{}", i)), ["n5", "n6", "n7", "n8"]).into(),
        Among::new((8..12).map(|i| format!("vm{}", i)), [vec!["n1", "n2"], vec!["n3", "n4"]]).into(),
    ];
    let mut request = PlanningRequest::new(cfg);
    for c in &constraints {
        request = request.constrain(c.clone());
    }

    let options = ModelOptions { optimize: true, ..Default::default() };
    let result = planner(options).solve(request, SearchBudget::with_timeout(Duration::from_millis(5))).await.unwrap();

    match &result.plan {
        Some(plan) => {
            assert!(result.status.has_plan());
            assert_plan_honours(plan, &constraints);
        }
        None => assert!(!result.status.has_plan()),
    }
}

#[tokio::test]
async fn cancelled_budget_stops_the_search() {
    let mut cfg = cluster("n", 2);
    run(&mut cfg, "vm1", 1024, "n1");

    let budget = SearchBudget::unlimited();
    budget.cancel();
    assert!(budget.is_exhausted());

    let request = PlanningRequest::new(cfg).constrain(Fence::new(["vm1"], ["n2"]));
    let result = planner(ModelOptions::default()).solve(request, budget).await.unwrap();
    assert!(result.plan.is_none());
    assert_ne!(result.status, SolveStatus::Optimal);
}
