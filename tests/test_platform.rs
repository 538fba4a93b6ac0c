mod common;

use std::collections::BTreeSet;

use reconf_planner::domain::configuration::configuration::Configuration;
use reconf_planner::domain::configuration::node::Node;
use reconf_planner::domain::configuration::platform::{ANY_PLATFORM, PlatformRegistry, platform_matches};
use reconf_planner::domain::configuration::virtual_machine::VirtualMachine;
use reconf_planner::domain::constraint::constraint::Constraint;
use reconf_planner::domain::constraint::placement_constraint_trait::PlacementConstraint;
use reconf_planner::domain::constraint::platform_compatibility::PlatformCompatibility;
use reconf_planner::domain::model::reconfiguration_model::ModelOptions;
use reconf_planner::domain::model::search::SearchBudget;
use reconf_planner::domain::planner::planning_request::PlanningRequest;
use reconf_planner::domain::utils::id::{NodeId, PlatformId, VmId};

use common::{assert_plan_honours, planner};

fn datacenter() -> Configuration {
    let mut cfg = Configuration::new();
    cfg.add_online(Node::new("xen1", 2, 100, 4096).with_platform("xen"));
    cfg.add_online(Node::new("kvm1", 2, 100, 4096).with_platform("kvm"));
    cfg.add_online(Node::new("bare", 2, 100, 4096));
    cfg
}

fn placed(vm: VirtualMachine, node: &str) -> Configuration {
    let mut cfg = datacenter();
    cfg.set_run_on(vm, &NodeId::from(node)).unwrap();
    cfg
}

fn everything() -> PlatformCompatibility {
    PlatformCompatibility::new(["vm"], ["xen1", "kvm1", "bare"])
}

#[test]
fn mismatch_is_detected_in_both_directions() {
    let on_xen = placed(VirtualMachine::new("vm", 1, 10, 256).with_platform("kvm"), "xen1");
    let on_kvm = placed(VirtualMachine::new("vm", 1, 10, 256).with_platform("xen"), "kvm1");

    assert_eq!(everything().get_misplaced(&on_xen), BTreeSet::from([VmId::from("vm")]));
    assert!(!everything().is_satisfied(&on_kvm));

    assert!(everything().is_satisfied(&placed(VirtualMachine::new("vm", 1, 10, 256).with_platform("kvm"), "kvm1")));
}

#[test]
fn undeclared_platforms_only_match_each_other() {
    let plain = || VirtualMachine::new("vm", 1, 10, 256);

    assert!(everything().is_satisfied(&placed(plain(), "bare")));
    assert!(!everything().is_satisfied(&placed(plain(), "xen1")));
    assert!(!everything().is_satisfied(&placed(plain().with_platform("xen"), "bare")));

    let any = PlatformId::from(ANY_PLATFORM);
    assert!(platform_matches(None, Some(&any)));
    assert!(platform_matches(Some(&PlatformId::from("kvm")), Some(&any)));
    assert!(!platform_matches(None, Some(&PlatformId::from("kvm"))));
}

#[test]
fn wildcard_vm_fits_anywhere() {
    for node in ["xen1", "kvm1", "bare"] {
        let cfg = placed(VirtualMachine::new("vm", 1, 10, 256).with_platform(ANY_PLATFORM), node);
        assert!(everything().is_satisfied(&cfg), "wildcard VM rejected on {}", node);
    }
}

#[test]
fn registry_always_knows_the_wildcard() {
    let registry = PlatformRegistry::with_ids(["xen", "kvm"]).unwrap();
    assert!(registry.contains(&PlatformId::from(ANY_PLATFORM)));
    assert!(registry.contains(&PlatformId::from("kvm")));
    assert!(PlatformRegistry::with_ids(["xen", "xen"]).is_err());
}

#[tokio::test]
async fn misplaced_vm_moves_to_a_matching_node() {
    let cfg = placed(VirtualMachine::new("vm", 1, 10, 256).with_platform("kvm"), "xen1");
    let constraints = vec![Constraint::from(everything())];

    let request = PlanningRequest::new(cfg).constrain(everything());
    let result = planner(ModelOptions { repair: true, ..Default::default() }).solve(request, SearchBudget::unlimited()).await.unwrap();

    let destination = assert_plan_honours(result.plan.as_ref().unwrap(), &constraints);
    assert_eq!(destination.location(&VmId::from("vm")), Some(&NodeId::from("kvm1")));
}
