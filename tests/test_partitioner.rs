mod common;

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use reconf_planner::domain::configuration::virtual_machine::VirtualMachine;
use reconf_planner::domain::constraint::among::Among;
use reconf_planner::domain::constraint::constraint::Constraint;
use reconf_planner::domain::constraint::fence::Fence;
use reconf_planner::domain::model::transition::NodeTargets;
use reconf_planner::domain::partition::partitioner::Partitioner;
use reconf_planner::domain::utils::id::{NodeId, VmId};

use common::cluster;

fn node_group(group: usize) -> Vec<String> {
    (0..5).map(|i| format!("N{}", group * 5 + i + 1)).collect()
}

fn vm_group(group: usize) -> Vec<String> {
    (0..10).map(|i| format!("VM{}-{}", group, i)).collect()
}

#[test]
fn fenced_vm_groups_split_the_cluster_by_node_group() {
    let mut cfg = cluster("N", 20);
    for g in 0..5 {
        for vm in vm_group(g) {
            cfg.set_waiting(VirtualMachine::new(vm.as_str(), 1, 10, 256));
        }
    }

    let mut partitioner = Partitioner::new(&cfg, &[], &NodeTargets::default());
    for g in 0..5 {
        partitioner.part(&Fence::new(vm_group(g), node_group(g % 4)).into()).unwrap();
    }

    let partitions = partitioner.get_resulting_partitions();
    assert_eq!(partitions.len(), 4);

    for g in 0..4 {
        let expected: BTreeSet<NodeId> = node_group(g).into_iter().map(NodeId::from).collect();
        let owner = partitions.iter().find(|p| p.node_set() == expected).expect("one partition per node group");

        let mut expected_vms: BTreeSet<VmId> = vm_group(g).into_iter().map(VmId::from).collect();
        if g == 0 {
            expected_vms.extend(vm_group(4).into_iter().map(VmId::from));
        }
        assert_eq!(owner.vms, expected_vms);
        assert!(!owner.constraints.is_empty());
    }
}

#[test]
fn partitions_stay_disjoint_under_random_constraints() {
    let mut rng = StdRng::seed_from_u64(42);
    let mut cfg = cluster("N", 12);
    for i in 0..30 {
        let vm = VirtualMachine::new(format!("VM{}", i), 1, 10, 128);
        if rng.random_bool(0.5) {
            cfg.set_run_on(vm, &NodeId::from(format!("N{}", rng.random_range(1..=12)))).unwrap();
        } else {
            cfg.set_waiting(vm);
        }
    }

    let random_nodes = |rng: &mut StdRng, count: usize| -> Vec<String> { (0..count).map(|_| format!("N{}", rng.random_range(1..=12))).collect() };

    let mut partitioner = Partitioner::new(&cfg, &[], &NodeTargets::default());
    let mut accepted = Vec::new();
    for _ in 0..15 {
        let vms: Vec<String> = (0..3).map(|_| format!("VM{}", rng.random_range(0..30))).collect();
        let constraint: Constraint = if rng.random_bool(0.7) {
            Fence::new(vms, random_nodes(&mut rng, 2)).into()
        } else {
            Among::new(vms, [random_nodes(&mut rng, 2), random_nodes(&mut rng, 2)]).into()
        };

        if partitioner.part(&constraint).is_ok() {
            accepted.push(constraint);
        }
    }
    assert!(!accepted.is_empty());

    let partitions = partitioner.get_resulting_partitions();

    let mut seen_nodes = BTreeSet::new();
    let mut seen_vms = BTreeSet::new();
    for partition in &partitions {
        for node in &partition.nodes {
            assert!(seen_nodes.insert(node.clone()), "{} belongs to two partitions", node);
        }
        for vm in &partition.vms {
            assert!(seen_vms.insert(vm.clone()), "{} belongs to two partitions", vm);
        }
    }
    assert_eq!(seen_nodes.len(), 12);
    assert_eq!(seen_vms.len(), 30);

    for (vm, host) in cfg.runnings() {
        let owner = partitions.iter().find(|p| p.contains_vm(vm)).unwrap();
        assert!(owner.contains_node(host), "{} was separated from its host", vm);
    }

    for constraint in &accepted {
        if let Constraint::Fence(fence) = constraint {
            for vm in &fence.vms {
                let owner = partitions.iter().find(|p| p.contains_vm(vm)).unwrap();
                assert!(fence.nodes.iter().all(|n| owner.contains_node(n)));
            }
        }
    }
}

#[test]
fn new_vms_are_partitioned_like_waiting_ones() {
    let cfg = cluster("N", 4);
    let new_vm = VirtualMachine::new("fresh", 1, 10, 256);

    let mut partitioner = Partitioner::new(&cfg, &[new_vm], &NodeTargets::default());
    partitioner.part(&Fence::new(["fresh"], ["N3", "N4"]).into()).unwrap();

    let partitions = partitioner.get_resulting_partitions();
    assert_eq!(partitions.len(), 3);
    let owner = partitions.iter().find(|p| p.contains_vm(&"fresh".into())).unwrap();
    assert_eq!(owner.nodes, vec![NodeId::from("N3"), NodeId::from("N4")]);
}

#[test]
fn among_tie_goes_to_the_first_declared_group() {
    let mut cfg = cluster("N", 4);
    for vm in ["VM1", "VM2"] {
        cfg.set_waiting(VirtualMachine::new(vm, 1, 10, 256));
    }

    for (groups, chosen, untouched) in [
        ([vec!["N1", "N2"], vec!["N3", "N4"]], ["N1", "N2"], ["N3", "N4"]),
        ([vec!["N3", "N4"], vec!["N1", "N2"]], ["N3", "N4"], ["N1", "N2"]),
    ] {
        let mut partitioner = Partitioner::new(&cfg, &[], &NodeTargets::default());
        partitioner.part(&Among::new(["VM1", "VM2"], groups).into()).unwrap();

        let partitions = partitioner.get_resulting_partitions();
        assert_eq!(partitions.len(), 3);

        let owner = partitions.iter().find(|p| p.contains_vm(&VmId::from("VM1"))).unwrap();
        assert!(owner.contains_vm(&VmId::from("VM2")));
        assert_eq!(owner.node_set(), chosen.into_iter().map(NodeId::from).collect::<BTreeSet<_>>());

        for node in untouched {
            let single = partitions.iter().find(|p| p.contains_node(&NodeId::from(node))).unwrap();
            assert_eq!(single.nodes.len(), 1, "{} was merged", node);
            assert!(single.vms.is_empty());
        }
    }
}
