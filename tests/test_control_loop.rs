use std::fs;
use std::path::Path;
use std::time::Duration;

use reconf_planner::api::constraint_dto::ConstraintDto;
use reconf_planner::api::vjob_dto::{VJobDto, VmSourceDto};
use reconf_planner::domain::control_loop::control_loop::{ControlLoop, CycleOutcome, LoopState};
use reconf_planner::domain::control_loop::control_loop_config::ControlLoopConfig;
use reconf_planner::domain::control_loop::control_loop_type::ControlLoopType;
use reconf_planner::domain::control_loop::driver::DriverType;
use reconf_planner::domain::utils::id::{NodeId, VmId};
use reconf_planner::load_configuration;

const CONFIGURATION: &str = r#"{
    "nodes": [
        { "id": "n1", "nbCpus": 2, "cpuRate": 100, "memory": 4096 },
        { "id": "n2", "nbCpus": 2, "cpuRate": 100, "memory": 4096 }
    ],
    "vms": []
}"#;

fn config(dir: &Path, driver: DriverType, reconfigure: bool) -> ControlLoopConfig {
    let configuration_path = dir.join("configuration.json");
    fs::write(&configuration_path, CONFIGURATION).unwrap();

    ControlLoopConfig {
        loop_type: ControlLoopType::Reactive,
        logs_dir: dir.join("logs"),
        vjobs_path: dir.join("vjobs"),
        configuration_path: configuration_path.clone(),
        assign_timeout: Duration::from_secs(10),
        plan_timeout: Duration::from_secs(10),
        prediction_step: Duration::from_secs(1),
        reconfigure,
        driver,
        snapshot_path: Some(configuration_path),
        durations: None,
        horizon: None,
        optimize: false,
        platforms: Vec::new(),
    }
}

fn vjob(vm: &str, source: &str, fence: &[&str]) -> VJobDto {
    let constraints = if fence.is_empty() {
        Vec::new()
    } else {
        vec![ConstraintDto { typ: "fence".to_string(), vms: Vec::new(), nodes: fence.iter().map(|n| n.to_string()).collect(), groups: Vec::new() }]
    };
    VJobDto { id: None, vms: vec![VmSourceDto { name: vm.to_string(), source: source.to_string() }], constraints }
}

#[tokio::test]
async fn queued_vjob_is_placed_then_the_loop_settles() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), DriverType::Snapshot, true);
    let mut control_loop = ControlLoop::from_config(config.clone()).unwrap();

    let id = control_loop.queue().submit(vjob("web", "memory = 1024\ncpu_demand = 50", &["n2"])).unwrap();

    let outcome = control_loop.run_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Executed { actions: 1, admitted: vec![id] });
    assert_eq!(control_loop.state(), LoopState::Idle);
    assert_eq!(control_loop.queue().queued_len(), 0);
    assert_eq!(control_loop.queue().running_len(), 1);

    let configuration = load_configuration(&config.configuration_path).unwrap();
    assert_eq!(configuration.location(&VmId::from("web")), Some(&NodeId::from("n2")));

    assert!(config.logs_dir.join("configuration-1.json").exists());
    assert!(fs::read_to_string(config.logs_dir.join("plan-1.dot")).unwrap().contains("instantiate(web)"));

    assert_eq!(control_loop.run_cycle().await.unwrap(), CycleOutcome::Idle);
    assert!(!config.logs_dir.join("plan-2.dot").exists());
}

#[tokio::test]
async fn dry_run_keeps_vjobs_queued() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), DriverType::Logging, false);
    let mut control_loop = ControlLoop::from_config(config.clone()).unwrap();

    let id = control_loop.queue().submit(vjob("batch", "memory = 512", &[])).unwrap();

    let outcome = control_loop.run_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::DryRun { actions: 1, admitted: vec![id] });
    assert_eq!(control_loop.queue().queued_len(), 1);
    assert!(load_configuration(&config.configuration_path).unwrap().vms().next().is_none());
}

#[tokio::test]
async fn oversized_vjob_waits_and_broken_vjob_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), DriverType::Snapshot, true);
    let mut control_loop = ControlLoop::from_config(config).unwrap();

    control_loop.queue().submit(vjob("huge", "memory = 8192", &[])).unwrap();
    control_loop.queue().submit(vjob("broken", "vcpus = 2", &[])).unwrap();

    let outcome = control_loop.run_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Executed { actions: 0, admitted: Vec::new() });

    let queued: Vec<String> = control_loop.queue().queued().into_iter().flat_map(|dto| dto.vms).map(|vm| vm.name).collect();
    assert_eq!(queued, vec!["huge".to_string()]);
    assert_eq!(control_loop.queue().running_len(), 0);
}

#[tokio::test]
async fn vjobs_survive_a_restart_of_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), DriverType::Snapshot, true);

    {
        let mut control_loop = ControlLoop::from_config(config.clone()).unwrap();
        control_loop.queue().submit(vjob("db", "memory = 2048", &["n1"])).unwrap();
        assert!(matches!(control_loop.run_cycle().await.unwrap(), CycleOutcome::Executed { .. }));
    }

    let mut restarted = ControlLoop::from_config(config.clone()).unwrap();
    assert_eq!(restarted.queue().running_len(), 1);
    assert_eq!(restarted.run_cycle().await.unwrap(), CycleOutcome::Idle);

    let mut configuration = load_configuration(&config.configuration_path).unwrap();
    configuration.remove_vm(&VmId::from("db"));
    let dto = reconf_planner::api::configuration_dto::ConfigurationDto::from(&configuration);
    reconf_planner::loader::parser::write_json_file(&config.configuration_path, &dto).unwrap();

    assert_eq!(restarted.run_cycle().await.unwrap(), CycleOutcome::Idle);
    assert_eq!(restarted.queue().running_len(), 0);
}

#[tokio::test]
async fn vjob_claiming_a_vm_of_another_vjob_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), DriverType::Snapshot, true);
    let mut control_loop = ControlLoop::from_config(config.clone()).unwrap();

    control_loop.queue().submit(vjob("db", "memory = 2048", &["n1"])).unwrap();
    assert!(matches!(control_loop.run_cycle().await.unwrap(), CycleOutcome::Executed { .. }));

    control_loop.queue().submit(vjob("db", "memory = 512", &["n2"])).unwrap();
    let first = control_loop.queue().submit(vjob("cache", "memory = 256", &[])).unwrap();
    control_loop.queue().submit(vjob("cache", "memory = 256", &[])).unwrap();

    let outcome = control_loop.run_cycle().await.unwrap();
    assert_eq!(outcome, CycleOutcome::Executed { actions: 1, admitted: vec![first] });
    assert_eq!(control_loop.queue().queued_len(), 0);
    assert_eq!(control_loop.queue().running_len(), 2);

    let configuration = load_configuration(&config.configuration_path).unwrap();
    assert_eq!(configuration.location(&VmId::from("db")), Some(&NodeId::from("n1")));
    assert_eq!(configuration.get_vm(&VmId::from("db")).map(|vm| vm.memory), Some(2048));
}

#[tokio::test]
async fn unbuildable_queued_file_without_id_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path(), DriverType::Logging, true);
    let queued_dir = config.vjobs_path.join("queued");
    fs::create_dir_all(&queued_dir).unwrap();
    fs::write(queued_dir.join("0000000000-orphan.json"), r#"{ "vms": [ { "name": "lean", "source": "vcpus = 1" } ] }"#).unwrap();

    let mut control_loop = ControlLoop::from_config(config.clone()).unwrap();
    assert_eq!(control_loop.queue().queued_len(), 1);

    control_loop.run_cycle().await.unwrap();
    assert_eq!(control_loop.queue().queued_len(), 0);
    assert_eq!(fs::read_dir(&queued_dir).unwrap().count(), 0);
    assert_eq!(control_loop.run_cycle().await.unwrap(), CycleOutcome::Idle);
}
