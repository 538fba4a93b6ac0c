mod common;

use logtest::Logger;

use reconf_planner::api::vjob_dto::VJobDto;
use reconf_planner::domain::configuration::vm_builder::VirtualMachineBuilder;
use reconf_planner::domain::constraint::constraint::{Constraint, ConstraintType};
use reconf_planner::domain::control_loop::vjob::VJob;
use reconf_planner::domain::control_loop::vjob_queue::VJobQueue;
use reconf_planner::error::{BuildError, ConversionError, Error};

use common::cluster;

const VJOB: &str = r#"{
    "id": "analytics",
    "vms": [
        { "name": "worker-1", "source": "memory = 2048\ncpu_demand = 30" },
        { "name": "worker-2", "source": "memory = 2048\nvcpus = 2\nimage = /srv/worker.img" }
    ],
    "constraints": [
        { "type": "among", "groups": [["n1", "n2"], ["n3", "n4"]] },
        { "type": "platform" }
    ]
}"#;

fn parse(json: &str) -> VJobDto {
    serde_json::from_str(json).unwrap()
}

#[test]
fn vjob_document_is_built_with_defaults() {
    let vjob = VJob::build(&parse(VJOB), &VirtualMachineBuilder::new(), &cluster("n", 4)).unwrap();

    assert_eq!(vjob.id.as_str(), "analytics");
    assert_eq!(vjob.vms[0].nb_cpus, 1);
    assert_eq!(vjob.vms[0].memory, 2048);
    assert_eq!(vjob.vms[1].nb_cpus, 2);
    assert_eq!(vjob.vms[1].options.get("image").map(String::as_str), Some("/srv/worker.img"));

    let types: Vec<ConstraintType> = vjob.constraints.iter().map(Constraint::typ).collect();
    assert_eq!(types, vec![ConstraintType::Among, ConstraintType::Platform]);
    assert!(vjob.constraints.iter().all(|c| c.vms().len() == 2));
    assert_eq!(vjob.constraints[1].nodes().len(), 4);
}

#[test]
fn vm_without_memory_cannot_be_built() {
    let dto = parse(r#"{ "vms": [ { "name": "lean", "source": "vcpus = 1" } ] }"#);
    let err = VJob::build(&dto, &VirtualMachineBuilder::new(), &cluster("n", 1)).unwrap_err();

    assert!(matches!(err, Error::Build(BuildError::MissingAttribute { ref vm, ref attribute }) if vm == "lean" && attribute == "memory"));
}

#[test]
fn malformed_constraints_are_conversion_errors() {
    let dto = parse(r#"{ "vms": [ { "name": "a", "source": "memory = 64" } ], "constraints": [ { "type": "fence" } ] }"#);
    let err = VJob::build(&dto, &VirtualMachineBuilder::new(), &cluster("n", 1)).unwrap_err();
    assert!(matches!(err, Error::Conversion(ConversionError::MalformedConstraint { .. })));

    let dto = parse(r#"{ "vms": [ { "name": "a", "source": "memory = 64" } ], "constraints": [ { "type": "spread", "nodes": ["n1"] } ] }"#);
    let err = VJob::build(&dto, &VirtualMachineBuilder::new(), &cluster("n", 1)).unwrap_err();
    assert!(matches!(err, Error::Conversion(ConversionError::UnknownConstraintType(ref t)) if t == "spread"));
}

#[test]
fn rejected_vjobs_are_logged_as_errors() {
    let mut logger = Logger::start();

    let dir = tempfile::tempdir().unwrap();
    let queue = VJobQueue::open(dir.path()).unwrap();
    let id = queue.submit(parse(r#"{ "vms": [ { "name": "lean", "source": "vcpus = 1" } ] }"#)).unwrap();
    assert!(queue.reject(&id, "memory is missing").unwrap());

    let mut found = false;
    while let Some(record) = logger.pop() {
        if record.level() == log::Level::Error && record.args().contains("rejected: memory is missing") {
            found = true;
        }
    }
    assert!(found, "rejection was not logged");
}
