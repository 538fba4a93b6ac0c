use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::configuration::configuration::{Configuration, VmState};
use crate::domain::configuration::node::Node;
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::domain::utils::id::{NodeId, PlatformId, VmId};
use crate::error::ConversionError;

fn default_true() -> bool {
    true
}

fn default_cpus() -> i64 {
    1
}

/// Snapshot of the datacenter as reported by the monitoring layer.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationDto {
    pub nodes: Vec<NodeDto>,
    #[serde(default)]
    pub vms: Vec<VmDto>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeDto {
    pub id: String,
    pub nb_cpus: i64,
    pub cpu_rate: i64,
    pub memory: i64,
    #[serde(default = "default_true")]
    pub online: bool,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub available_platforms: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VmDto {
    pub id: String,
    #[serde(default = "default_cpus")]
    pub nb_cpus: i64,
    pub cpu_demand: i64,
    #[serde(default)]
    pub cpu_max: Option<i64>,
    pub memory: i64,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    /// "running", "sleeping" or "waiting".
    pub state: String,
    #[serde(default)]
    pub host: Option<String>,
}

impl From<NodeDto> for Node {
    fn from(dto: NodeDto) -> Self {
        Node {
            id: NodeId::new(dto.id),
            nb_cpus: dto.nb_cpus,
            cpu_rate: dto.cpu_rate,
            memory: dto.memory,
            platform: dto.platform.map(PlatformId::new),
            available_platforms: dto.available_platforms.into_iter().map(PlatformId::new).collect(),
        }
    }
}

impl TryFrom<ConfigurationDto> for Configuration {
    type Error = ConversionError;

    fn try_from(dto: ConfigurationDto) -> Result<Self, Self::Error> {
        let mut configuration = Configuration::new();

        for node_dto in dto.nodes {
            let online = node_dto.online;
            let node = Node::from(node_dto);
            if online {
                configuration.add_online(node);
            } else {
                configuration.add_offline(node);
            }
        }

        for vm_dto in dto.vms {
            let vm = VirtualMachine {
                id: VmId::new(vm_dto.id.clone()),
                nb_cpus: vm_dto.nb_cpus,
                cpu_demand: vm_dto.cpu_demand,
                cpu_max: vm_dto.cpu_max.unwrap_or(vm_dto.cpu_demand),
                memory: vm_dto.memory,
                platform: vm_dto.platform.map(PlatformId::new),
                options: vm_dto.options,
            };

            let host = || vm_dto.host.clone().map(NodeId::new).ok_or_else(|| ConversionError::MissingHost(vm_dto.id.clone()));
            match vm_dto.state.as_str() {
                "running" => configuration.set_run_on(vm, &host()?)?,
                "sleeping" => configuration.set_sleep_on(vm, &host()?)?,
                "waiting" => configuration.set_waiting(vm),
                other => return Err(ConversionError::UnknownVmState(other.to_string())),
            }
        }

        log::debug!("Configuration loaded: {} nodes, {} VMs", configuration.nodes().count(), configuration.vms().count());
        Ok(configuration)
    }
}

impl From<&Configuration> for ConfigurationDto {
    fn from(configuration: &Configuration) -> Self {
        let nodes = configuration
            .nodes()
            .map(|node| NodeDto {
                id: node.id.to_string(),
                nb_cpus: node.nb_cpus,
                cpu_rate: node.cpu_rate,
                memory: node.memory,
                online: configuration.is_online(&node.id),
                platform: node.platform.as_ref().map(ToString::to_string),
                available_platforms: node.available_platforms.iter().map(ToString::to_string).collect(),
            })
            .collect();

        let vms = configuration
            .vms()
            .map(|vm| {
                let (state, host) = match configuration.state_of(&vm.id) {
                    Some(VmState::Running(node)) => ("running", Some(node.to_string())),
                    Some(VmState::Sleeping(node)) => ("sleeping", Some(node.to_string())),
                    _ => ("waiting", None),
                };
                VmDto {
                    id: vm.id.to_string(),
                    nb_cpus: vm.nb_cpus,
                    cpu_demand: vm.cpu_demand,
                    cpu_max: Some(vm.cpu_max),
                    memory: vm.memory,
                    platform: vm.platform.as_ref().map(ToString::to_string),
                    options: vm.options.clone(),
                    state: state.to_string(),
                    host,
                }
            })
            .collect();

        ConfigurationDto { nodes, vms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigurationError;

    const SNAPSHOT: &str = r#"{
        "nodes": [
            { "id": "n1", "nbCpus": 2, "cpuRate": 100, "memory": 4096, "platform": "xen" },
            { "id": "n2", "nbCpus": 2, "cpuRate": 100, "memory": 4096, "online": false }
        ],
        "vms": [
            { "id": "vm1", "cpuDemand": 50, "memory": 512, "state": "running", "host": "n1" },
            { "id": "vm2", "cpuDemand": 50, "memory": 512, "state": "waiting" }
        ]
    }"#;

    #[test]
    fn snapshot_converts_to_configuration() {
        let dto: ConfigurationDto = serde_json::from_str(SNAPSHOT).unwrap();
        let cfg = Configuration::try_from(dto).unwrap();

        assert!(cfg.is_online(&"n1".into()));
        assert!(!cfg.is_online(&"n2".into()));
        assert!(cfg.is_running(&"vm1".into()));
        assert_eq!(cfg.get_vm(&"vm1".into()).unwrap().nb_cpus, 1);
        assert_eq!(cfg.waitings().count(), 1);

        let back = ConfigurationDto::from(&cfg);
        assert_eq!(Configuration::try_from(back).unwrap(), cfg);
    }

    #[test]
    fn vm_on_offline_node_is_rejected() {
        let mut dto: ConfigurationDto = serde_json::from_str(SNAPSHOT).unwrap();
        dto.vms[0].host = Some("n2".to_string());

        let err = Configuration::try_from(dto).unwrap_err();
        assert!(matches!(err, ConversionError::Configuration(ConfigurationError::NodeOffline(_))));
    }

    #[test]
    fn running_vm_needs_a_host() {
        let mut dto: ConfigurationDto = serde_json::from_str(SNAPSHOT).unwrap();
        dto.vms[0].host = None;
        assert!(matches!(Configuration::try_from(dto), Err(ConversionError::MissingHost(_))));
    }
}
