use std::collections::BTreeMap;

use crate::domain::configuration::platform::PlatformRegistry;
use crate::domain::configuration::virtual_machine::VirtualMachine;
use crate::error::BuildError;

const MEMORY: &str = "memory";
const VCPUS: &str = "vcpus";
const CPU_DEMAND: &str = "cpu_demand";
const CPU_MAX: &str = "cpu_max";
const PLATFORM: &str = "platform";

/// Materializes VMs from raw `key = value` sources, the format hypervisor
/// configuration files use.
///
/// `memory` is required. `vcpus` defaults to 1, `cpu_demand` to 0 and
/// `cpu_max` to `cpu_demand`. Every other key ends up in the VM's options.
#[derive(Debug, Clone, Default)]
pub struct VirtualMachineBuilder {
    registry: Option<PlatformRegistry>,
}

impl VirtualMachineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects VMs requiring a platform the registry does not know.
    pub fn with_registry(registry: PlatformRegistry) -> Self {
        VirtualMachineBuilder { registry: Some(registry) }
    }

    pub fn build(&self, name: &str, source: &str) -> Result<VirtualMachine, BuildError> {
        let mut attributes = parse_attributes(name, source)?;

        let memory = match attributes.remove(MEMORY) {
            Some(value) => parse_positive(name, MEMORY, &value)?,
            None => return Err(BuildError::MissingAttribute { vm: name.to_string(), attribute: MEMORY.to_string() }),
        };

        let nb_cpus = match attributes.remove(VCPUS) {
            Some(value) => parse_positive(name, VCPUS, &value)?,
            None => 1,
        };

        let cpu_demand = match attributes.remove(CPU_DEMAND) {
            Some(value) => parse_non_negative(name, CPU_DEMAND, &value)?,
            None => 0,
        };

        let cpu_max = match attributes.remove(CPU_MAX) {
            Some(value) => parse_non_negative(name, CPU_MAX, &value)?,
            None => cpu_demand,
        };

        let mut vm = VirtualMachine::new(name, nb_cpus, cpu_demand, memory).with_cpu_max(cpu_max);

        if let Some(platform) = attributes.remove(PLATFORM) {
            if let Some(registry) = &self.registry {
                if !registry.contains(&platform.as_str().into()) {
                    return Err(BuildError::UnknownPlatform { vm: name.to_string(), platform });
                }
            }
            vm = vm.with_platform(platform);
        }

        vm.options = attributes;
        log::debug!("Built VM {} ({} vcpus, {} MiB)", vm.id, vm.nb_cpus, vm.memory);
        Ok(vm)
    }
}

fn parse_attributes(name: &str, source: &str) -> Result<BTreeMap<String, String>, BuildError> {
    let mut attributes = BTreeMap::new();

    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(BuildError::MalformedLine { vm: name.to_string(), line: idx + 1 });
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(BuildError::MalformedLine { vm: name.to_string(), line: idx + 1 });
        }

        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        attributes.insert(key.to_string(), value.to_string());
    }
    Ok(attributes)
}

fn parse_non_negative(name: &str, attribute: &str, value: &str) -> Result<i64, BuildError> {
    match value.parse::<i64>() {
        Ok(v) if v >= 0 => Ok(v),
        _ => Err(BuildError::InvalidAttribute { vm: name.to_string(), attribute: attribute.to_string(), value: value.to_string() }),
    }
}

fn parse_positive(name: &str, attribute: &str, value: &str) -> Result<i64, BuildError> {
    match parse_non_negative(name, attribute, value)? {
        0 => Err(BuildError::InvalidAttribute { vm: name.to_string(), attribute: attribute.to_string(), value: value.to_string() }),
        v => Ok(v),
    }
}
