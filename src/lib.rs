use std::path::Path;

use crate::api::configuration_dto::ConfigurationDto;
use crate::domain::configuration::configuration::Configuration;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Reads a configuration snapshot and checks its invariants.
pub fn load_configuration(file_path: impl AsRef<Path>) -> Result<Configuration> {
    let dto: ConfigurationDto = parse_json_file(file_path.as_ref())?;
    log::debug!("JSON file parsed successfully.");

    let configuration = Configuration::try_from(dto)?;
    configuration.check_invariants()?;
    log::info!("Configuration of {} nodes and {} VMs loaded from '{}'", configuration.nodes().count(), configuration.vms().count(), file_path.as_ref().display());

    Ok(configuration)
}
